//! Subject-under-test: lifecycle, readiness and the capability interface

pub mod control;
pub mod preempt;
pub mod probe;
pub mod process;

pub use control::{Artifact, ProcessControl, SubjectControl, SubjectStatus, Unavailable};
pub use probe::ProbePolicy;
pub use process::ProcessSubject;

use async_trait::async_trait;

use crate::common::Result;

/// Starts and stops the subject for one run
#[async_trait]
pub trait Lifecycle: Send {
    /// Launch the subject, or make sure it is being launched elsewhere
    async fn start(&mut self) -> Result<()>;

    /// Fail if the subject has already died
    fn check_alive(&mut self) -> Result<()>;

    /// Terminate the subject; calling it again is a no-op
    fn stop(&mut self) -> Result<()>;

    /// Capabilities handed to step bodies
    fn control(&mut self) -> &mut dyn SubjectControl;
}

/// Scope guard that stops the subject exactly once
///
/// [`SubjectGuard::release`] is the normal exit. If the guard is dropped
/// instead (an aborted run, a panic unwinding through the orchestrator) the
/// subject is stopped from `Drop`.
pub struct SubjectGuard<'a> {
    lifecycle: &'a mut dyn Lifecycle,
    released: bool,
}

impl<'a> SubjectGuard<'a> {
    pub fn new(lifecycle: &'a mut dyn Lifecycle) -> Self {
        Self {
            lifecycle,
            released: false,
        }
    }

    pub fn subject(&mut self) -> &mut dyn Lifecycle {
        &mut *self.lifecycle
    }

    /// Stop the subject and disarm the guard
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.lifecycle.stop()
    }
}

impl Drop for SubjectGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        tracing::debug!("Releasing subject from guard");
        if let Err(e) = self.lifecycle.stop() {
            tracing::warn!("Failed to stop subject: {}", e);
        }
    }
}
