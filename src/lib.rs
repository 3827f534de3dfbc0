//! specrun - a specification-execution engine
//!
//! Runs Given/When/Then specifications against a subject-under-test that
//! specrun starts, probes for readiness and stops again. Steps may thread
//! an explicit execution context, run at a fixed pace, or pause for an
//! operator with a debug shell.

pub mod cli;
pub mod commands;
pub mod common;
pub mod engine;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod spec;
pub mod subject;

// Re-export commonly used types
pub use common::{Error, Result};
pub use orchestrator::{Orchestrator, RunOutcome, RunState, SpecSource, TagFilter};
pub use spec::{ExecutionContext, Scenario, Specification, StepKind, StepResult};
pub use subject::{Lifecycle, SubjectControl};
