//! Capabilities step bodies use to drive the subject-under-test
//!
//! The core never talks to the subject itself; step bodies and the debug
//! shell go through [`SubjectControl`]. [`ProcessControl`] is the built-in
//! implementation for a subject launched by specrun: input goes to the
//! process's stdin, output is read from a bounded line buffer, and captures
//! are text snapshots of that buffer written to the artifacts directory.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, ChildStdin};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::common::paths::{ensure_dir, sanitize_file_stem};
use crate::common::{Error, Result};

/// Snapshot of the subject process
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SubjectStatus {
    /// Whether specrun launched the process itself
    pub managed: bool,
    pub pid: Option<u32>,
    /// Unknown for externally managed subjects
    pub running: Option<bool>,
    pub host: String,
    pub port: u16,
    pub output_lines: usize,
}

/// Handle to a captured artifact
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
}

/// Capability interface to the subject-under-test
pub trait SubjectControl: Send {
    fn status(&mut self) -> Result<SubjectStatus>;

    /// Send one line of input
    fn send_input(&mut self, text: &str) -> Result<()>;

    /// Capture visual evidence under `name`
    fn capture(&mut self, name: &str) -> Result<Artifact>;

    /// Introspect one aspect of the subject's state
    fn inspect(&mut self, query: &str) -> Result<Value>;

    /// Recent output lines, oldest first; `None` returns everything buffered
    fn output(&mut self, tail: Option<usize>) -> Result<Vec<String>>;
}

/// Control for when no subject is attached; every capability fails
#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

impl SubjectControl for Unavailable {
    fn status(&mut self) -> Result<SubjectStatus> {
        Err(Error::capability("status", "no subject attached"))
    }

    fn send_input(&mut self, _text: &str) -> Result<()> {
        Err(Error::capability("send", "no subject attached"))
    }

    fn capture(&mut self, _name: &str) -> Result<Artifact> {
        Err(Error::capability("screenshot", "no subject attached"))
    }

    fn inspect(&mut self, _query: &str) -> Result<Value> {
        Err(Error::capability("inspect", "no subject attached"))
    }

    fn output(&mut self, _tail: Option<usize>) -> Result<Vec<String>> {
        Err(Error::capability("output", "no subject attached"))
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded buffer of subject output lines shared with the reader threads
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    max_lines: usize,
}

impl OutputBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            max_lines: max_lines.max(1),
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = lock(&self.lines);
        if lines.len() == self.max_lines {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn tail(&self, count: Option<usize>) -> Vec<String> {
        let lines = lock(&self.lines);
        let skip = count.map(|n| lines.len().saturating_sub(n)).unwrap_or(0);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.lines).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State shared between the lifecycle manager and [`ProcessControl`]
#[derive(Debug)]
pub struct SubjectShared {
    pub host: String,
    pub port: u16,
    pub artifacts_dir: PathBuf,
    pub output: OutputBuffer,
    pub(crate) child: Mutex<Option<Child>>,
    pub(crate) stdin: Mutex<Option<ChildStdin>>,
    managed: bool,
    captures: AtomicU32,
}

impl SubjectShared {
    pub fn new(host: String, port: u16, artifacts_dir: PathBuf, max_lines: usize, managed: bool) -> Self {
        Self {
            host,
            port,
            artifacts_dir,
            output: OutputBuffer::new(max_lines),
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            managed,
            captures: AtomicU32::new(0),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.child).as_ref().map(Child::id)
    }

    /// `None` when the process is not ours to observe
    pub fn running(&self) -> Option<bool> {
        if !self.managed {
            return None;
        }
        let mut child = lock(&self.child);
        Some(match child.as_mut() {
            Some(c) => matches!(c.try_wait(), Ok(None)),
            None => false,
        })
    }
}

/// [`SubjectControl`] backed by a process specrun launched
#[derive(Debug, Clone)]
pub struct ProcessControl {
    shared: Arc<SubjectShared>,
}

impl ProcessControl {
    pub fn new(shared: Arc<SubjectShared>) -> Self {
        Self { shared }
    }
}

impl SubjectControl for ProcessControl {
    fn status(&mut self) -> Result<SubjectStatus> {
        Ok(SubjectStatus {
            managed: self.shared.managed,
            pid: self.shared.pid(),
            running: self.shared.running(),
            host: self.shared.host.clone(),
            port: self.shared.port,
            output_lines: self.shared.output.len(),
        })
    }

    fn send_input(&mut self, text: &str) -> Result<()> {
        let mut stdin = lock(&self.shared.stdin);
        let pipe = stdin
            .as_mut()
            .ok_or_else(|| Error::capability("send", "subject stdin is not available"))?;
        writeln!(pipe, "{text}")
            .and_then(|_| pipe.flush())
            .map_err(|e| Error::capability("send", e))
    }

    fn capture(&mut self, name: &str) -> Result<Artifact> {
        let dir = ensure_dir(&self.shared.artifacts_dir).map_err(|e| Error::capability("screenshot", e))?;
        let seq = self.shared.captures.fetch_add(1, Ordering::SeqCst) + 1;
        let path = dir.join(format!("{:03}-{}.txt", seq, sanitize_file_stem(name)));

        let mut body = self.shared.output.tail(None).join("\n");
        body.push('\n');
        std::fs::write(&path, body).map_err(|e| Error::capability("screenshot", e))?;

        tracing::debug!("Captured artifact '{}' at {}", name, path.display());
        Ok(Artifact {
            name: name.to_string(),
            path,
        })
    }

    fn inspect(&mut self, query: &str) -> Result<Value> {
        let status = self.status()?;
        match query.trim() {
            "" | "status" => Ok(serde_json::to_value(status)?),
            "pid" => Ok(json!(status.pid)),
            "port" => Ok(json!(status.port)),
            "host" => Ok(json!(status.host)),
            "running" => Ok(json!(status.running)),
            "output" => Ok(json!(self.shared.output.tail(Some(20)))),
            other => Err(Error::capability(
                "inspect",
                format!("unknown query '{other}' (try: status, pid, port, host, running, output)"),
            )),
        }
    }

    fn output(&mut self, tail: Option<usize>) -> Result<Vec<String>> {
        Ok(self.shared.output.tail(tail))
    }
}
