//! YAML specification files
//!
//! A specification file is compiled into the same [`Specification`] data
//! model the builder API produces. Every YAML step is context-aware: its
//! actions run against a working copy of the context and the step returns
//! `Updated` if any action wrote to it, `Unchanged` otherwise, or the raw
//! value of an explicit `return` action.
//!
//! ```yaml
//! name: counter
//! tags: [smoke]
//! context:
//!   greeting: hello
//! scenarios:
//!   - name: doubles a value
//!     steps:
//!       - kind: given
//!         description: x is 10
//!         actions:
//!           - action: set
//!             values: { x: 10 }
//!       - kind: then
//!         description: x is still 10
//!         actions:
//!           - action: assert
//!             key: x
//!             equals: 10
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::common::{truncate, Error, Result};
use crate::subject::SubjectControl;

use super::{ExecutionContext, Scenario, Specification, Step, StepKind, StepResult};

/// Poll interval while waiting for subject output
const OUTPUT_POLL_MS: u64 = 50;

/// A specification file as written on disk
#[derive(Deserialize, Debug)]
pub struct SpecFile {
    /// Name of the specification
    pub name: String,
    /// What the specification covers
    pub description: Option<String>,
    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,
    /// Keys every scenario starts with
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Scenarios in execution order
    pub scenarios: Vec<ScenarioDef>,
}

/// A scenario as written on disk
#[derive(Deserialize, Debug)]
pub struct ScenarioDef {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Keys layered over the specification context
    #[serde(default)]
    pub context: Map<String, Value>,
    pub steps: Vec<StepDef>,
}

/// A step as written on disk
#[derive(Deserialize, Debug)]
pub struct StepDef {
    pub kind: StepKind,
    pub description: String,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// One thing a YAML step does
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Write keys into the context
    Set { values: Map<String, Value> },
    /// Check a context key
    Assert {
        key: String,
        /// Exact value
        equals: Option<Value>,
        /// Substring of the value's text
        contains: Option<String>,
        /// Presence (`false` asserts absence)
        exists: Option<bool>,
    },
    /// Send a line of input to the subject
    Send { text: String },
    /// Wait until the subject printed a line containing `contains`
    ExpectOutput {
        contains: String,
        #[serde(default = "default_expect_timeout")]
        timeout_ms: u64,
    },
    /// Capture an artifact, optionally storing its path under `key`
    Screenshot { name: String, key: Option<String> },
    /// Pause the step
    Sleep { ms: u64 },
    /// Run a shell command that must succeed
    Shell { command: String },
    /// Return a raw value, checked by the context contract
    Return { value: Value },
}

fn default_expect_timeout() -> u64 {
    5000
}

/// Load one specification file
pub fn load_file(path: &Path) -> Result<Specification> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    Ok(parse(&content, &path.display().to_string())?.with_source(path))
}

/// Load several specification files, in the given order
pub fn load_all(paths: &[impl AsRef<Path>]) -> Result<Vec<Specification>> {
    paths.iter().map(|p| load_file(p.as_ref())).collect()
}

/// Parse specification YAML; `origin` names the source in errors
pub fn parse(content: &str, origin: &str) -> Result<Specification> {
    let file: SpecFile = serde_yaml::from_str(content).map_err(|e| Error::SpecParse {
        path: origin.to_string(),
        message: e.to_string(),
    })?;
    Ok(compile(file))
}

/// Turn a parsed file into a runnable specification
pub fn compile(file: SpecFile) -> Specification {
    let mut spec = Specification::new(file.name).context(file.context.into());
    if let Some(description) = file.description {
        spec = spec.description(description);
    }
    for tag in file.tags {
        spec = spec.tag(tag);
    }

    for def in file.scenarios {
        let mut scenario = Scenario::new(def.name).context(def.context.into());
        for tag in def.tags {
            scenario = scenario.tag(tag);
        }
        for step in def.steps {
            let actions = step.actions;
            scenario = scenario.step(Step::with_context(
                step.kind,
                step.description,
                move |subject, ctx| run_actions(&actions, subject, ctx),
            ));
        }
        spec = spec.scenario(scenario);
    }

    spec
}

/// Execute a YAML step's actions in order
pub fn run_actions(
    actions: &[Action],
    subject: &mut dyn SubjectControl,
    ctx: &ExecutionContext,
) -> Result<StepResult> {
    let mut working: Option<ExecutionContext> = None;

    for action in actions {
        let current = working.as_ref().unwrap_or(ctx);
        match action {
            Action::Set { values } => {
                let mut next = current.clone();
                for (key, value) in values {
                    next.insert(key.clone(), value.clone());
                }
                working = Some(next);
            }
            Action::Assert {
                key,
                equals,
                contains,
                exists,
            } => check_assert(current, key, equals.as_ref(), contains.as_deref(), *exists)?,
            Action::Send { text } => subject.send_input(text)?,
            Action::ExpectOutput {
                contains,
                timeout_ms,
            } => wait_for_output(subject, contains, *timeout_ms)?,
            Action::Screenshot { name, key } => {
                let artifact = subject.capture(name)?;
                if let Some(key) = key {
                    working = Some(current.with(key.clone(), artifact.path.display().to_string()));
                }
            }
            Action::Sleep { ms } => std::thread::sleep(Duration::from_millis(*ms)),
            Action::Shell { command } => run_shell(command)?,
            Action::Return { value } => return Ok(StepResult::from_value(value.clone())),
        }
    }

    Ok(working.map(StepResult::Updated).unwrap_or(StepResult::Unchanged))
}

fn check_assert(
    ctx: &ExecutionContext,
    key: &str,
    equals: Option<&Value>,
    contains: Option<&str>,
    exists: Option<bool>,
) -> Result<()> {
    let value = ctx.get(key);

    if exists == Some(false) {
        return match value {
            Some(v) => Err(Error::assertion(format!(
                "Context key '{key}' should be absent, found {v}"
            ))),
            None => Ok(()),
        };
    }

    let Some(value) = value else {
        let available: Vec<&str> = ctx.keys().map(String::as_str).collect();
        return Err(Error::assertion(format!(
            "Context key '{key}' not found. Available: {available:?}"
        )));
    };

    if let Some(expected) = equals {
        if value != expected {
            return Err(Error::assertion(format!(
                "Context key '{key}': expected {expected}, got {value}"
            )));
        }
    }

    if let Some(needle) = contains {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !text.contains(needle) {
            return Err(Error::assertion(format!(
                "Context key '{key}': expected value containing '{needle}', got '{}'",
                truncate(&text, 200)
            )));
        }
    }

    Ok(())
}

fn wait_for_output(subject: &mut dyn SubjectControl, needle: &str, timeout_ms: u64) -> Result<()> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        let lines = subject.output(None)?;
        if lines.iter().any(|line| line.contains(needle)) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            let last = lines.last().map(String::as_str).unwrap_or("<no output>");
            return Err(Error::assertion(format!(
                "Subject output did not contain '{needle}' within {timeout_ms}ms (last line: '{}')",
                truncate(last, 200)
            )));
        }
        std::thread::sleep(Duration::from_millis(OUTPUT_POLL_MS));
    }
}

fn run_shell(command: &str) -> Result<()> {
    tracing::debug!("Running shell action: {}", command);
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::capability("shell", format!("failed to execute '{command}': {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::assertion(format!(
            "Shell command '{}' failed with exit code {:?}: {}",
            command,
            output.status.code(),
            truncate(stderr.trim(), 200)
        )));
    }
    Ok(())
}
