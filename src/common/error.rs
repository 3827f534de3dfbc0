//! Error types for the specification runner
//!
//! Messages are written for the operator watching a run: startup failures
//! say what was probed and how often, contract violations show the accepted
//! step return forms.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code for a run that completed with failing scenarios
pub const EXIT_FAILURES: i32 = 1;
/// Exit code for fatal errors (startup, readiness, configuration, timeout)
pub const EXIT_FATAL: i32 = 2;
/// Exit code for an operator quitting from manual mode
pub const EXIT_OPERATOR_QUIT: i32 = 130;

/// Main error type for specrun
#[derive(Error, Debug)]
pub enum Error {
    // === Subject Lifecycle Errors ===
    #[error("Failed to start subject: {0}")]
    SubjectStart(String),

    #[error("Subject not reachable at {host}:{port} after {attempts} attempts ({interval_ms}ms apart)")]
    NotReady {
        host: String,
        port: u16,
        attempts: u32,
        interval_ms: u64,
    },

    #[error("Port {port} is still in use after trying to free it{}", holder_suffix(.holder))]
    PortInUse { port: u16, holder: Option<u32> },

    // === Step Errors ===
    #[error(
        "Step returned {value}, which is not a valid context hand-off.\n\
         Return one of:\n  \
         StepResult::Unchanged            (pass the context through untouched)\n  \
         StepResult::Updated(context)     (replace the context)\n\
         Example of a context mutation:\n  \
         Ok(StepResult::Updated(ctx.with(\"count\", 1)))\n\
         In YAML specs use `action: set` or return `unchanged` / `{{ok: {{count: 1}}}}`."
    )]
    ContractViolation { value: String },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Step panicked: {0}")]
    StepPanicked(String),

    #[error("Capability '{name}' failed: {reason}")]
    Capability { name: String, reason: String },

    // === Run Control ===
    #[error("Run aborted by operator")]
    OperatorQuit,

    #[error("Run exceeded timeout of {0}ms")]
    RunTimeout(u64),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to parse specification '{path}': {message}")]
    SpecParse { path: String, message: String },

    #[error("Specification discovery failed: {0}")]
    Discovery(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

fn holder_suffix(holder: &Option<u32>) -> String {
    holder
        .map(|pid| format!(" (held by pid {pid})"))
        .unwrap_or_default()
}

impl Error {
    /// Create an assertion error
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Create a capability error
    pub fn capability(name: &str, reason: impl ToString) -> Self {
        Self::Capability {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a contract violation naming the offending value
    pub fn contract_violation(value: &serde_json::Value) -> Self {
        Self::ContractViolation {
            value: value.to_string(),
        }
    }

    /// Whether this error ends the whole run instead of a single scenario
    pub fn aborts_run(&self) -> bool {
        matches!(self, Error::OperatorQuit | Error::RunTimeout(_))
    }

    /// Process exit code for a run that ended with this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::OperatorQuit => EXIT_OPERATOR_QUIT,
            _ => EXIT_FATAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_violation_shows_value_and_forms() {
        let err = Error::contract_violation(&serde_json::json!(true));
        let msg = err.to_string();
        assert!(msg.starts_with("Step returned true"));
        assert!(msg.contains("StepResult::Unchanged"));
        assert!(msg.contains("StepResult::Updated(context)"));
        assert!(msg.contains("ctx.with(\"count\", 1)"));
    }

    #[test]
    fn test_not_ready_names_endpoint_and_attempts() {
        let err = Error::NotReady {
            host: "127.0.0.1".into(),
            port: 4000,
            attempts: 30,
            interval_ms: 1000,
        };
        assert_eq!(
            err.to_string(),
            "Subject not reachable at 127.0.0.1:4000 after 30 attempts (1000ms apart)"
        );
    }

    #[test]
    fn test_port_in_use_message() {
        let err = Error::PortInUse { port: 4000, holder: Some(42) };
        assert_eq!(
            err.to_string(),
            "Port 4000 is still in use after trying to free it (held by pid 42)"
        );
        let err = Error::PortInUse { port: 4000, holder: None };
        assert_eq!(err.to_string(), "Port 4000 is still in use after trying to free it");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::OperatorQuit.exit_code(), EXIT_OPERATOR_QUIT);
        assert_eq!(Error::RunTimeout(10).exit_code(), EXIT_FATAL);
        assert_eq!(Error::SubjectStart("boom".into()).exit_code(), EXIT_FATAL);
        assert!(Error::OperatorQuit.aborts_run());
        assert!(!Error::assertion("x").aborts_run());
    }
}
