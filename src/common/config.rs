//! Configuration file handling and the per-run execution settings
//!
//! The TOML file supplies defaults; command-line flags override them when
//! the [`ExecutionConfig`] for a run is resolved.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::paths::resolve_config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Run defaults
    #[serde(default)]
    pub run: RunConfig,

    /// How to launch the subject-under-test
    #[serde(default)]
    pub subject: SubjectConfig,

    /// Readiness probe budget
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Artifact, result and log locations
    #[serde(default)]
    pub output: OutputConfig,
}

/// Pacing preset for step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Speed {
    /// 2 seconds between steps
    Slow,
    /// Half a second between steps
    Normal,
    /// 100ms between steps
    Fast,
    /// Pause for the operator before every step
    Manual,
}

impl Speed {
    /// Pacing delay inserted before each step body
    pub fn step_delay_ms(self) -> u64 {
        match self {
            Speed::Slow => 2000,
            Speed::Normal => 500,
            Speed::Fast => 100,
            Speed::Manual => 0,
        }
    }
}

/// Run defaults
#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    /// Directory searched for specification files
    #[serde(default = "default_spec_dir")]
    pub spec_dir: PathBuf,

    /// Glob (relative to `spec_dir`) selecting specification files
    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// Default pacing; unset runs steps back to back
    #[serde(default)]
    pub speed: Option<Speed>,

    /// Port the subject listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Overall timeout for the specification phase
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Keep the subject running after a successful run
    #[serde(default)]
    pub watch: bool,

    /// Run specifications one after another (the only supported mode)
    #[serde(default = "default_true")]
    pub sequential: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            spec_dir: default_spec_dir(),
            pattern: default_pattern(),
            speed: None,
            port: default_port(),
            timeout_ms: None,
            watch: false,
            sequential: true,
        }
    }
}

fn default_spec_dir() -> PathBuf {
    PathBuf::from("spec")
}
fn default_pattern() -> String {
    "**/*_spec.{yaml,yml}".to_string()
}
fn default_port() -> u16 {
    4000
}
fn default_true() -> bool {
    true
}

/// How to launch the subject-under-test
#[derive(Debug, Deserialize, Clone)]
pub struct SubjectConfig {
    /// Program to launch; unset means the subject is managed externally
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the program (`PORT` is always set)
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the program
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Host the readiness probe connects to
    #[serde(default = "default_host")]
    pub host: String,

    /// Terminate whatever already listens on the port before starting
    #[serde(default)]
    pub preempt_port: bool,

    /// Grace period between SIGTERM and kill on shutdown
    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            host: default_host(),
            preempt_port: false,
            stop_grace_ms: default_stop_grace(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_stop_grace() -> u64 {
    500
}

/// Readiness probe budget
#[derive(Debug, Deserialize, Clone)]
pub struct ReadinessConfig {
    /// Delay between connection attempts
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_interval() -> u64 {
    1000
}
fn default_max_attempts() -> u32 {
    30
}

/// Artifact, result and log locations
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    /// Where captures are written
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Write the run outcome as JSON here
    #[serde(default)]
    pub results_path: Option<PathBuf>,

    /// Mirror logs into this file
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Subject output lines kept in memory
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            results_path: None,
            log_file: None,
            max_lines: default_max_lines(),
        }
    }
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("spec-artifacts")
}
fn default_max_lines() -> usize {
    10_000
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, `./specrun.toml` and then
    /// the per-user config file are tried; defaults apply if neither exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let Some(path) = resolve_config_path(explicit) else {
            return Ok(Self::default());
        };

        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file '{}' does not exist",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }
}

/// Command-line overrides applied on top of [`RunConfig`]
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub speed: Option<Speed>,
    pub manual: bool,
    pub timeout_ms: Option<u64>,
    pub port: Option<u16>,
    pub watch: bool,
}

/// Settings for one invocation, fixed once the run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionConfig {
    pub speed: Option<Speed>,
    pub step_delay_ms: u64,
    pub manual_mode: bool,
    pub timeout_ms: Option<u64>,
    pub port: u16,
    pub watch_after_success: bool,
    pub sequential: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            speed: None,
            step_delay_ms: 0,
            manual_mode: false,
            timeout_ms: None,
            port: default_port(),
            watch_after_success: false,
            sequential: true,
        }
    }
}

impl ExecutionConfig {
    /// Settings derived from a pacing preset alone
    pub fn with_speed(speed: Option<Speed>) -> Self {
        Self {
            speed,
            step_delay_ms: speed.map(Speed::step_delay_ms).unwrap_or(0),
            manual_mode: speed == Some(Speed::Manual),
            ..Self::default()
        }
    }

    /// Merge file defaults with command-line overrides
    pub fn resolve(run: &RunConfig, overrides: &RunOverrides) -> Self {
        let speed = overrides.speed.or(run.speed);
        let base = Self::with_speed(speed);

        Self {
            manual_mode: base.manual_mode || overrides.manual,
            timeout_ms: overrides.timeout_ms.or(run.timeout_ms),
            port: overrides.port.unwrap_or(run.port),
            watch_after_success: overrides.watch || run.watch,
            sequential: run.sequential,
            ..base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.run.port, 4000);
        assert_eq!(config.run.pattern, "**/*_spec.{yaml,yml}");
        assert!(config.run.sequential);
        assert_eq!(config.readiness.interval_ms, 1000);
        assert_eq!(config.readiness.max_attempts, 30);
        assert_eq!(config.subject.host, "127.0.0.1");
        assert!(config.subject.command.is_none());
    }

    #[test]
    fn test_full_config_parses() {
        let config = Config::from_toml(
            r#"
[run]
spec_dir = "acceptance"
speed = "fast"
port = 4100
timeout_ms = 60000

[subject]
command = "./server"
args = ["--dev"]
env = { MODE = "test" }
preempt_port = true

[readiness]
interval_ms = 250
max_attempts = 8

[output]
artifacts_dir = "out/artifacts"
results_path = "out/results.json"
"#,
        )
        .unwrap();

        assert_eq!(config.run.spec_dir, PathBuf::from("acceptance"));
        assert_eq!(config.run.speed, Some(Speed::Fast));
        assert_eq!(config.run.timeout_ms, Some(60000));
        assert_eq!(config.subject.command.as_deref(), Some("./server"));
        assert_eq!(config.subject.env.get("MODE").map(String::as_str), Some("test"));
        assert!(config.subject.preempt_port);
        assert_eq!(config.readiness.max_attempts, 8);
        assert_eq!(
            config.output.results_path,
            Some(PathBuf::from("out/results.json"))
        );
    }

    #[test]
    fn test_invalid_config_is_parse_error() {
        let err = Config::from_toml("[run]\nport = \"not a port\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let err = Config::load(Some(Path::new("/nonexistent/specrun.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_speed_delays() {
        assert_eq!(Speed::Slow.step_delay_ms(), 2000);
        assert_eq!(Speed::Normal.step_delay_ms(), 500);
        assert_eq!(Speed::Fast.step_delay_ms(), 100);
        assert_eq!(Speed::Manual.step_delay_ms(), 0);
    }

    #[test]
    fn test_resolve_overrides_file_values() {
        let run = RunConfig {
            speed: Some(Speed::Slow),
            port: 4100,
            ..RunConfig::default()
        };
        let overrides = RunOverrides {
            speed: Some(Speed::Fast),
            port: Some(5000),
            timeout_ms: Some(1000),
            ..RunOverrides::default()
        };

        let exec = ExecutionConfig::resolve(&run, &overrides);
        assert_eq!(exec.speed, Some(Speed::Fast));
        assert_eq!(exec.step_delay_ms, 100);
        assert!(!exec.manual_mode);
        assert_eq!(exec.port, 5000);
        assert_eq!(exec.timeout_ms, Some(1000));
    }

    #[test]
    fn test_manual_flag_and_manual_speed() {
        let exec = ExecutionConfig::resolve(
            &RunConfig::default(),
            &RunOverrides {
                manual: true,
                ..RunOverrides::default()
            },
        );
        assert!(exec.manual_mode);
        assert_eq!(exec.step_delay_ms, 0);

        let exec = ExecutionConfig::with_speed(Some(Speed::Manual));
        assert!(exec.manual_mode);
    }

    #[test]
    fn test_default_is_immediate() {
        let exec = ExecutionConfig::resolve(&RunConfig::default(), &RunOverrides::default());
        assert_eq!(exec.speed, None);
        assert_eq!(exec.step_delay_ms, 0);
        assert!(!exec.manual_mode);
        assert_eq!(exec.port, 4000);
    }
}
