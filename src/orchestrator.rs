//! One invocation of the runner, from discovery to teardown
//!
//! ```text
//! Idle -> Discovering -> Starting -> WaitingReady -> Running
//!      -> Aggregating -> CleaningUp -> Terminal(Success | Failure)
//! ```
//!
//! Startup and readiness errors skip straight to `CleaningUp`. Operator quit
//! ends the run at once; the subject is then released by the guard's drop.
//! Whatever happens after the subject was started, it is stopped exactly
//! once.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, Instant};

use crate::common::config::ExecutionConfig;
use crate::common::{Error, Result};
use crate::engine::operator::Operator;
use crate::engine::{ExecutionMode, StepEngine};
use crate::report::Reporter;
use crate::runner::{failures, SpecReport, SpecRunner};
use crate::spec::{discovery, loader, Specification};
use crate::subject::{probe, Lifecycle, ProbePolicy, SubjectControl, SubjectGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Success,
    Failure,
}

/// Phases of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Discovering,
    Starting,
    WaitingReady,
    Running,
    Aggregating,
    CleaningUp,
    Terminal(Terminal),
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Terminal(Terminal::Success) => f.write_str("Terminal(Success)"),
            RunState::Terminal(Terminal::Failure) => f.write_str("Terminal(Failure)"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Where the specifications of a run come from
#[derive(Debug)]
pub enum SpecSource {
    /// Explicit files or directories; empty means search `dir`
    Paths {
        paths: Vec<PathBuf>,
        dir: PathBuf,
        pattern: String,
    },
    /// Already built in code
    Loaded(Vec<Specification>),
}

impl SpecSource {
    /// Resolve to specifications in execution order
    pub fn load(self) -> Result<Vec<Specification>> {
        match self {
            SpecSource::Paths { paths, dir, pattern } => {
                let files = discovery::resolve(&paths, &dir, &pattern)?;
                loader::load_all(&files)
            }
            SpecSource::Loaded(specs) => Ok(specs),
        }
    }
}

/// Tag-based selection of specifications or scenarios
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    pub include: BTreeSet<String>,
    pub exclude: BTreeSet<String>,
    /// Filter individual scenarios instead of whole specifications
    pub scenarios: bool,
}

impl TagFilter {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn allows(&self, tags: &BTreeSet<String>) -> bool {
        let included = self.include.is_empty() || tags.iter().any(|t| self.include.contains(t));
        let excluded = tags.iter().any(|t| self.exclude.contains(t));
        included && !excluded
    }

    /// Drop what the filter rejects
    ///
    /// In scenario mode a scenario is judged on its own tags plus its
    /// specification's, and specifications left without scenarios are dropped.
    pub fn apply(&self, specs: Vec<Specification>) -> Vec<Specification> {
        if self.is_empty() {
            return specs;
        }

        if !self.scenarios {
            return specs.into_iter().filter(|s| self.allows(&s.options.tags)).collect();
        }

        specs
            .into_iter()
            .filter_map(|mut spec| {
                let spec_tags = spec.options.tags.clone();
                spec.scenarios.retain(|scenario| {
                    let tags: BTreeSet<String> = spec_tags.union(&scenario.tags).cloned().collect();
                    self.allows(&tags)
                });
                (!spec.scenarios.is_empty()).then_some(spec)
            })
            .collect()
    }
}

/// One failed scenario
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Failure {
    pub specification: String,
    pub scenario: String,
    pub error: String,
}

/// Aggregated result of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub specifications_run: usize,
    pub scenarios_passed: usize,
    pub scenarios_failed: usize,
    pub failures: Vec<Failure>,
    pub duration_ms: u64,
    pub specifications: Vec<SpecReport>,
}

impl RunOutcome {
    pub fn aggregate(reports: Vec<SpecReport>, elapsed: Duration) -> Self {
        let failures: Vec<Failure> = reports
            .iter()
            .flat_map(|report| {
                failures(report).map(move |(scenario, error)| Failure {
                    specification: report.name.clone(),
                    scenario: scenario.to_string(),
                    error: error.to_string(),
                })
            })
            .collect();
        let total: usize = reports.iter().map(|r| r.scenarios.len()).sum();

        Self {
            specifications_run: reports.len(),
            scenarios_passed: total - failures.len(),
            scenarios_failed: failures.len(),
            failures,
            duration_ms: elapsed.as_millis() as u64,
            specifications: reports,
        }
    }

    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resolves when a run parked in watch mode should shut down
pub type WatchSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Drives a run through its phases
pub struct Orchestrator {
    config: ExecutionConfig,
    host: String,
    probe: ProbePolicy,
    filter: TagFilter,
    state: RunState,
    history: Vec<RunState>,
    watch_signal: Option<WatchSignal>,
}

impl Orchestrator {
    pub fn new(config: ExecutionConfig, host: impl Into<String>, probe: ProbePolicy) -> Self {
        Self {
            config,
            host: host.into(),
            probe,
            filter: TagFilter::default(),
            state: RunState::Idle,
            history: vec![RunState::Idle],
            watch_signal: None,
        }
    }

    pub fn with_filter(mut self, filter: TagFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Wait on `signal` instead of Ctrl-C when watching after success
    pub fn with_watch_signal(mut self, signal: impl Future<Output = ()> + Send + 'static) -> Self {
        self.watch_signal = Some(Box::pin(signal));
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state entered so far, in order
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!("Run state {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Execute a complete run
    ///
    /// Returns the outcome when the run got as far as aggregating results,
    /// even if scenarios failed. Startup, readiness, timeout and operator
    /// quit come back as errors.
    pub async fn run(
        &mut self,
        source: SpecSource,
        lifecycle: &mut dyn Lifecycle,
        reporter: &mut dyn Reporter,
        operator: &mut dyn Operator,
    ) -> Result<RunOutcome> {
        let started = Instant::now();

        self.transition(RunState::Discovering);
        let specs = match source.load() {
            Ok(specs) => self.filter.apply(specs),
            Err(e) => {
                self.transition(RunState::Terminal(Terminal::Failure));
                return Err(e);
            }
        };
        let scenario_count: usize = specs.iter().map(|s| s.scenarios.len()).sum();
        tracing::info!("Running {} specification(s), {} scenario(s)", specs.len(), scenario_count);
        if specs.is_empty() {
            tracing::warn!("No specifications selected");
        }
        if !self.config.sequential {
            tracing::warn!("Parallel execution is not supported; running specifications sequentially");
        }

        let mut guard = SubjectGuard::new(lifecycle);
        let result = self.drive(&specs, &mut guard, reporter, operator, started).await;

        if let Err(Error::OperatorQuit) = &result {
            self.transition(RunState::Terminal(Terminal::Failure));
            drop(guard);
            return result;
        }

        if matches!(&result, Ok(outcome) if outcome.success()) && self.config.watch_after_success {
            self.watch().await;
        }

        self.transition(RunState::CleaningUp);
        if let Err(e) = guard.release() {
            tracing::warn!("Failed to stop subject: {}", e);
        }

        let terminal = match &result {
            Ok(outcome) if outcome.success() => Terminal::Success,
            _ => Terminal::Failure,
        };
        self.transition(RunState::Terminal(terminal));
        result
    }

    async fn drive(
        &mut self,
        specs: &[Specification],
        guard: &mut SubjectGuard<'_>,
        reporter: &mut dyn Reporter,
        operator: &mut dyn Operator,
        started: Instant,
    ) -> Result<RunOutcome> {
        self.transition(RunState::Starting);
        guard.subject().start().await?;

        self.transition(RunState::WaitingReady);
        let subject = guard.subject();
        let attempt = probe::wait_ready(&self.host, self.config.port, self.probe, || subject.check_alive()).await?;
        tracing::info!("Subject ready on {}:{} (attempt {})", self.host, self.config.port, attempt);

        self.transition(RunState::Running);
        let mode = ExecutionMode::for_config(&self.config);
        let running = run_all(specs, mode, subject.control(), reporter, operator);
        let reports = match self.config.timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), running)
                .await
                .map_err(|_| Error::RunTimeout(ms))??,
            None => running.await?,
        };

        self.transition(RunState::Aggregating);
        Ok(RunOutcome::aggregate(reports, started.elapsed()))
    }

    /// Keep the subject up until the operator interrupts
    async fn watch(&mut self) {
        println!(
            "\nAll specifications passed. Subject left running on {}:{}; press Ctrl-C to stop.",
            self.host, self.config.port
        );
        match self.watch_signal.take() {
            Some(signal) => signal.await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Could not wait for Ctrl-C: {}", e);
                }
            }
        }
    }
}

async fn run_all(
    specs: &[Specification],
    mode: ExecutionMode,
    subject: &mut dyn SubjectControl,
    reporter: &mut dyn Reporter,
    operator: &mut dyn Operator,
) -> Result<Vec<SpecReport>> {
    let mut runner = SpecRunner::new(StepEngine::new(mode, operator), reporter);
    let mut reports = Vec::with_capacity(specs.len());
    for spec in specs {
        reports.push(runner.run_spec(spec, subject).await?);
    }
    Ok(reports)
}
