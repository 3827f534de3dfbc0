//! Running specifications scenario by scenario
//!
//! A scenario failure is recorded and the next scenario runs. Only errors
//! that end the whole run (operator quit, run timeout) escape.

use serde::Serialize;
use std::time::Instant;

use crate::common::{Error, Result};
use crate::engine::{StepEngine, StepSite};
use crate::report::Reporter;
use crate::spec::{Scenario, Specification};
use crate::subject::SubjectControl;

/// Result of one scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Result of one specification
#[derive(Debug, Clone, Serialize)]
pub struct SpecReport {
    pub name: String,
    pub source: Option<String>,
    pub scenarios: Vec<ScenarioReport>,
}

impl SpecReport {
    pub fn passed(&self) -> bool {
        self.scenarios.iter().all(|s| s.passed)
    }

    pub fn failed_count(&self) -> usize {
        self.scenarios.iter().filter(|s| !s.passed).count()
    }
}

/// Runs specifications through a [`StepEngine`] and reports progress
pub struct SpecRunner<'a> {
    engine: StepEngine<'a>,
    reporter: &'a mut dyn Reporter,
}

impl<'a> SpecRunner<'a> {
    pub fn new(engine: StepEngine<'a>, reporter: &'a mut dyn Reporter) -> Self {
        Self { engine, reporter }
    }

    pub async fn run_spec(
        &mut self,
        spec: &Specification,
        subject: &mut dyn SubjectControl,
    ) -> Result<SpecReport> {
        tracing::debug!("Running specification '{}' ({} scenarios)", spec.name, spec.scenarios.len());
        self.reporter.start_spec(&spec.name, &spec.options);

        let mut scenarios = Vec::with_capacity(spec.scenarios.len());
        for scenario in &spec.scenarios {
            scenarios.push(self.run_scenario(spec, scenario, subject).await?);
        }

        let report = SpecReport {
            name: spec.name.clone(),
            source: spec.source.as_ref().map(|p| p.display().to_string()),
            scenarios,
        };

        if report.passed() {
            self.reporter.spec_passed(&spec.name);
        } else {
            let summary = format!(
                "({} of {} scenarios failed)",
                report.failed_count(),
                report.scenarios.len()
            );
            self.reporter.spec_failed(&spec.name, &summary);
        }
        Ok(report)
    }

    async fn run_scenario(
        &mut self,
        spec: &Specification,
        scenario: &Scenario,
        subject: &mut dyn SubjectControl,
    ) -> Result<ScenarioReport> {
        self.reporter.start_scenario(&scenario.name);
        let started = Instant::now();
        let steps_total = scenario.steps.len();
        let mut steps_run = 0;

        let outcome = match spec.initial_context(scenario, subject) {
            Ok(mut ctx) => {
                let mut outcome = Ok(());
                for (index, step) in scenario.steps.iter().enumerate() {
                    if !self.engine.announces_steps() {
                        self.reporter.step(step.kind, &step.description);
                    }
                    let site = StepSite {
                        spec: &spec.name,
                        scenario: &scenario.name,
                        index,
                        total: steps_total,
                        kind: step.kind,
                        description: &step.description,
                    };
                    steps_run = index + 1;
                    match self.engine.execute(step, ctx, subject, &site).await {
                        Ok(next) => ctx = next,
                        Err(e) => {
                            outcome = Err(e);
                            break;
                        }
                    }
                }
                outcome
            }
            Err(e) => Err(e),
        };

        let error = match outcome {
            Ok(()) => {
                self.reporter.scenario_passed(&scenario.name);
                None
            }
            Err(e) if e.aborts_run() => return Err(e),
            Err(e) => {
                tracing::debug!("Scenario '{}' failed at step {}: {}", scenario.name, steps_run, e);
                self.reporter.scenario_failed(&scenario.name, &e);
                Some(e.to_string())
            }
        };

        Ok(ScenarioReport {
            name: scenario.name.clone(),
            passed: error.is_none(),
            steps_run,
            steps_total,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Failed scenarios of a report, flattened
pub fn failures(report: &SpecReport) -> impl Iterator<Item = (&str, &str)> {
    report
        .scenarios
        .iter()
        .filter_map(|s| s.error.as_deref().map(|e| (s.name.as_str(), e)))
}
