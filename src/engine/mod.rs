//! Step execution engine
//!
//! Runs one step at a time in one of three modes: immediately, after a
//! pacing delay, or after the operator confirms at a prompt. Step bodies are
//! synchronous; a blocked body holds the whole run, which is what a paced or
//! manually driven run wants.

pub mod operator;
pub mod shell;

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::common::config::ExecutionConfig;
use crate::common::{Error, Result};
use crate::spec::{hand_off, ExecutionContext, Step, StepBody, StepKind};
use crate::subject::SubjectControl;

use operator::Operator;

const STEP_PROMPT: &str = "[Enter] run step  [s] shell  [q] quit > ";

/// How each step is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Immediate,
    Timed(Duration),
    Manual,
}

impl ExecutionMode {
    pub fn for_config(config: &ExecutionConfig) -> Self {
        if config.manual_mode {
            ExecutionMode::Manual
        } else if config.step_delay_ms > 0 {
            ExecutionMode::Timed(Duration::from_millis(config.step_delay_ms))
        } else {
            ExecutionMode::Immediate
        }
    }
}

/// Where a step sits in the run, for prompts and the shell's `status`
#[derive(Debug, Clone, Copy)]
pub struct StepSite<'a> {
    pub spec: &'a str,
    pub scenario: &'a str,
    /// Zero-based position in the scenario
    pub index: usize,
    pub total: usize,
    pub kind: StepKind,
    pub description: &'a str,
}

impl fmt::Display for StepSite<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} > {}\nstep {}/{}: {} {}",
            self.spec,
            self.scenario,
            self.index + 1,
            self.total,
            self.kind,
            self.description
        )
    }
}

/// Executes steps and threads the context between them
pub struct StepEngine<'a> {
    mode: ExecutionMode,
    operator: &'a mut dyn Operator,
}

impl<'a> StepEngine<'a> {
    pub fn new(mode: ExecutionMode, operator: &'a mut dyn Operator) -> Self {
        Self { mode, operator }
    }

    /// Manual mode shows each step at its prompt
    pub fn announces_steps(&self) -> bool {
        self.mode == ExecutionMode::Manual
    }

    /// Run one step and return the context the next step receives
    ///
    /// Plain steps pass `ctx` through untouched. Context-aware steps go
    /// through [`hand_off`], so an invalid return fails the step.
    pub async fn execute(
        &mut self,
        step: &Step,
        ctx: ExecutionContext,
        subject: &mut dyn SubjectControl,
        site: &StepSite<'_>,
    ) -> Result<ExecutionContext> {
        match self.mode {
            ExecutionMode::Immediate => {}
            ExecutionMode::Timed(delay) => tokio::time::sleep(delay).await,
            ExecutionMode::Manual => self.pause(&ctx, subject, site).await?,
        }

        tracing::debug!("Executing step {}/{}: {} {}", site.index + 1, site.total, step.kind, step.description);
        invoke(step, ctx, subject)
    }

    /// Block until the operator lets the step run
    async fn pause(
        &mut self,
        ctx: &ExecutionContext,
        subject: &mut dyn SubjectControl,
        site: &StepSite<'_>,
    ) -> Result<()> {
        self.operator.print(&format!("\n{site}"));
        loop {
            let Some(line) = self.operator.read_line(STEP_PROMPT).await? else {
                tracing::info!("Operator input closed, ending run");
                return Err(Error::OperatorQuit);
            };

            match line.trim() {
                "" | "c" | "continue" => return Ok(()),
                "s" | "shell" => shell::run(&mut *self.operator, subject, ctx, site).await?,
                "q" | "quit" => return Err(Error::OperatorQuit),
                other => self
                    .operator
                    .print(&format!("Unknown choice '{other}': press Enter, 's' or 'q'")),
            }
        }
    }
}

/// Call the step body, turning panics into step failures
fn invoke(
    step: &Step,
    ctx: ExecutionContext,
    subject: &mut dyn SubjectControl,
) -> Result<ExecutionContext> {
    match &step.body {
        StepBody::Plain(body) => {
            catch_panic(|| body(subject))?;
            Ok(ctx)
        }
        StepBody::WithContext(body) => {
            let result = catch_panic(|| body(subject, &ctx))?;
            hand_off(result, ctx)
        }
    }
}

pub(crate) fn catch_panic<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(Error::StepPanicked(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::operator::ScriptedOperator;
    use super::*;
    use crate::common::config::Speed;
    use crate::spec::StepResult;
    use crate::subject::Unavailable;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn site() -> StepSite<'static> {
        StepSite {
            spec: "spec",
            scenario: "scenario",
            index: 0,
            total: 1,
            kind: StepKind::Given,
            description: "a step",
        }
    }

    #[test]
    fn test_mode_from_config() {
        assert_eq!(ExecutionMode::for_config(&ExecutionConfig::default()), ExecutionMode::Immediate);
        assert_eq!(
            ExecutionMode::for_config(&ExecutionConfig::with_speed(Some(Speed::Fast))),
            ExecutionMode::Timed(Duration::from_millis(100))
        );
        assert_eq!(
            ExecutionMode::for_config(&ExecutionConfig::with_speed(Some(Speed::Manual))),
            ExecutionMode::Manual
        );
    }

    #[tokio::test]
    async fn test_plain_step_passes_context_through() {
        let mut operator = ScriptedOperator::default();
        let mut engine = StepEngine::new(ExecutionMode::Immediate, &mut operator);
        let step = Step::plain(StepKind::Given, "plain", |_| Ok(()));
        let ctx = ExecutionContext::new().with("a", 1);

        let out = engine.execute(&step, ctx.clone(), &mut Unavailable, &site()).await.unwrap();
        assert_eq!(out, ctx);
    }

    #[tokio::test]
    async fn test_context_step_updates_context() {
        let mut operator = ScriptedOperator::default();
        let mut engine = StepEngine::new(ExecutionMode::Immediate, &mut operator);
        let step = Step::with_context(StepKind::When, "increment", |_, ctx| {
            let n = ctx.get_i64("n").unwrap_or(0);
            Ok(StepResult::Updated(ctx.with("n", n + 1)))
        });

        let ctx = ExecutionContext::new().with("n", 41);
        let out = engine.execute(&step, ctx, &mut Unavailable, &site()).await.unwrap();
        assert_eq!(out.get_i64("n"), Some(42));
    }

    #[tokio::test]
    async fn test_invalid_return_is_contract_violation() {
        let mut operator = ScriptedOperator::default();
        let mut engine = StepEngine::new(ExecutionMode::Immediate, &mut operator);
        let step = Step::with_context(StepKind::Then, "bad", |_, _| Ok(StepResult::Invalid(json!(42))));

        let err = engine
            .execute(&step, ExecutionContext::new(), &mut Unavailable, &site())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContractViolation { .. }));
        assert!(err.to_string().contains("Step returned 42"));
    }

    #[tokio::test]
    async fn test_panic_becomes_step_failure() {
        let mut operator = ScriptedOperator::default();
        let mut engine = StepEngine::new(ExecutionMode::Immediate, &mut operator);
        let step = Step::plain(StepKind::Then, "boom", |_| panic!("expected 3, got 4"));

        let err = engine
            .execute(&step, ExecutionContext::new(), &mut Unavailable, &site())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StepPanicked(ref m) if m == "expected 3, got 4"));
    }

    #[tokio::test]
    async fn test_timed_mode_delays_each_step() {
        let mut operator = ScriptedOperator::default();
        let mut engine = StepEngine::new(ExecutionMode::Timed(Duration::from_millis(50)), &mut operator);
        let step = Step::plain(StepKind::Given, "slow", |_| Ok(()));

        let started = Instant::now();
        for _ in 0..2 {
            engine
                .execute(&step, ExecutionContext::new(), &mut Unavailable, &site())
                .await
                .unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_manual_mode_waits_for_operator() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let step = Step::plain(StepKind::When, "counted", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut operator = ScriptedOperator::new(["what", ""]);
        let mut engine = StepEngine::new(ExecutionMode::Manual, &mut operator);
        engine
            .execute(&step, ExecutionContext::new(), &mut Unavailable, &site())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(operator.prompts, 2);
        assert!(operator.output().contains("Unknown choice 'what'"));
    }

    #[tokio::test]
    async fn test_manual_quit_skips_the_step() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let step = Step::plain(StepKind::When, "never", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut operator = ScriptedOperator::new(["q"]);
        let mut engine = StepEngine::new(ExecutionMode::Manual, &mut operator);
        let err = engine
            .execute(&step, ExecutionContext::new(), &mut Unavailable, &site())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::OperatorQuit));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shell_then_continue_runs_step() {
        let step = Step::with_context(StepKind::Then, "reads ctx", |_, ctx| {
            assert_eq!(ctx.get_str("user"), Some("bob"));
            Ok(StepResult::Unchanged)
        });

        let mut operator = ScriptedOperator::new(["s", "context", "exit", ""]);
        let mut engine = StepEngine::new(ExecutionMode::Manual, &mut operator);
        let ctx = ExecutionContext::new().with("user", "bob");
        let out = engine.execute(&step, ctx.clone(), &mut Unavailable, &site()).await.unwrap();

        assert_eq!(out, ctx);
        assert!(operator.output().contains("\"user\": \"bob\""));
    }
}
