//! Specification data model
//!
//! Specifications are plain data assembled with builder calls, either by
//! hand in Rust or by the YAML loader:
//!
//! ```
//! use specrun::spec::{Scenario, Specification, StepResult};
//!
//! let spec = Specification::new("counter")
//!     .tag("smoke")
//!     .scenario(
//!         Scenario::new("doubles a value")
//!             .given_ctx("x is 10", |_, ctx| Ok(StepResult::Updated(ctx.with("x", 10))))
//!             .then_ctx("x is still 10", |_, ctx| {
//!                 assert_eq!(ctx.get_i64("x"), Some(10));
//!                 Ok(StepResult::Unchanged)
//!             }),
//!     );
//! assert_eq!(spec.scenarios[0].steps.len(), 2);
//! ```

pub mod context;
pub mod discovery;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use crate::common::Result;
use crate::subject::SubjectControl;

pub use context::{hand_off, ExecutionContext, StepResult};

/// Body of a step that does not take part in context hand-off
pub type PlainBody = Box<dyn Fn(&mut dyn SubjectControl) -> Result<()> + Send + Sync>;

/// Body of a context-aware step
pub type ContextBody =
    Box<dyn Fn(&mut dyn SubjectControl, &ExecutionContext) -> Result<StepResult> + Send + Sync>;

/// Collaborator producing the starting context of each scenario
pub type SetupFn = Box<dyn Fn(&mut dyn SubjectControl) -> Result<ExecutionContext> + Send + Sync>;

/// Documentation label of a step; every kind executes the same way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Given,
    When,
    Then,
    And,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepKind::Given => "Given",
            StepKind::When => "When",
            StepKind::Then => "Then",
            StepKind::And => "And",
        };
        f.write_str(label)
    }
}

pub enum StepBody {
    Plain(PlainBody),
    WithContext(ContextBody),
}

/// A single labelled unit of behavior within a scenario
pub struct Step {
    pub kind: StepKind,
    pub description: String,
    pub body: StepBody,
}

impl Step {
    /// A step that ignores the scenario context
    pub fn plain<F>(kind: StepKind, description: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut dyn SubjectControl) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            kind,
            description: description.into(),
            body: StepBody::Plain(Box::new(body)),
        }
    }

    /// A step that reads the context and declares what the next step sees
    pub fn with_context<F>(kind: StepKind, description: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut dyn SubjectControl, &ExecutionContext) -> Result<StepResult>
            + Send
            + Sync
            + 'static,
    {
        Self {
            kind,
            description: description.into(),
            body: StepBody::WithContext(Box::new(body)),
        }
    }

    pub fn is_context_aware(&self) -> bool {
        matches!(self.body, StepBody::WithContext(_))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("kind", &self.kind)
            .field("description", &self.description)
            .field("context_aware", &self.is_context_aware())
            .finish()
    }
}

/// An ordered sequence of steps sharing one execution context
#[derive(Debug, Default)]
pub struct Scenario {
    pub name: String,
    pub uses_context: bool,
    pub tags: BTreeSet<String>,
    /// Keys layered over the specification's starting context
    pub context: ExecutionContext,
    pub steps: Vec<Step>,
}

macro_rules! step_builders {
    ($($plain:ident, $ctx:ident => $kind:expr;)*) => {
        $(
            pub fn $plain<F>(self, description: impl Into<String>, body: F) -> Self
            where
                F: Fn(&mut dyn SubjectControl) -> Result<()> + Send + Sync + 'static,
            {
                self.step(Step::plain($kind, description, body))
            }

            pub fn $ctx<F>(self, description: impl Into<String>, body: F) -> Self
            where
                F: Fn(&mut dyn SubjectControl, &ExecutionContext) -> Result<StepResult>
                    + Send
                    + Sync
                    + 'static,
            {
                self.step(Step::with_context($kind, description, body))
            }
        )*
    };
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.uses_context = true;
        self.context = context;
        self
    }

    /// Append a step; declaration order is execution order
    pub fn step(mut self, step: Step) -> Self {
        self.uses_context |= step.is_context_aware();
        self.steps.push(step);
        self
    }

    step_builders! {
        given, given_ctx => StepKind::Given;
        when, when_ctx => StepKind::When;
        then, then_ctx => StepKind::Then;
        and, and_ctx => StepKind::And;
    }
}

/// Descriptive options of a specification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecOptions {
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
}

/// A named, taggable group of scenarios
#[derive(Default)]
pub struct Specification {
    pub name: String,
    pub options: SpecOptions,
    pub scenarios: Vec<Scenario>,
    /// File the specification was loaded from, if any
    pub source: Option<PathBuf>,
    context: ExecutionContext,
    setup: Option<SetupFn>,
}

impl Specification {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.options.description = Some(description.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.options.tags.insert(tag.into());
        self
    }

    /// Static keys every scenario starts with
    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// Collaborator run before each scenario; its keys overlay the static ones
    pub fn setup<F>(mut self, setup: F) -> Self
    where
        F: Fn(&mut dyn SubjectControl) -> Result<ExecutionContext> + Send + Sync + 'static,
    {
        self.setup = Some(Box::new(setup));
        self
    }

    pub fn scenario(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Build the context a scenario starts from
    ///
    /// Layers, later wins: specification keys, setup collaborator output,
    /// scenario keys.
    pub fn initial_context(
        &self,
        scenario: &Scenario,
        subject: &mut dyn SubjectControl,
    ) -> Result<ExecutionContext> {
        let mut ctx = self.context.clone();
        if let Some(setup) = &self.setup {
            ctx.merge(&setup(subject)?);
        }
        ctx.merge(&scenario.context);
        Ok(ctx)
    }
}

impl fmt::Debug for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Specification")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("scenarios", &self.scenarios)
            .field("source", &self.source)
            .field("has_setup", &self.setup.is_some())
            .finish()
    }
}
