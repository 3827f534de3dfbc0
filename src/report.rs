//! Progress reporting for specifications, scenarios and steps

use colored::Colorize;

use crate::common::Error;
use crate::spec::{SpecOptions, StepKind};

/// Receives run progress in execution order
pub trait Reporter: Send {
    fn start_spec(&mut self, name: &str, options: &SpecOptions);
    fn spec_passed(&mut self, name: &str);
    fn spec_failed(&mut self, name: &str, summary: &str);
    fn start_scenario(&mut self, name: &str);
    fn scenario_passed(&mut self, name: &str);
    fn scenario_failed(&mut self, name: &str, error: &Error);
    fn step(&mut self, kind: StepKind, description: &str);
}

/// Colored terminal output
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Reporter for ConsoleReporter {
    fn start_spec(&mut self, name: &str, options: &SpecOptions) {
        println!("\n{} {}", "Specification:".blue().bold(), name.white().bold());
        if let Some(desc) = &options.description {
            println!("  {}", desc.dimmed());
        }
        if self.verbose && !options.tags.is_empty() {
            let tags: Vec<&str> = options.tags.iter().map(String::as_str).collect();
            println!("  {} {}", "Tags:".dimmed(), tags.join(", ").dimmed());
        }
    }

    fn spec_passed(&mut self, name: &str) {
        println!("{} {}", "✓".green().bold(), name.green().bold());
    }

    fn spec_failed(&mut self, name: &str, summary: &str) {
        println!("{} {} {}", "✗".red().bold(), name.red().bold(), summary.dimmed());
    }

    fn start_scenario(&mut self, name: &str) {
        println!("\n  {} {}", "Scenario:".cyan(), name);
    }

    fn scenario_passed(&mut self, _name: &str) {
        println!("  {} {}", "✓".green(), "passed".green());
    }

    fn scenario_failed(&mut self, _name: &str, error: &Error) {
        let message = error.to_string();
        let mut lines = message.lines();
        if let Some(first) = lines.next() {
            println!("  {} {}", "✗".red(), first.red());
        }
        for line in lines {
            println!("      {}", line);
        }
    }

    fn step(&mut self, kind: StepKind, description: &str) {
        println!("    {} {}", kind.to_string().dimmed(), description);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records every event as a line of text
    #[derive(Debug, Default)]
    pub struct RecordingReporter {
        pub events: Vec<String>,
    }

    impl Reporter for RecordingReporter {
        fn start_spec(&mut self, name: &str, _options: &SpecOptions) {
            self.events.push(format!("spec {name}"));
        }
        fn spec_passed(&mut self, name: &str) {
            self.events.push(format!("spec passed {name}"));
        }
        fn spec_failed(&mut self, name: &str, summary: &str) {
            self.events.push(format!("spec failed {name}: {summary}"));
        }
        fn start_scenario(&mut self, name: &str) {
            self.events.push(format!("scenario {name}"));
        }
        fn scenario_passed(&mut self, name: &str) {
            self.events.push(format!("scenario passed {name}"));
        }
        fn scenario_failed(&mut self, name: &str, error: &Error) {
            self.events.push(format!("scenario failed {name}: {error}"));
        }
        fn step(&mut self, kind: StepKind, description: &str) {
            self.events.push(format!("step {kind} {description}"));
        }
    }
}
