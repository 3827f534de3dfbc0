//! CLI command handling
//!
//! Turns parsed commands into a configured run and formats the summary.

use colored::Colorize;
use std::path::Path;

use crate::commands::Commands;
use crate::common::config::{Config, ExecutionConfig, RunOverrides, SubjectConfig};
use crate::common::error::EXIT_FAILURES;
use crate::common::{logging, Error, Result};
use crate::engine::operator::ConsoleOperator;
use crate::orchestrator::{Orchestrator, RunOutcome, SpecSource, TagFilter};
use crate::report::ConsoleReporter;
use crate::subject::{ProbePolicy, ProcessSubject};

/// Dispatch a CLI command, returning the process exit code
pub async fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::Run {
            files,
            pattern,
            verbose,
            timeout,
            speed,
            manual,
            watch,
            port,
            only_filtered,
            tags,
            exclude_tags,
            config,
            subject,
            output,
        } => {
            let mut config = Config::load(config.as_deref())?;
            logging::init_cli(verbose, config.output.log_file.as_deref());

            if let Some(command) = subject {
                config.subject = shell_subject(command, config.subject);
            }

            let overrides = RunOverrides {
                speed,
                manual,
                timeout_ms: timeout,
                port,
                watch,
            };
            let execution = ExecutionConfig::resolve(&config.run, &overrides);
            tracing::debug!("Execution settings: {:?}", execution);

            let filter = TagFilter {
                include: tags.into_iter().collect(),
                exclude: exclude_tags.into_iter().collect(),
                scenarios: only_filtered,
            };
            let source = SpecSource::Paths {
                paths: files,
                dir: config.run.spec_dir.clone(),
                pattern: pattern.unwrap_or_else(|| config.run.pattern.clone()),
            };

            let mut lifecycle = ProcessSubject::new(config.subject.clone(), execution.port, &config.output);
            let mut reporter = ConsoleReporter::new(verbose);
            let mut operator = ConsoleOperator::new();
            let mut orchestrator = Orchestrator::new(
                execution,
                config.subject.host.clone(),
                ProbePolicy::from(&config.readiness),
            )
            .with_filter(filter);

            let outcome = orchestrator
                .run(source, &mut lifecycle, &mut reporter, &mut operator)
                .await?;

            print_summary(&outcome);

            if let Some(path) = output.or(config.output.results_path) {
                write_results(&path, &outcome)?;
            }

            Ok(if outcome.success() { 0 } else { EXIT_FAILURES })
        }

        Commands::List {
            files,
            pattern,
            config,
        } => {
            let config = Config::load(config.as_deref())?;
            logging::init_cli(false, None);

            let specs = SpecSource::Paths {
                paths: files,
                dir: config.run.spec_dir,
                pattern: pattern.unwrap_or(config.run.pattern),
            }
            .load()?;

            if specs.is_empty() {
                println!("No specifications found");
            }
            for spec in &specs {
                let tags = format_tags(spec.options.tags.iter());
                println!("{}{}", spec.name.white().bold(), tags.dimmed());
                if let Some(source) = &spec.source {
                    println!("  {}", source.display().to_string().dimmed());
                }
                for scenario in &spec.scenarios {
                    println!(
                        "  - {} ({} steps){}",
                        scenario.name,
                        scenario.steps.len(),
                        format_tags(scenario.tags.iter()).dimmed()
                    );
                }
            }
            Ok(0)
        }
    }
}

/// Run `command` through `sh -c`, keeping the rest of the subject settings
fn shell_subject(command: String, base: SubjectConfig) -> SubjectConfig {
    SubjectConfig {
        command: Some("sh".to_string()),
        args: vec!["-c".to_string(), command],
        ..base
    }
}

fn format_tags<'a>(tags: impl Iterator<Item = &'a String>) -> String {
    let tags: Vec<&str> = tags.map(String::as_str).collect();
    if tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", tags.join(", "))
    }
}

fn print_summary(outcome: &RunOutcome) {
    println!();
    if !outcome.failures.is_empty() {
        println!("{}", "Failures:".red().bold());
        for (i, failure) in outcome.failures.iter().enumerate() {
            println!(
                "  {}) {} > {}",
                i + 1,
                failure.specification.white().bold(),
                failure.scenario
            );
            for line in failure.error.lines() {
                println!("     {}", line.red());
            }
        }
        println!();
    }

    let counts = format!(
        "{} specifications, {} scenarios passed, {} failed ({:.2}s)",
        outcome.specifications_run,
        outcome.scenarios_passed,
        outcome.scenarios_failed,
        outcome.duration_ms as f64 / 1000.0
    );
    if outcome.success() {
        println!("{} {}", "✓".green().bold(), counts.green().bold());
    } else {
        println!("{} {}", "✗".red().bold(), counts.red().bold());
    }
}

fn write_results(path: &Path, outcome: &RunOutcome) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(outcome)?;
    std::fs::write(path, json).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    tracing::info!("Wrote results to {}", path.display());
    Ok(())
}
