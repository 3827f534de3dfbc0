//! Debug shell opened from a manual-mode pause
//!
//! The shell only offers a fixed command set against the subject's
//! capabilities and the current context. Failures of a command are printed
//! and the shell keeps going; nothing typed here can fail the scenario.

use crate::common::{Error, Result};
use crate::spec::ExecutionContext;
use crate::subject::SubjectControl;

use super::operator::Operator;
use super::{catch_panic, StepSite};

const PROMPT: &str = "shell> ";
const DEFAULT_OUTPUT_LINES: usize = 20;

const HELP: &str = "\
Commands:
  help                 Show this help
  status               Current step and subject status
  context              Print the execution context
  inspect [QUERY]      Inspect subject state (status, pid, port, host, running, output)
  screenshot [NAME]    Capture an artifact
  send TEXT            Send a line of input to the subject
  output [N]           Show the last N output lines (default 20)
  exit                 Return to the step prompt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Help,
    Status,
    Context,
    Inspect(String),
    Screenshot(Option<String>),
    Send(String),
    Output(usize),
    Exit,
}

impl ShellCommand {
    /// Parse one input line; `Ok(None)` for a blank line
    pub fn parse(line: &str) -> std::result::Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word {
            "help" | "?" => ShellCommand::Help,
            "status" => ShellCommand::Status,
            "context" | "ctx" => ShellCommand::Context,
            "inspect" => ShellCommand::Inspect(rest.to_string()),
            "screenshot" => ShellCommand::Screenshot((!rest.is_empty()).then(|| rest.to_string())),
            "send" if rest.is_empty() => return Err("Usage: send TEXT".to_string()),
            "send" => ShellCommand::Send(rest.to_string()),
            "output" if rest.is_empty() => ShellCommand::Output(DEFAULT_OUTPUT_LINES),
            "output" => ShellCommand::Output(
                rest.parse()
                    .map_err(|_| format!("Invalid line count '{rest}'"))?,
            ),
            "exit" | "continue" => ShellCommand::Exit,
            other => return Err(format!("Unknown command '{other}'. Type 'help' for commands.")),
        };
        Ok(Some(command))
    }
}

/// Run the shell until the operator exits
///
/// Returns [`Error::OperatorQuit`] if input closes while the shell is open.
pub async fn run(
    operator: &mut dyn Operator,
    subject: &mut dyn SubjectControl,
    ctx: &ExecutionContext,
    site: &StepSite<'_>,
) -> Result<()> {
    operator.print("Debug shell. Type 'help' for commands, 'exit' to return.");

    loop {
        let Some(line) = operator.read_line(PROMPT).await? else {
            return Err(Error::OperatorQuit);
        };

        let command = match ShellCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                operator.print(&message);
                continue;
            }
        };

        if command == ShellCommand::Exit {
            return Ok(());
        }

        match catch_panic(|| evaluate(&command, subject, ctx, site)) {
            Ok(text) => operator.print(&text),
            Err(e) => operator.print(&format!("Error: {e}")),
        }
    }
}

fn evaluate(
    command: &ShellCommand,
    subject: &mut dyn SubjectControl,
    ctx: &ExecutionContext,
    site: &StepSite<'_>,
) -> Result<String> {
    match command {
        ShellCommand::Help => Ok(HELP.to_string()),
        ShellCommand::Status => {
            let mut text = site.to_string();
            match subject.status() {
                Ok(status) => {
                    text.push_str(&format!(
                        "\nSubject: {}:{} pid={} running={}",
                        status.host,
                        status.port,
                        status.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                        status.running.map(|r| r.to_string()).unwrap_or_else(|| "unknown".into()),
                    ));
                }
                Err(e) => text.push_str(&format!("\nSubject: {e}")),
            }
            Ok(text)
        }
        ShellCommand::Context => {
            if ctx.is_empty() {
                Ok("(empty context)".to_string())
            } else {
                Ok(serde_json::to_string_pretty(ctx)?)
            }
        }
        ShellCommand::Inspect(query) => Ok(serde_json::to_string_pretty(&subject.inspect(query)?)?),
        ShellCommand::Screenshot(name) => {
            let artifact = subject.capture(name.as_deref().unwrap_or("shell"))?;
            Ok(format!("Saved {}", artifact.path.display()))
        }
        ShellCommand::Send(text) => {
            subject.send_input(text)?;
            Ok(format!("Sent: {text}"))
        }
        ShellCommand::Output(count) => {
            let lines = subject.output(Some(*count))?;
            if lines.is_empty() {
                Ok("(no output)".to_string())
            } else {
                Ok(lines.join("\n"))
            }
        }
        ShellCommand::Exit => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::operator::ScriptedOperator;
    use crate::spec::StepKind;
    use crate::subject::Unavailable;

    fn site() -> StepSite<'static> {
        StepSite {
            spec: "checkout",
            scenario: "pays by card",
            index: 1,
            total: 3,
            kind: StepKind::When,
            description: "the user pays",
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ShellCommand::parse("help"), Ok(Some(ShellCommand::Help)));
        assert_eq!(ShellCommand::parse("   "), Ok(None));
        assert_eq!(
            ShellCommand::parse("send hello world"),
            Ok(Some(ShellCommand::Send("hello world".into())))
        );
        assert_eq!(ShellCommand::parse("output"), Ok(Some(ShellCommand::Output(20))));
        assert_eq!(ShellCommand::parse("output 5"), Ok(Some(ShellCommand::Output(5))));
        assert_eq!(ShellCommand::parse("screenshot"), Ok(Some(ShellCommand::Screenshot(None))));
        assert!(ShellCommand::parse("output lots").is_err());
        assert!(ShellCommand::parse("send").is_err());
        assert!(ShellCommand::parse("rm -rf /").unwrap_err().contains("Unknown command 'rm'"));
    }

    #[tokio::test]
    async fn test_errors_are_printed_not_propagated() {
        let mut operator = ScriptedOperator::new(["inspect pid", "bogus", "context", "exit"]);
        let ctx = ExecutionContext::new().with("user", "alice");

        run(&mut operator, &mut Unavailable, &ctx, &site()).await.unwrap();

        let out = operator.output();
        assert!(out.contains("Error: Capability 'inspect' failed"));
        assert!(out.contains("Unknown command 'bogus'"));
        assert!(out.contains("\"user\": \"alice\""));
    }

    #[tokio::test]
    async fn test_status_shows_current_step() {
        let mut operator = ScriptedOperator::new(["status", "exit"]);
        run(&mut operator, &mut Unavailable, &ExecutionContext::new(), &site())
            .await
            .unwrap();
        let out = operator.output();
        assert!(out.contains("checkout > pays by card"));
        assert!(out.contains("step 2/3: When the user pays"));
    }

    #[tokio::test]
    async fn test_closed_input_quits() {
        let mut operator = ScriptedOperator::new(["help"]);
        let err = run(&mut operator, &mut Unavailable, &ExecutionContext::new(), &site())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OperatorQuit));
    }
}
