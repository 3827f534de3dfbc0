//! The human at the terminal during manual mode

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::common::Result;

/// Source of operator input and sink for shell output
#[async_trait]
pub trait Operator: Send {
    /// Show `prompt` and read one line; `None` once input is closed
    async fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;

    fn print(&mut self, text: &str);
}

/// Operator on the process's stdin and stdout
///
/// One line reader is kept for the whole run so input typed ahead of a
/// prompt is not lost between steps.
pub struct ConsoleOperator {
    lines: Lines<BufReader<Stdin>>,
}

impl ConsoleOperator {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for ConsoleOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        print!("{prompt}");
        std::io::stdout().flush()?;
        Ok(self.lines.next_line().await?)
    }

    fn print(&mut self, text: &str) {
        println!("{text}");
    }
}

/// Operator that replays fixed input and records everything shown
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    inputs: VecDeque<String>,
    pub transcript: Vec<String>,
    pub prompts: usize,
}

impl ScriptedOperator {
    pub fn new<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Everything printed so far, one entry per line
    pub fn output(&self) -> String {
        self.transcript.join("\n")
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        self.prompts += 1;
        self.transcript.push(prompt.trim_end().to_string());
        Ok(self.inputs.pop_front())
    }

    fn print(&mut self, text: &str) {
        self.transcript.extend(text.lines().map(String::from));
    }
}
