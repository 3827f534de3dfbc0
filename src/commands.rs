//! CLI command definitions
//!
//! Defines the clap commands for the specrun CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::common::config::Speed;

#[derive(Subcommand)]
pub enum Commands {
    /// Start the subject and run specifications against it
    Run {
        /// Specification files or directories (default: the configured spec_dir)
        files: Vec<PathBuf>,

        /// Glob used when searching directories
        #[arg(long)]
        pattern: Option<String>,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,

        /// Overall timeout for running specifications, in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Step pacing
        #[arg(long, value_enum)]
        speed: Option<Speed>,

        /// Pause before every step (same as --speed manual)
        #[arg(long)]
        manual: bool,

        /// Keep the subject running after a successful run
        #[arg(long)]
        watch: bool,

        /// Port the subject listens on
        #[arg(long)]
        port: Option<u16>,

        /// Apply tag filters to individual scenarios instead of specifications
        #[arg(long)]
        only_filtered: bool,

        /// Only run items carrying this tag (repeatable)
        #[arg(long = "tag", short = 't')]
        tags: Vec<String>,

        /// Skip items carrying this tag (repeatable)
        #[arg(long = "exclude-tag")]
        exclude_tags: Vec<String>,

        /// Configuration file (default: ./specrun.toml, then the user config)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Shell command that starts the subject, overriding the config file
        #[arg(long)]
        subject: Option<String>,

        /// Write the run outcome as JSON to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List specifications and scenarios without running them
    List {
        /// Specification files or directories (default: the configured spec_dir)
        files: Vec<PathBuf>,

        /// Glob used when searching directories
        #[arg(long)]
        pattern: Option<String>,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}
