//! specrun - run behavior specifications against a live subject
//!
//! Starts the subject-under-test, waits until it accepts connections, runs
//! Given/When/Then specifications against it and tears it down again.

use clap::Parser;
use specrun::{cli, commands::Commands};

#[derive(Parser)]
#[command(name = "specrun", about = "Run behavior specifications against a live subject")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    match cli::dispatch(cli.command).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
