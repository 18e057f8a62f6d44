//! CLI module graph.

pub mod check;
pub mod command;
pub mod run;

pub use command::{CheckArgs, Cli, Commands, RunArgs};

use crate::error::Result;

/// Dispatch a parsed command line.
pub async fn execute(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Run(args) => run::execute(&args).await.map(|()| true),
        Commands::Check(args) => check::execute(&args, cli.json).await,
    }
}
