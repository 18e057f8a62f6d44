//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::SubscriptionKey;

/// Live market-data feed, rate limiter, and cache
#[derive(Parser, Debug)]
#[command(name = "tidewatch")]
#[command(version)]
pub struct Cli {
    /// JSON output for scripting
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the feed and log updates until Ctrl-C
    Run(RunArgs),

    /// Check configuration and shared store reachability
    Check(CheckArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Subscription as `feed` or `feed:SYMBOL`. Repeatable.
    #[arg(short, long = "subscribe", value_name = "KEY")]
    pub subscriptions: Vec<SubscriptionKey>,

    /// Override log level (debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Use JSON log format instead of pretty-printed logs.
    #[arg(long)]
    pub json_logs: bool,

    /// Seconds between connection status log lines (0 disables).
    #[arg(long, default_value_t = 30)]
    pub status_interval: u64,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,
}
