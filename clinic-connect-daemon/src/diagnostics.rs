//! Command line and logging
//!
//! Command-line interface of the Clinic Connect daemon and the tracing
//! subscriber setup it drives.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Clinic Connect daemon command-line interface
#[derive(Parser, Debug)]
#[command(name = "clinic-connect-daemon")]
#[command(about = "Keeps Clinic Connect conversations in sync", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Show timestamps in logs (`--timestamps false` to hide them)
    #[arg(long, value_name = "BOOL", action = ArgAction::Set, default_value_t = true)]
    pub timestamps: bool,

    /// Use this config file instead of the default location
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a conversation and follow it until interrupted
    Watch {
        /// User id of the other participant
        counterpart: String,
    },

    /// Send a message
    Send {
        /// Recipient user id
        counterpart: String,

        /// Message text
        body: String,
    },

    /// List conversations with unread counts
    Inbox {
        /// Print summaries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Mark every message from a user as read
    MarkRead {
        /// User id of the other participant
        counterpart: String,
    },

    /// Show current configuration
    DumpConfig,
}

/// Initialize logging based on CLI configuration
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(true)
        .with_line_number(true);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        "Logging initialized: level={}, json={}, timestamps={}",
        log_level, cli.json_logs, cli.timestamps
    );

    Ok(())
}
