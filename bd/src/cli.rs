//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

/// BotDaemon - Concurrent QR-login bot session orchestrator
#[derive(Parser)]
#[command(
    name = "bd",
    about = "Run and manage QR-login game bot sessions",
    version,
    after_help = after_help()
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load every account, auto-start flagged ones and run until Ctrl+C
    Run,

    /// Log an account in by scanning a QR code in the terminal
    Login {
        /// Account id
        id: String,

        /// Start the bot once the login succeeds
        #[arg(short, long)]
        start: bool,
    },

    /// Manage persisted accounts
    Accounts {
        #[command(subcommand)]
        command: AccountsCommand,
    },

    /// Show an account's persisted event log
    Logs {
        /// Account id
        id: String,

        /// Number of events to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },

    /// Render a QR payload
    Qr {
        /// Text to encode
        payload: String,

        /// Write an SVG file instead of printing to the terminal
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

/// Account management subcommands
#[derive(Debug, Subcommand)]
pub enum AccountsCommand {
    /// List accounts
    List,

    /// Add or replace an account
    Add {
        /// Account id
        id: String,

        /// Display name (defaults to the id)
        #[arg(short, long)]
        name: Option<String>,

        /// Platform tag
        #[arg(short, long, default_value = "qq")]
        platform: String,

        /// Start this account with `bd run`
        #[arg(short, long)]
        auto_start: bool,

        /// Game configuration as JSON
        #[arg(long = "game-config", value_name = "JSON")]
        game_config: Option<String>,
    },

    /// Remove an account
    Remove {
        /// Account id
        id: String,
    },

    /// Enable (or disable) auto-start
    AutoStart {
        /// Account id
        id: String,

        /// Disable instead of enable
        #[arg(short, long)]
        disable: bool,
    },
}

/// Path of the tracing log file
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("botdaemon")
        .join("logs")
        .join("botdaemon.log");
    debug!(?path, "get_log_path: returning path");
    path
}

fn after_help() -> String {
    format!("Logs are written to: {}", get_log_path().display())
}
