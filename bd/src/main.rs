//! BotDaemon - Concurrent QR-login bot session orchestrator
//!
//! CLI entry point for running sessions and managing accounts.

use std::fs;
use std::path::{Path, PathBuf};

use botstore::AccountRecord;
use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use botdaemon::cli::{AccountsCommand, Cli, Command};
use botdaemon::config::Config;
use botdaemon::events::{BotEvent, Topic, read_account_events, spawn_event_logger};
use botdaemon::qr;
use botdaemon::store::{AccountStore, FileAccountStore};
use botdaemon::{AccountId, LogLevel, Orchestrator, SessionStatus};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("botdaemon")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("botdaemon.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;
    info!("BotDaemon loaded config: accounts={}", config.storage.accounts_file.display());

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Run) | None => {
            debug!("main: matched Run command");
            cmd_run(&config).await
        }
        Some(Command::Login { id, start }) => {
            debug!(%id, start, "main: matched Login command");
            cmd_login(&config, AccountId::from(id), start).await
        }
        Some(Command::Accounts { command }) => {
            debug!("main: matched Accounts command");
            let store = FileAccountStore::open(&config.storage.accounts_file)?;
            match command {
                AccountsCommand::List => {
                    debug!("main: matched AccountsCommand::List");
                    cmd_accounts_list(&store).await
                }
                AccountsCommand::Add {
                    id,
                    name,
                    platform,
                    auto_start,
                    game_config,
                } => {
                    debug!(%id, "main: matched AccountsCommand::Add");
                    let name = name.unwrap_or_else(|| id.clone());
                    let mut record = AccountRecord::new(id, name)
                        .with_platform(platform)
                        .with_auto_start(auto_start);
                    if let Some(json) = game_config {
                        let config = serde_json::from_str(&json).context("--game-config is not valid JSON")?;
                        record = record.with_config(config);
                    }
                    cmd_accounts_add(&store, record).await
                }
                AccountsCommand::Remove { id } => {
                    debug!(%id, "main: matched AccountsCommand::Remove");
                    cmd_accounts_remove(&store, AccountId::from(id)).await
                }
                AccountsCommand::AutoStart { id, disable } => {
                    debug!(%id, disable, "main: matched AccountsCommand::AutoStart");
                    cmd_accounts_auto_start(&store, AccountId::from(id), !disable).await
                }
            }
        }
        Some(Command::Logs { id, lines }) => {
            debug!(%id, lines, "main: matched Logs command");
            cmd_logs(&config.storage.runs_dir, AccountId::from(id), lines)
        }
        Some(Command::Qr { payload, out }) => {
            debug!(?out, "main: matched Qr command");
            cmd_qr(&payload, out.as_deref())
        }
    }
}

/// Resolve on Ctrl+C or SIGTERM
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                warn!("SIGINT received");
            }
            _ = sigterm.recv() => {
                warn!("SIGTERM received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        warn!("Ctrl+C received");
    }

    Ok(())
}

fn colored_status(status: SessionStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        SessionStatus::Running => text.green(),
        SessionStatus::LoggingIn => text.cyan(),
        SessionStatus::Stopping | SessionStatus::Stopped => text.yellow(),
        SessionStatus::Error => text.red(),
        SessionStatus::Idle => text.dimmed(),
    }
}

/// Run every account until Ctrl+C / SIGTERM
async fn cmd_run(config: &Config) -> Result<()> {
    debug!("cmd_run: called");
    let orchestrator = Orchestrator::builder(config).build()?;
    let logger_cancel = CancellationToken::new();
    let logger = spawn_event_logger(orchestrator.hub().clone(), &config.storage.runs_dir, logger_cancel.clone())?;

    let count = orchestrator.load_accounts().await?;
    println!("Loaded {} accounts", count.to_string().cyan());

    let report = orchestrator.auto_start_bots().await?;
    for id in &report.started {
        println!("{} Started {}", "✓".green(), id.as_str().cyan());
    }
    for (id, e) in &report.failed {
        println!("{} Failed to start {}: {}", "✗".red(), id.as_str().cyan(), e);
    }

    for summary in orchestrator.list_accounts() {
        println!("  {:<16} {:<24} {}", summary.id, summary.name, colored_status(summary.status));
    }
    println!("Running. Press Ctrl+C to stop.");

    wait_for_shutdown_signal().await?;

    info!("Shutting down...");
    let stopped = orchestrator.shutdown().await;
    logger_cancel.cancel();
    let _ = logger.await;
    println!("{} Stopped {} sessions", "✓".green(), stopped);
    Ok(())
}

/// Log one account in via a terminal QR code
async fn cmd_login(config: &Config, id: AccountId, start: bool) -> Result<()> {
    debug!(%id, start, "cmd_login: called");
    let orchestrator = Orchestrator::builder(config).build()?;
    let logger_cancel = CancellationToken::new();
    let logger = spawn_event_logger(orchestrator.hub().clone(), &config.storage.runs_dir, logger_cancel.clone())?;

    let record = orchestrator
        .store()
        .get_account(&id)
        .await?
        .ok_or_else(|| eyre!("Unknown account {}; add it with `bd accounts add {}`", id, id))?;
    orchestrator.add_account(record).await?;

    let mut events = orchestrator.subscribe("cli", Topic::account(id.clone()));
    orchestrator.start_login(&id).await?;

    let mut succeeded = false;
    let mut failure = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(BotEvent::QrReady { qr_payload, .. }) => {
                    match qr::render_terminal(&qr_payload) {
                        Ok(text) => println!("{}", text),
                        Err(e) => warn!(error = %e, "cmd_login: could not render QR"),
                    }
                    println!("Scan with QQ to log in: {}", qr_payload.cyan());
                }
                Some(BotEvent::QrScanned { .. }) => println!("{} Scanned, logging in...", "•".cyan()),
                Some(BotEvent::QrSuccess { .. }) => {
                    println!("{} Logged in {}", "✓".green(), id.as_str().cyan());
                    succeeded = true;
                    break;
                }
                Some(event @ BotEvent::QrExpired { .. }) => {
                    println!("{} QR code expired", "✗".red());
                    failure = event.login_error();
                    break;
                }
                Some(event @ BotEvent::QrError { .. }) => {
                    if let BotEvent::QrError { reason, .. } = &event {
                        println!("{} Login failed: {}", "✗".red(), reason);
                    }
                    failure = event.login_error();
                    break;
                }
                Some(BotEvent::QrCancelled { .. }) => {
                    println!("{} Login cancelled", "✗".yellow());
                    break;
                }
                Some(BotEvent::Log(entry)) if entry.level >= LogLevel::Warn => {
                    println!("{} {}", "!".yellow(), entry.message.dimmed());
                }
                Some(_) => {}
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                result?;
                debug!("cmd_login: ctrl_c received, cancelling login");
                orchestrator.cancel_login(&id).await?;
            }
        }
    }

    if succeeded && start {
        orchestrator.start_bot(&id).await?;
        println!("Bot running. Press Ctrl+C to stop.");
        wait_for_shutdown_signal().await?;
    }

    orchestrator.shutdown().await;
    logger_cancel.cancel();
    let _ = logger.await;

    if succeeded {
        Ok(())
    } else if let Some(e) = failure {
        Err(e).context(format!("Login for account {} did not succeed", id))
    } else {
        Err(eyre!("Login for account {} did not succeed", id))
    }
}

async fn cmd_accounts_list(store: &FileAccountStore) -> Result<()> {
    debug!("cmd_accounts_list: called");
    let accounts = store.load_accounts().await?;
    if accounts.is_empty() {
        println!("No accounts. Add one with `bd accounts add <id>`.");
        return Ok(());
    }
    for account in accounts {
        let auth = if account.has_auth_code() {
            "logged in".green()
        } else {
            "no auth code".yellow()
        };
        let auto = if account.auto_start {
            "auto-start".cyan()
        } else {
            "manual".dimmed()
        };
        println!("{:<16} {:<24} {:<8} {:<14} {}", account.id, account.name, account.platform, auth, auto);
    }
    Ok(())
}

async fn cmd_accounts_add(store: &FileAccountStore, record: AccountRecord) -> Result<()> {
    debug!(id = %record.id, "cmd_accounts_add: called");
    let id = record.id.clone();
    store.upsert_account(record).await?;
    println!("{} Saved account {}", "✓".green(), id.cyan());
    Ok(())
}

async fn cmd_accounts_remove(store: &FileAccountStore, id: AccountId) -> Result<()> {
    debug!(%id, "cmd_accounts_remove: called");
    if store.delete_account(&id).await? {
        println!("{} Removed account {}", "✓".green(), id.as_str().cyan());
        Ok(())
    } else {
        Err(eyre!("Account not found: {}", id))
    }
}

async fn cmd_accounts_auto_start(store: &FileAccountStore, id: AccountId, enabled: bool) -> Result<()> {
    debug!(%id, enabled, "cmd_accounts_auto_start: called");
    store.set_auto_start(&id, enabled).await?;
    let state = if enabled { "enabled".green() } else { "disabled".yellow() };
    println!("{} Auto-start {} for {}", "✓".green(), state, id.as_str().cyan());
    Ok(())
}

fn cmd_logs(runs_dir: &Path, id: AccountId, lines: usize) -> Result<()> {
    debug!(%id, lines, "cmd_logs: called");
    let entries = read_account_events(runs_dir, &id)?;
    if entries.is_empty() {
        println!("No events recorded for account {}", id);
        return Ok(());
    }

    let start = entries.len().saturating_sub(lines);
    for entry in &entries[start..] {
        let time = entry.timestamp.format("%Y-%m-%d %H:%M:%S");
        match &entry.event {
            BotEvent::Log(log) => {
                println!("{} {:<5} {}", time.to_string().dimmed(), log.level, log.message)
            }
            event => {
                let detail = serde_json::to_string(event)?;
                println!("{} {} {}", time.to_string().dimmed(), event.event_name().cyan(), detail.dimmed());
            }
        }
    }
    Ok(())
}

fn cmd_qr(payload: &str, out: Option<&Path>) -> Result<()> {
    debug!(?out, "cmd_qr: called");
    match out {
        Some(path) => {
            let svg = qr::render_svg(payload)?;
            fs::write(path, svg).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} Wrote {}", "✓".green(), path.display());
        }
        None => println!("{}", qr::render_terminal(payload)?),
    }
    Ok(())
}
