//! StoryDaemon - story scheduling and session persistence
//!
//! CLI entry point: recover the previous session, then own the database
//! writer until interrupted.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use serde_json::json;
use tracing::{debug, info};

use storydaemon::cli::{Cli, Command, OutputFormat, get_log_path};
use storydaemon::config::Config;
use storydaemon::persistence::{Bootstrap, RequestProcessor, bootstrap};
use storystore::{SessionStatus, Store};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
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

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

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

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(db) = cli.db.clone() {
        config.storage.db_path = db;
    }

    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;
    info!(db = %config.storage.db_path.display(), "StoryDaemon loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => cmd_run(&config).await,
        Command::Migrate => cmd_migrate(&config),
        Command::Status { limit, format } => cmd_status(&config, limit, format),
    }
}

async fn cmd_run(config: &Config) -> Result<()> {
    debug!("cmd_run: called");
    let store = Store::open_with(&config.storage.db_path, &config.storage.store_options())
        .with_context(|| format!("Failed to open {}", config.storage.db_path.display()))?;

    let Bootstrap {
        store,
        session,
        queue,
        agents,
        stats,
    } = bootstrap(store, config).context("Startup recovery failed")?;
    info!("Recovery complete: {}", stats);

    if stats.resumed {
        println!(
            "{} session {} ({} incomplete, {} done, {} reset)",
            "Resumed".green().bold(),
            session.session_id.cyan(),
            stats.incomplete_stories,
            stats.done_stories,
            stats.reset_stories
        );
    } else {
        println!("{} session {}", "Started".green().bold(), session.session_id.cyan());
    }
    println!(
        "  {} ready, {} queued, {} coder checkpoints, {} unanswered requests",
        queue.ready().len(),
        queue.len(),
        agents.coders.len(),
        agents.unanswered_requests.len()
    );

    let (handle, join) = RequestProcessor::spawn(
        store,
        session.session_id.clone(),
        queue,
        config.requests.channel_capacity,
        config.requests.query_timeout(),
    );

    println!("Serving requests; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Interrupt received, ending session");

    let status = handle.finish().await.context("Failed to end session")?;
    join.await.context("Request processor task failed")?;
    println!("Session {} ended: {}", session.session_id.cyan(), status);
    Ok(())
}

fn cmd_migrate(config: &Config) -> Result<()> {
    debug!("cmd_migrate: called");
    let mut store = Store::open_with(&config.storage.db_path, &config.storage.store_options())
        .with_context(|| format!("Failed to open {}", config.storage.db_path.display()))?;
    let version = store.ensure_schema().context("Failed to migrate schema")?;
    println!("Schema version {} at {}", version, config.storage.db_path.display());
    Ok(())
}

fn cmd_status(config: &Config, limit: usize, format: OutputFormat) -> Result<()> {
    debug!(limit, %format, "cmd_status: called");
    let path: &PathBuf = &config.storage.db_path;
    if !path.exists() {
        println!("No database at {}", path.display());
        return Ok(());
    }
    let store = Store::open_read_only(path, &config.storage.store_options())
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut rows = Vec::new();
    for session in store.list_sessions()?.into_iter().take(limit) {
        let (incomplete, done) = store.story_progress(&session.session_id)?;
        rows.push((session, incomplete, done));
    }

    match format {
        OutputFormat::Json => {
            let out: Vec<_> = rows
                .iter()
                .map(|(session, incomplete, done)| {
                    json!({
                        "session_id": session.session_id,
                        "status": session.status,
                        "started_at": session.started_at,
                        "ended_at": session.ended_at,
                        "incomplete_stories": incomplete,
                        "done_stories": done,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No sessions");
            }
            for (session, incomplete, done) in &rows {
                let status = match session.status {
                    SessionStatus::Active => session.status.as_str().green(),
                    SessionStatus::Crashed => session.status.as_str().red(),
                    SessionStatus::Shutdown => session.status.as_str().yellow(),
                    SessionStatus::Completed => session.status.as_str().normal(),
                };
                println!(
                    "{}  {:<10} started {}  {} incomplete, {} done",
                    session.session_id.cyan(),
                    status,
                    format_ms(session.started_at),
                    incomplete,
                    done
                );
            }
        }
    }
    Ok(())
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}
