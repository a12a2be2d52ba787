//! storystore - read-only inspection of a story database
//!
//! Opens the database with a read-only handle, so it is safe to run while a
//! daemon holds the writer.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Context, Result};

use storystore::{SessionStatus, Store, StoreOptions, StoryFilter, StoryStatus};

#[derive(Parser)]
#[command(name = "storystore", about = "Inspect a story database", version)]
struct Cli {
    /// Path to the database file
    #[arg(short, long, global = true, default_value = "stories.db")]
    db: PathBuf,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List sessions, newest first
    Sessions,

    /// List stories of a session
    Stories {
        /// Session id
        session: String,

        /// Only stories ready to dispatch
        #[arg(long)]
        pending: bool,

        /// Only stories with this status (repeatable)
        #[arg(short, long)]
        status: Vec<StoryStatus>,
    },

    /// Show agent checkpoints of a session
    State {
        /// Session id
        session: String,
    },

    /// Show the schema version
    Version,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let store = Store::open_read_only(&cli.db, &StoreOptions::default())
        .with_context(|| format!("Failed to open {}", cli.db.display()))?;

    match cli.command {
        Command::Sessions => cmd_sessions(&store, cli.json),
        Command::Stories {
            session,
            pending,
            status,
        } => cmd_stories(&store, &session, pending, status, cli.json),
        Command::State { session } => cmd_state(&store, &session, cli.json),
        Command::Version => {
            println!("{}", store.schema_version()?);
            Ok(())
        }
    }
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn cmd_sessions(store: &Store, json: bool) -> Result<()> {
    let sessions = store.list_sessions()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }
    for session in sessions {
        let status = match session.status {
            SessionStatus::Active => session.status.as_str().green(),
            SessionStatus::Crashed => session.status.as_str().red(),
            SessionStatus::Shutdown => session.status.as_str().yellow(),
            SessionStatus::Completed => session.status.as_str().normal(),
        };
        let (incomplete, done) = store.story_progress(&session.session_id)?;
        println!(
            "{}  {:<10} started {}  {} incomplete, {} done",
            session.session_id.bold(),
            status,
            format_ms(session.started_at),
            incomplete,
            done
        );
    }
    Ok(())
}

fn cmd_stories(store: &Store, session_id: &str, pending: bool, statuses: Vec<StoryStatus>, json: bool) -> Result<()> {
    let stories = if pending {
        store.query_pending_stories(session_id)?
    } else {
        let mut filter = StoryFilter::new();
        filter.statuses = statuses;
        store.query_stories(session_id, &filter)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stories)?);
        return Ok(());
    }
    if stories.is_empty() {
        println!("No stories");
        return Ok(());
    }
    for story in stories {
        let status = if story.status.is_terminal() {
            story.status.as_str().dimmed()
        } else if story.status.is_in_flight() {
            story.status.as_str().cyan()
        } else {
            story.status.as_str().normal()
        };
        let deps = if story.depends_on.is_empty() {
            String::new()
        } else {
            format!("  <- {}", story.depends_on.join(", "))
        };
        println!(
            "{}  {:<11} p{:<3} {}{}",
            story.id.bold(),
            status,
            story.priority,
            story.title,
            deps.dimmed()
        );
    }
    Ok(())
}

fn cmd_state(store: &Store, session_id: &str, json: bool) -> Result<()> {
    let architect = store.get_architect_state(session_id)?;
    let pm = store.get_pm_state(session_id)?;
    let coders = store.list_coder_states(session_id)?;

    if json {
        let value = serde_json::json!({
            "architect": architect,
            "pm": pm,
            "coders": coders,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match architect {
        Some(state) => println!("architect  {}", state.state),
        None => println!("architect  {}", "(none)".dimmed()),
    }
    match pm {
        Some(state) => println!("pm         {}", state.state),
        None => println!("pm         {}", "(none)".dimmed()),
    }
    for coder in coders {
        println!(
            "{:<10} {} {}",
            coder.agent_id,
            coder.state,
            coder.story_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
