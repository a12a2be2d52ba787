//! RecoveryBootstrap - startup sequence
//!
//! Runs on the Store before it is handed to the RequestProcessor:
//!
//! 1. bring the schema up to date
//! 2. mark leftover `active` sessions as crashed
//! 3. find the most recent resumable session (none: start fresh)
//! 4. reset stories an agent was executing back to `new`
//! 5. reload the incomplete stories into a [`StoryQueue`]
//! 6. reload architect, PM and coder checkpoints
//! 7. mark the resumed session `active`
//!
//! Steps 1-3 are fatal. A failure in 4-7 abandons the resume and starts a
//! fresh session instead of running on half-reconciled state.

use eyre::{Context, Result};
use tracing::{debug, info, warn};

use storystore::{
    AgentRequest, ArchitectState, CoderState, PmState, ResumableSession, Session, SessionStatus, Store, StoreResult,
    StoryFilter, StoryStatus,
};

use crate::config::{Config, ResumePolicy};
use crate::queue::StoryQueue;

/// Recovery statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Schema version after migration
    pub schema_version: u32,
    /// Sessions found `active` at boot
    pub stale_sessions: usize,
    /// Set when an interrupted session was resumed
    pub resumed: bool,
    /// Incomplete stories in the resumed session
    pub incomplete_stories: usize,
    /// Done stories in the resumed session
    pub done_stories: usize,
    /// In-flight stories reset to `new`
    pub reset_stories: usize,
    /// Coder checkpoints restored
    pub restored_coders: usize,
}

impl std::fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "resumed: {}, incomplete: {}, done: {}, reset: {}, coders: {}, stale sessions: {}",
            self.resumed,
            self.incomplete_stories,
            self.done_stories,
            self.reset_stories,
            self.restored_coders,
            self.stale_sessions
        )
    }
}

/// Agent checkpoints restored on resume
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RestoredAgents {
    pub architect: Option<ArchitectState>,
    pub pm: Option<PmState>,
    pub coders: Vec<CoderState>,
    /// Requests still waiting for an answer
    pub unanswered_requests: Vec<AgentRequest>,
}

/// Everything the daemon needs to start dispatching
#[derive(Debug)]
pub struct Bootstrap {
    pub store: Store,
    pub session: Session,
    pub queue: StoryQueue,
    pub agents: RestoredAgents,
    pub stats: RecoveryStats,
}

/// Run the startup sequence
pub fn bootstrap(mut store: Store, config: &Config) -> Result<Bootstrap> {
    debug!("bootstrap: called");
    let mut stats = RecoveryStats {
        schema_version: store.ensure_schema().context("Failed to migrate schema")?,
        ..Default::default()
    };

    stats.stale_sessions = store
        .mark_stale_sessions()
        .context("Failed to mark stale sessions")?;

    let candidate = store
        .get_most_recent_resumable_session()
        .context("Failed to look up resumable session")?;

    let resumable = match (candidate, config.recovery.resume) {
        (Some(resumable), ResumePolicy::Auto) => resumable,
        (Some(resumable), ResumePolicy::Never) => {
            info!(
                session_id = %resumable.session.session_id,
                "Resumable session found but resume is disabled; starting fresh"
            );
            return start_fresh(store, config, stats);
        }
        (None, _) => {
            info!("No resumable session; starting fresh");
            return start_fresh(store, config, stats);
        }
    };

    match resume(&store, &resumable, &config.recovery.coder_ids) {
        Ok((queue, agents, reset)) => {
            stats.resumed = true;
            stats.incomplete_stories = resumable.incomplete_stories;
            stats.done_stories = resumable.done_stories;
            stats.reset_stories = reset;
            stats.restored_coders = agents.coders.len();
            let session = Session {
                status: SessionStatus::Active,
                ended_at: None,
                ..resumable.session
            };
            info!(
                session_id = %session.session_id,
                incomplete = stats.incomplete_stories,
                done = stats.done_stories,
                reset = stats.reset_stories,
                "Resumed session"
            );
            Ok(Bootstrap {
                store,
                session,
                queue,
                agents,
                stats,
            })
        }
        Err(e) => {
            warn!(
                session_id = %resumable.session.session_id,
                error = %e,
                "Resume failed; starting a fresh session"
            );
            start_fresh(store, config, stats)
        }
    }
}

/// Steps 4-7 for one session; returns (queue, agents, reset count)
fn resume(
    store: &Store,
    resumable: &ResumableSession,
    coder_ids: &[String],
) -> StoreResult<(StoryQueue, RestoredAgents, usize)> {
    let session_id = resumable.session.session_id.as_str();
    debug!(%session_id, "resume: called");

    let reset = store.reset_in_flight_stories(session_id)?;

    let incomplete = store.get_incomplete_stories_for_session(session_id)?;
    let failed = store
        .query_stories(session_id, &StoryFilter::new().with_status(StoryStatus::Failed))?
        .into_iter()
        .map(|s| s.id);
    let queue = StoryQueue::new(incomplete, failed);
    queue.warn_on_cycles();

    let agents = restore_agents(store, session_id, coder_ids)?;

    store.set_session_status(session_id, SessionStatus::Active)?;
    Ok((queue, agents, reset))
}

fn restore_agents(store: &Store, session_id: &str, coder_ids: &[String]) -> StoreResult<RestoredAgents> {
    let mut coders = Vec::new();
    for agent_id in coder_ids {
        match store.get_coder_state(session_id, agent_id)? {
            Some(state) => coders.push(state),
            None => debug!(%agent_id, "No checkpoint for configured coder"),
        }
    }
    // Coders that checkpointed under ids no longer configured
    for state in store.list_coder_states(session_id)? {
        if !coder_ids.contains(&state.agent_id) {
            debug!(agent_id = %state.agent_id, "Restoring checkpoint for unconfigured coder");
            coders.push(state);
        }
    }

    Ok(RestoredAgents {
        architect: store.get_architect_state(session_id)?,
        pm: store.get_pm_state(session_id)?,
        coders,
        unanswered_requests: store.get_unanswered_agent_requests(session_id)?,
    })
}

fn start_fresh(store: Store, config: &Config, stats: RecoveryStats) -> Result<Bootstrap> {
    let session = Session::new(config.snapshot_json()?);
    store
        .create_session(&session)
        .context("Failed to create session")?;
    info!(session_id = %session.session_id, "Started new session");
    Ok(Bootstrap {
        store,
        session,
        queue: StoryQueue::default(),
        agents: RestoredAgents::default(),
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use storystore::{Spec, Story};

    fn open() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn test_empty_database_starts_fresh() {
        let boot = bootstrap(open(), &Config::default()).unwrap();
        assert!(!boot.stats.resumed);
        assert_eq!(boot.stats.schema_version, storystore::CURRENT_SCHEMA_VERSION);
        assert_eq!(boot.session.status, SessionStatus::Active);
        assert!(boot.queue.is_empty());

        let stored = boot.store.get_session(&boot.session.session_id).unwrap();
        let snapshot: Config = serde_json::from_str(&stored.config_json).unwrap();
        assert_eq!(snapshot, Config::default());
    }

    #[test]
    fn test_crashed_session_is_resumed() {
        let mut store = open();
        store.ensure_schema().unwrap();
        store.create_session(&Session::with_id("old", "{}")).unwrap();
        store.upsert_spec("old", &Spec::new("S1", "spec")).unwrap();
        store
            .upsert_story(
                "old",
                &Story::with_id("A", "S1", "a")
                    .with_status(StoryStatus::Coding)
                    .with_assigned_agent("coder-001"),
            )
            .unwrap();
        store
            .upsert_story("old", &Story::with_id("B", "S1", "b").with_status(StoryStatus::Done))
            .unwrap();
        store
            .upsert_coder_state("old", &CoderState::new("coder-001", "CODING").with_story("A"))
            .unwrap();
        store
            .upsert_coder_state("old", &CoderState::new("coder-legacy", "WAITING"))
            .unwrap();
        store.upsert_architect_state("old", &ArchitectState::new("MONITORING")).unwrap();

        let boot = bootstrap(store, &Config::default()).unwrap();

        assert!(boot.stats.resumed);
        assert_eq!(boot.stats.stale_sessions, 1);
        assert_eq!(boot.stats.reset_stories, 1);
        assert_eq!(boot.stats.incomplete_stories, 1);
        assert_eq!(boot.stats.done_stories, 1);
        assert_eq!(boot.session.session_id, "old");
        assert_eq!(boot.session.status, SessionStatus::Active);
        assert!(boot.session.ended_at.is_none());
        assert_eq!(boot.session, boot.store.get_session("old").unwrap());

        let ready: Vec<&str> = boot.queue.ready().into_iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ready, vec!["A"]);
        assert_eq!(boot.agents.coders.len(), 2);
        assert_eq!(boot.agents.architect.unwrap().state, "MONITORING");
        assert!(boot.agents.pm.is_none());

        let a = boot.store.get_story("old", "A").unwrap();
        assert_eq!(a.status, StoryStatus::New);
        assert!(a.assigned_agent.is_none());
    }

    #[test]
    fn test_resume_disabled_starts_fresh() {
        let mut store = open();
        store.ensure_schema().unwrap();
        store.create_session(&Session::with_id("old", "{}")).unwrap();
        store.upsert_spec("old", &Spec::new("S1", "spec")).unwrap();
        store.upsert_story("old", &Story::with_id("A", "S1", "a")).unwrap();

        let mut config = Config::default();
        config.recovery.resume = ResumePolicy::Never;
        let boot = bootstrap(store, &config).unwrap();

        assert!(!boot.stats.resumed);
        assert_ne!(boot.session.session_id, "old");
        assert_eq!(boot.store.get_session("old").unwrap().status, SessionStatus::Crashed);
    }

    #[test]
    fn test_finished_session_is_not_resumed() {
        let mut store = open();
        store.ensure_schema().unwrap();
        store.create_session(&Session::with_id("old", "{}")).unwrap();
        store.upsert_spec("old", &Spec::new("S1", "spec")).unwrap();
        store
            .upsert_story("old", &Story::with_id("A", "S1", "a").with_status(StoryStatus::Done))
            .unwrap();

        let boot = bootstrap(store, &Config::default()).unwrap();
        assert!(!boot.stats.resumed);
        assert_ne!(boot.session.session_id, "old");
    }

    #[test]
    fn test_failed_resume_degrades_to_fresh_session() {
        let temp = tempfile::tempdir().unwrap();
        let db = temp.path().join("stories.db");
        {
            let mut store = Store::open(&db).unwrap();
            store.ensure_schema().unwrap();
            store.create_session(&Session::with_id("old", "{}")).unwrap();
            store.upsert_spec("old", &Spec::new("S1", "spec")).unwrap();
            store.upsert_story("old", &Story::with_id("A", "S1", "a")).unwrap();
        }
        // Checkpoint reload fails once the table is gone
        let raw = rusqlite::Connection::open(&db).unwrap();
        raw.execute_batch("DROP TABLE architect_state").unwrap();
        drop(raw);

        let boot = bootstrap(Store::open(&db).unwrap(), &Config::default()).unwrap();

        assert!(!boot.stats.resumed);
        assert_ne!(boot.session.session_id, "old");
        assert_eq!(boot.session.status, SessionStatus::Active);
        assert_eq!(boot.store.get_session("old").unwrap().status, SessionStatus::Crashed);
    }
}
