//! StoryStore - session-scoped persistence for the story scheduler
//!
//! A single SQLite file holds every session's specs, stories, dependency
//! edges, agent checkpoints and message log. Every table except
//! `schema_version` and `sessions` is keyed by `session_id`, so one session
//! never sees another's rows.
//!
//! # Modules
//!
//! - [`schema`] - versioned schema creation and migration
//! - [`store`] - the [`Store`] handle and connection options
//! - [`domain`] - stories, sessions, agent state and messages
//! - [`query`] - parameterized story filters
//! - [`error`] - [`StoreError`]
//!
//! Operations are inherent methods on [`Store`], grouped by file:
//! sessions, stories, state, messages.
//!
//! # Example
//!
//! ```no_run
//! use storystore::{Spec, Store, Story};
//!
//! let mut store = Store::open("stories.db")?;
//! store.ensure_schema()?;
//! store.upsert_spec("session-1", &Spec::new("S1", "Build a CLI"))?;
//! store.upsert_story("session-1", &Story::new("S1", "Parse args", "clap derive"))?;
//! let ready = store.query_pending_stories("session-1")?;
//! # Ok::<(), storystore::StoreError>(())
//! ```

pub mod domain;
pub mod error;
pub mod query;
pub mod schema;
pub mod store;

mod messages;
mod sessions;
mod state;
mod stories;

pub use domain::{
    AgentContext, AgentPlan, AgentRequest, AgentResponse, ArchitectState, CoderState, PmState, ResumableSession,
    STORY_ID_LEN, Session, SessionStatus, Spec, StatusUpdate, Story, StoryDependency, StoryStatus, StoryType,
    generate_session_id, generate_story_id, is_story_id, now_ms,
};
pub use error::{StoreError, StoreResult};
pub use messages::RequestSelector;
pub use query::StoryFilter;
pub use schema::CURRENT_SCHEMA_VERSION;
pub use store::{DEFAULT_BUSY_TIMEOUT, Store, StoreOptions};
