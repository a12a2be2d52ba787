//! Domain types for the story store
//!
//! Everything except [`Session`] is scoped by a session id supplied by the
//! caller; the types themselves do not carry it.

mod id;
mod message;
mod session;
mod state;
mod story;

pub use id::{STORY_ID_LEN, generate_session_id, generate_story_id, is_story_id, now_ms};
pub use message::{AgentPlan, AgentRequest, AgentResponse};
pub use session::{ResumableSession, Session, SessionStatus};
pub use state::{AgentContext, ArchitectState, CoderState, PmState};
pub use story::{Spec, StatusUpdate, Story, StoryDependency, StoryStatus, StoryType};
