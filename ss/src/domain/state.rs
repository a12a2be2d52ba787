//! Per-agent resumable state snapshots
//!
//! Every `*_json` field is an opaque string owned by the agent that wrote
//! it. The store persists and returns it byte-for-byte and never parses it.

use serde::{Deserialize, Serialize};

use super::id::now_ms;

/// Coder checkpoint, one per (session, agent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoderState {
    pub agent_id: String,
    pub story_id: Option<String>,
    /// FSM state name
    pub state: String,
    pub plan_json: Option<String>,
    pub todo_list_json: Option<String>,
    pub current_todo_index: i64,
    pub knowledge_pack_json: Option<String>,
    pub pending_request_json: Option<String>,
    pub container_image: Option<String>,
    pub updated_at: i64,
}

impl CoderState {
    pub fn new(agent_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            story_id: None,
            state: state.into(),
            plan_json: None,
            todo_list_json: None,
            current_todo_index: 0,
            knowledge_pack_json: None,
            pending_request_json: None,
            container_image: None,
            updated_at: now_ms(),
        }
    }

    pub fn with_story(mut self, story_id: impl Into<String>) -> Self {
        self.story_id = Some(story_id.into());
        self
    }
}

/// Architect checkpoint, one per session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectState {
    pub state: String,
    pub escalation_counts_json: Option<String>,
    pub pending_request_json: Option<String>,
    pub updated_at: i64,
}

impl ArchitectState {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            escalation_counts_json: None,
            pending_request_json: None,
            updated_at: now_ms(),
        }
    }
}

/// Product-manager checkpoint, one per session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmState {
    pub state: String,
    /// Spec currently being drafted or refined
    pub spec_id: Option<String>,
    pub draft_json: Option<String>,
    pub pending_request_json: Option<String>,
    pub updated_at: i64,
}

impl PmState {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            spec_id: None,
            draft_json: None,
            pending_request_json: None,
            updated_at: now_ms(),
        }
    }
}

/// Persisted LLM conversation, keyed by (session, agent, context type)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: String,
    /// e.g. "main", "planning", "review"
    pub context_type: String,
    pub messages_json: String,
    pub updated_at: i64,
}

impl AgentContext {
    pub fn new(agent_id: impl Into<String>, context_type: impl Into<String>, messages_json: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            context_type: context_type.into(),
            messages_json: messages_json.into(),
            updated_at: now_ms(),
        }
    }
}
