//! Inter-agent message log: requests, responses and plans
//!
//! Append-only audit trail. Rows are correlated by `id`, `request_id` and
//! `correlation_id`; an unanswered request is a handshake to resume.

use serde::{Deserialize, Serialize};

use super::id::now_ms;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub id: String,
    /// e.g. "question", "approval", "merge"
    pub request_type: String,
    pub from_agent: String,
    pub to_agent: String,
    pub story_id: Option<String>,
    pub content: String,
    pub approval_type: Option<String>,
    pub reason: Option<String>,
    pub correlation_id: Option<String>,
    pub parent_msg_id: Option<String>,
    pub created_at: i64,
}

impl AgentRequest {
    pub fn new(
        id: impl Into<String>,
        request_type: impl Into<String>,
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            request_type: request_type.into(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            story_id: None,
            content: content.into(),
            approval_type: None,
            reason: None,
            correlation_id: None,
            parent_msg_id: None,
            created_at: now_ms(),
        }
    }

    pub fn for_story(mut self, story_id: impl Into<String>) -> Self {
        self.story_id = Some(story_id.into());
        self
    }

    pub fn correlated(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub id: String,
    /// The request this answers
    pub request_id: String,
    pub response_type: String,
    pub from_agent: String,
    pub to_agent: String,
    pub story_id: Option<String>,
    pub content: String,
    /// e.g. "approved", "rejected", "needs_changes"
    pub status: Option<String>,
    pub feedback: Option<String>,
    pub correlation_id: Option<String>,
    pub created_at: i64,
}

impl AgentResponse {
    pub fn new(
        id: impl Into<String>,
        request_id: impl Into<String>,
        response_type: impl Into<String>,
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            request_id: request_id.into(),
            response_type: response_type.into(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            story_id: None,
            content: content.into(),
            status: None,
            feedback: None,
            correlation_id: None,
            created_at: now_ms(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// A coder's implementation plan submitted for architect review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPlan {
    pub id: String,
    pub story_id: String,
    pub from_agent: String,
    pub content: String,
    pub confidence: Option<String>,
    /// e.g. "submitted", "approved", "rejected"
    pub status: String,
    pub feedback: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<i64>,
    pub created_at: i64,
}

impl AgentPlan {
    pub fn new(
        id: impl Into<String>,
        story_id: impl Into<String>,
        from_agent: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            story_id: story_id.into(),
            from_agent: from_agent.into(),
            content: content.into(),
            confidence: None,
            status: "submitted".to_string(),
            feedback: None,
            reviewed_by: None,
            reviewed_at: None,
            created_at: now_ms(),
        }
    }
}
