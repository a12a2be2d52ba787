//! Request processor messages
//!
//! A closed set of operation/payload pairs. Writes carry an optional reply
//! (absent = fire-and-forget); queries always carry one.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use storystore::{
    AgentContext, AgentPlan, AgentRequest, AgentResponse, ArchitectState, CoderState, PmState, RequestSelector,
    SessionStatus, Spec, StatusUpdate, Story, StoryDependency, StoryFilter, StoryStatus, StoreError,
};

/// Errors from persistence requests
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[source] StoreError),

    #[error("Request processor is not running")]
    ChannelClosed,

    #[error("{operation} timed out")]
    Timeout { operation: Operation },
}

impl From<StoreError> for PersistenceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => Self::NotFound(format!("{} {}", kind, id)),
            other => Self::Store(other),
        }
    }
}

impl PersistenceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Response from persistence requests
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// One-shot reply channel
pub type Reply<T> = oneshot::Sender<PersistenceResult<T>>;

/// Operation names, as they appear in logs and the request protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    UpsertSpec,
    MarkSpecProcessed,
    UpsertStory,
    UpdateStoryStatus,
    AddStoryDependency,
    RemoveStoryDependency,
    BatchUpsertStoriesWithDependencies,
    UpsertAgentRequest,
    UpsertAgentResponse,
    UpsertAgentPlan,
    UpsertCoderState,
    UpsertArchitectState,
    UpsertPmState,
    UpsertAgentContext,
    QueryPendingStories,
    QueryReadyStories,
    QueryStories,
    QueryStory,
    QueryIncompleteStories,
    QueryStoryDependencies,
    QueryStatusCounts,
    QueryCoderState,
    QueryArchitectState,
    QueryPmState,
    QueryAgentContext,
    QueryAgentRequest,
    QueryAgentRequests,
    QueryUnansweredRequests,
    QueryResponsesForRequest,
    QueryAgentPlans,
    EndSession,
    Shutdown,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpsertSpec => "upsert_spec",
            Self::MarkSpecProcessed => "mark_spec_processed",
            Self::UpsertStory => "upsert_story",
            Self::UpdateStoryStatus => "update_story_status",
            Self::AddStoryDependency => "add_story_dependency",
            Self::RemoveStoryDependency => "remove_story_dependency",
            Self::BatchUpsertStoriesWithDependencies => "batch_upsert_stories_with_dependencies",
            Self::UpsertAgentRequest => "upsert_agent_request",
            Self::UpsertAgentResponse => "upsert_agent_response",
            Self::UpsertAgentPlan => "upsert_agent_plan",
            Self::UpsertCoderState => "upsert_coder_state",
            Self::UpsertArchitectState => "upsert_architect_state",
            Self::UpsertPmState => "upsert_pm_state",
            Self::UpsertAgentContext => "upsert_agent_context",
            Self::QueryPendingStories => "query_pending_stories",
            Self::QueryReadyStories => "query_ready_stories",
            Self::QueryStories => "query_stories",
            Self::QueryStory => "query_story",
            Self::QueryIncompleteStories => "query_incomplete_stories",
            Self::QueryStoryDependencies => "query_story_dependencies",
            Self::QueryStatusCounts => "query_status_counts",
            Self::QueryCoderState => "query_coder_state",
            Self::QueryArchitectState => "query_architect_state",
            Self::QueryPmState => "query_pm_state",
            Self::QueryAgentContext => "query_agent_context",
            Self::QueryAgentRequest => "query_agent_request",
            Self::QueryAgentRequests => "query_agent_requests",
            Self::QueryUnansweredRequests => "query_unanswered_requests",
            Self::QueryResponsesForRequest => "query_responses_for_request",
            Self::QueryAgentPlans => "query_agent_plans",
            Self::EndSession => "end_session",
            Self::Shutdown => "shutdown",
        }
    }

    /// Read-only operations
    pub fn is_query(&self) -> bool {
        self.as_str().starts_with("query_")
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests consumed by the RequestProcessor
#[derive(Debug)]
pub enum Request {
    // Writes
    UpsertSpec {
        spec: Spec,
        reply: Option<Reply<()>>,
    },
    MarkSpecProcessed {
        spec_id: String,
        reply: Option<Reply<()>>,
    },
    UpsertStory {
        story: Story,
        reply: Option<Reply<()>>,
    },
    UpdateStoryStatus {
        update: StatusUpdate,
        reply: Option<Reply<()>>,
    },
    AddStoryDependency {
        dependency: StoryDependency,
        reply: Option<Reply<()>>,
    },
    RemoveStoryDependency {
        dependency: StoryDependency,
        reply: Option<Reply<bool>>,
    },
    BatchUpsertStoriesWithDependencies {
        stories: Vec<Story>,
        dependencies: Vec<StoryDependency>,
        reply: Option<Reply<()>>,
    },
    UpsertAgentRequest {
        request: AgentRequest,
        reply: Option<Reply<()>>,
    },
    UpsertAgentResponse {
        response: AgentResponse,
        reply: Option<Reply<()>>,
    },
    UpsertAgentPlan {
        plan: AgentPlan,
        reply: Option<Reply<()>>,
    },
    UpsertCoderState {
        state: CoderState,
        reply: Option<Reply<()>>,
    },
    UpsertArchitectState {
        state: ArchitectState,
        reply: Option<Reply<()>>,
    },
    UpsertPmState {
        state: PmState,
        reply: Option<Reply<()>>,
    },
    UpsertAgentContext {
        context: AgentContext,
        reply: Option<Reply<()>>,
    },

    // Queries
    QueryPendingStories {
        reply: Reply<Vec<Story>>,
    },
    /// Ready stories from the in-memory queue, without touching the database
    QueryReadyStories {
        reply: Reply<Vec<Story>>,
    },
    QueryStories {
        filter: StoryFilter,
        reply: Reply<Vec<Story>>,
    },
    QueryStory {
        story_id: String,
        reply: Reply<Story>,
    },
    QueryIncompleteStories {
        reply: Reply<Vec<Story>>,
    },
    QueryStoryDependencies {
        story_id: String,
        reply: Reply<Vec<String>>,
    },
    QueryStatusCounts {
        reply: Reply<Vec<(StoryStatus, usize)>>,
    },
    QueryCoderState {
        agent_id: String,
        reply: Reply<Option<CoderState>>,
    },
    QueryArchitectState {
        reply: Reply<Option<ArchitectState>>,
    },
    QueryPmState {
        reply: Reply<Option<PmState>>,
    },
    QueryAgentContext {
        agent_id: String,
        context_type: String,
        reply: Reply<Option<AgentContext>>,
    },
    QueryAgentRequest {
        request_id: String,
        reply: Reply<AgentRequest>,
    },
    /// Look up requests by correlation id, story or recipient
    QueryAgentRequests {
        selector: RequestSelector,
        reply: Reply<Vec<AgentRequest>>,
    },
    QueryUnansweredRequests {
        reply: Reply<Vec<AgentRequest>>,
    },
    QueryResponsesForRequest {
        request_id: String,
        reply: Reply<Vec<AgentResponse>>,
    },
    QueryAgentPlans {
        story_id: String,
        reply: Reply<Vec<AgentPlan>>,
    },

    // Lifecycle
    /// Record the session's final status and stop the processor
    EndSession {
        status: SessionStatus,
        reply: Option<Reply<()>>,
    },
    /// Stop without touching the session row
    Shutdown,
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Self::UpsertSpec { .. } => Operation::UpsertSpec,
            Self::MarkSpecProcessed { .. } => Operation::MarkSpecProcessed,
            Self::UpsertStory { .. } => Operation::UpsertStory,
            Self::UpdateStoryStatus { .. } => Operation::UpdateStoryStatus,
            Self::AddStoryDependency { .. } => Operation::AddStoryDependency,
            Self::RemoveStoryDependency { .. } => Operation::RemoveStoryDependency,
            Self::BatchUpsertStoriesWithDependencies { .. } => Operation::BatchUpsertStoriesWithDependencies,
            Self::UpsertAgentRequest { .. } => Operation::UpsertAgentRequest,
            Self::UpsertAgentResponse { .. } => Operation::UpsertAgentResponse,
            Self::UpsertAgentPlan { .. } => Operation::UpsertAgentPlan,
            Self::UpsertCoderState { .. } => Operation::UpsertCoderState,
            Self::UpsertArchitectState { .. } => Operation::UpsertArchitectState,
            Self::UpsertPmState { .. } => Operation::UpsertPmState,
            Self::UpsertAgentContext { .. } => Operation::UpsertAgentContext,
            Self::QueryPendingStories { .. } => Operation::QueryPendingStories,
            Self::QueryReadyStories { .. } => Operation::QueryReadyStories,
            Self::QueryStories { .. } => Operation::QueryStories,
            Self::QueryStory { .. } => Operation::QueryStory,
            Self::QueryIncompleteStories { .. } => Operation::QueryIncompleteStories,
            Self::QueryStoryDependencies { .. } => Operation::QueryStoryDependencies,
            Self::QueryStatusCounts { .. } => Operation::QueryStatusCounts,
            Self::QueryCoderState { .. } => Operation::QueryCoderState,
            Self::QueryArchitectState { .. } => Operation::QueryArchitectState,
            Self::QueryPmState { .. } => Operation::QueryPmState,
            Self::QueryAgentContext { .. } => Operation::QueryAgentContext,
            Self::QueryAgentRequest { .. } => Operation::QueryAgentRequest,
            Self::QueryAgentRequests { .. } => Operation::QueryAgentRequests,
            Self::QueryUnansweredRequests { .. } => Operation::QueryUnansweredRequests,
            Self::QueryResponsesForRequest { .. } => Operation::QueryResponsesForRequest,
            Self::QueryAgentPlans { .. } => Operation::QueryAgentPlans,
            Self::EndSession { .. } => Operation::EndSession,
            Self::Shutdown => Operation::Shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::UpsertSpec.to_string(), "upsert_spec");
        assert_eq!(
            Operation::BatchUpsertStoriesWithDependencies.as_str(),
            "batch_upsert_stories_with_dependencies"
        );
        assert_eq!(
            serde_json::to_string(&Operation::AddStoryDependency).unwrap(),
            "\"add_story_dependency\""
        );
    }

    #[test]
    fn test_queries_are_classified() {
        assert!(Operation::QueryPendingStories.is_query());
        assert!(Operation::QueryAgentPlans.is_query());
        assert!(Operation::QueryAgentRequests.is_query());
        assert_eq!(Operation::QueryReadyStories.as_str(), "query_ready_stories");
        assert!(!Operation::UpsertStory.is_query());
        assert!(!Operation::EndSession.is_query());
    }

    #[test]
    fn test_request_reports_operation() {
        let request = Request::UpsertSpec {
            spec: Spec::new("S1", "content"),
            reply: None,
        };
        assert_eq!(request.operation(), Operation::UpsertSpec);
        assert_eq!(Request::Shutdown.operation(), Operation::Shutdown);
    }

    #[test]
    fn test_not_found_maps_through() {
        let err: PersistenceError = StoreError::not_found("story", "a1b2c3d4").into();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Record not found: story a1b2c3d4");

        let err: PersistenceError = StoreError::Constraint("x".into()).into();
        assert!(matches!(err, PersistenceError::Store(_)));
    }
}
