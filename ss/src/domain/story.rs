//! Spec, Story and dependency types

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id::{generate_story_id, now_ms};
use crate::error::StoreError;

/// Story status
///
/// The first eight variants are the current lifecycle. `InProgress`,
/// `Committed`, `Merged`, `Error` and `Duplicate` come from the baseline
/// schema and are still accepted when read back from older databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    #[default]
    New,
    Pending,
    Dispatched,
    Planning,
    Coding,
    Review,
    Done,
    Failed,
    InProgress,
    Committed,
    Merged,
    Error,
    Duplicate,
}

impl StoryStatus {
    /// Statuses that mean an agent currently owns the story
    pub const IN_FLIGHT: [StoryStatus; 5] = [
        StoryStatus::Dispatched,
        StoryStatus::Planning,
        StoryStatus::Coding,
        StoryStatus::Review,
        StoryStatus::InProgress,
    ];

    /// Statuses that end a story's lifecycle for resumability purposes
    pub const TERMINAL: [StoryStatus; 2] = [StoryStatus::Done, StoryStatus::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Planning => "planning",
            Self::Coding => "coding",
            Self::Review => "review",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::InProgress => "in_progress",
            Self::Committed => "committed",
            Self::Merged => "merged",
            Self::Error => "error",
            Self::Duplicate => "duplicate",
        }
    }

    /// Done or failed
    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    pub fn is_in_flight(&self) -> bool {
        Self::IN_FLIGHT.contains(self)
    }

    /// Entering this status records `started_at`
    pub fn sets_started_at(&self) -> bool {
        matches!(self, Self::Dispatched | Self::Planning | Self::Coding | Self::InProgress)
    }

    /// Entering this status records `completed_at`
    pub fn sets_completed_at(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::Merged | Self::Error | Self::Duplicate
        )
    }
}

impl std::fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StoryStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "pending" => Ok(Self::Pending),
            "dispatched" => Ok(Self::Dispatched),
            "planning" => Ok(Self::Planning),
            "coding" => Ok(Self::Coding),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "in_progress" => Ok(Self::InProgress),
            "committed" => Ok(Self::Committed),
            "merged" => Ok(Self::Merged),
            "error" => Ok(Self::Error),
            "duplicate" => Ok(Self::Duplicate),
            other => Err(StoreError::InvalidStatus(format!("story status '{}'", other))),
        }
    }
}

/// Kind of work a story represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoryType {
    Devops,
    #[default]
    App,
}

impl StoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Devops => "devops",
            Self::App => "app",
        }
    }
}

impl std::fmt::Display for StoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StoryType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "devops" => Ok(Self::Devops),
            "app" => Ok(Self::App),
            other => Err(StoreError::InvalidStatus(format!("story type '{}'", other))),
        }
    }
}

/// A top-level specification document stories are generated from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    pub id: String,
    pub content: String,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
    /// Set once the spec has been broken down into stories
    pub processed_at: Option<i64>,
}

impl Spec {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            created_at: now_ms(),
            processed_at: None,
        }
    }
}

/// A schedulable unit of development work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    /// Short hex token
    pub id: String,
    /// Owning spec
    pub spec_id: String,
    pub title: String,
    pub content: String,
    pub status: StoryStatus,
    /// Higher is scheduled first
    pub priority: i64,
    pub approved_plan: Option<String>,
    pub assigned_agent: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub tokens_used: i64,
    pub cost_usd: f64,
    pub story_type: StoryType,
    pub pr_id: Option<String>,
    pub commit_hash: Option<String>,
    pub completion_summary: Option<String>,
    /// Ids of stories this one depends on. Populated by queries that load
    /// dependencies; not a column.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Story {
    /// Create a new story with a generated id
    pub fn new(spec_id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_id(generate_story_id(), spec_id, title).with_content(content)
    }

    /// Create with a specific id (for tests or replayed plans)
    pub fn with_id(id: impl Into<String>, spec_id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        debug!(%id, "Story::with_id: called");
        Self {
            id,
            spec_id: spec_id.into(),
            title: title.into(),
            content: String::new(),
            status: StoryStatus::New,
            priority: 0,
            approved_plan: None,
            assigned_agent: None,
            created_at: now_ms(),
            started_at: None,
            completed_at: None,
            tokens_used: 0,
            cost_usd: 0.0,
            story_type: StoryType::App,
            pr_id: None,
            commit_hash: None,
            completion_summary: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: StoryStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_story_type(mut self, story_type: StoryType) -> Self {
        self.story_type = story_type;
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_assigned_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.assigned_agent = Some(agent_id.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Directed edge: `story_id` cannot start before `depends_on` is done
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoryDependency {
    pub story_id: String,
    pub depends_on: String,
}

impl StoryDependency {
    pub fn new(story_id: impl Into<String>, depends_on: impl Into<String>) -> Self {
        Self {
            story_id: story_id.into(),
            depends_on: depends_on.into(),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.story_id == self.depends_on
    }
}

/// Status transition with optional completion metadata
///
/// `None` fields leave the stored value untouched. A missing `timestamp`
/// means "now" for whichever of `started_at` / `completed_at` the status
/// records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub story_id: String,
    pub status: StoryStatus,
    pub timestamp: Option<i64>,
    pub assigned_agent: Option<String>,
    pub tokens_used: Option<i64>,
    pub cost_usd: Option<f64>,
    pub pr_id: Option<String>,
    pub commit_hash: Option<String>,
    pub completion_summary: Option<String>,
}

impl StatusUpdate {
    pub fn new(story_id: impl Into<String>, status: StoryStatus) -> Self {
        Self {
            story_id: story_id.into(),
            status,
            timestamp: None,
            assigned_agent: None,
            tokens_used: None,
            cost_usd: None,
            pr_id: None,
            commit_hash: None,
            completion_summary: None,
        }
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn assigned_to(mut self, agent_id: impl Into<String>) -> Self {
        self.assigned_agent = Some(agent_id.into());
        self
    }

    pub fn with_usage(mut self, tokens_used: i64, cost_usd: f64) -> Self {
        self.tokens_used = Some(tokens_used);
        self.cost_usd = Some(cost_usd);
        self
    }

    pub fn with_completion(
        mut self,
        pr_id: Option<String>,
        commit_hash: Option<String>,
        summary: impl Into<String>,
    ) -> Self {
        self.pr_id = pr_id;
        self.commit_hash = commit_hash;
        self.completion_summary = Some(summary.into());
        self
    }
}
