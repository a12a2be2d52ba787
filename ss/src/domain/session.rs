//! Session domain type

use serde::{Deserialize, Serialize};

use super::id::{generate_session_id, now_ms};
use crate::error::StoreError;

/// Lifecycle of one orchestrator run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// A process is (or was, until it died) running this session
    #[default]
    Active,
    /// Stopped gracefully; resumable
    Shutdown,
    /// All work done; never resumed
    Completed,
    /// Found `active` at startup; resumable
    Crashed,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 4] = [Self::Active, Self::Shutdown, Self::Completed, Self::Crashed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Shutdown => "shutdown",
            Self::Completed => "completed",
            Self::Crashed => "crashed",
        }
    }

    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Shutdown | Self::Crashed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "shutdown" => Ok(Self::Shutdown),
            "completed" => Ok(Self::Completed),
            "crashed" => Ok(Self::Crashed),
            other => Err(StoreError::InvalidStatus(format!("session status '{}'", other))),
        }
    }
}

/// One end-to-end run of the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub status: SessionStatus,
    /// Configuration snapshot taken when the session was created
    pub config_json: String,
}

impl Session {
    /// A fresh active session with a generated id
    pub fn new(config_json: impl Into<String>) -> Self {
        Self::with_id(generate_session_id(), config_json)
    }

    pub fn with_id(session_id: impl Into<String>, config_json: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            started_at: now_ms(),
            ended_at: None,
            status: SessionStatus::Active,
            config_json: config_json.into(),
        }
    }

    pub fn with_started_at(mut self, started_at: i64) -> Self {
        self.started_at = started_at;
        self
    }
}

/// The session chosen for resumption, with the story counts callers use
/// to decide whether to prompt before resuming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumableSession {
    pub session: Session,
    /// Stories not in {done, failed}
    pub incomplete_stories: usize,
    pub done_stories: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new_is_active() {
        let session = Session::new("{}");
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.ended_at.is_none());
        assert!(!session.session_id.is_empty());
    }

    #[test]
    fn test_resumable_statuses() {
        assert!(SessionStatus::Shutdown.is_resumable());
        assert!(SessionStatus::Crashed.is_resumable());
        assert!(!SessionStatus::Completed.is_resumable());
        assert!(!SessionStatus::Active.is_resumable());
    }

    #[test]
    fn test_session_status_parse() {
        assert_eq!("crashed".parse::<SessionStatus>().unwrap(), SessionStatus::Crashed);
        assert!("paused".parse::<SessionStatus>().is_err());
    }
}
