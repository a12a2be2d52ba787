//! Session lifecycle and crash detection
//!
//! A row left `active` when no process is running is, by definition, the
//! trace of an ungraceful exit. Startup turns those into `crashed` before
//! anything else reads the table.

use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info, warn};

use crate::domain::{ResumableSession, Session, SessionStatus, now_ms};
use crate::error::{StoreError, StoreResult, parse_column};
use crate::store::Store;

const SESSION_COLUMNS: &str = "session_id, started_at, ended_at, status, config_json";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        session_id: row.get(0)?,
        started_at: row.get(1)?,
        ended_at: row.get(2)?,
        status: parse_column(row, 3)?,
        config_json: row.get(4)?,
    })
}

impl Store {
    /// Insert a new session row; the config snapshot is written only here
    pub fn create_session(&self, session: &Session) -> StoreResult<()> {
        debug!(session_id = %session.session_id, "create_session: called");
        self.conn
            .execute(
                "INSERT INTO sessions (session_id, started_at, ended_at, status, config_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.session_id,
                    session.started_at,
                    session.ended_at,
                    session.status.as_str(),
                    session.config_json,
                ],
            )
            .map_err(|e| StoreError::from_sqlite(e, || format!("session {}", session.session_id)))?;
        info!(session_id = %session.session_id, "Created session");
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> StoreResult<Session> {
        debug!(%session_id, "get_session: called");
        self.conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
                params![session_id],
                session_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("session", session_id))
    }

    /// All sessions, newest first
    pub fn list_sessions(&self) -> StoreResult<Vec<Session>> {
        debug!("list_sessions: called");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY started_at DESC, rowid DESC"
        ))?;
        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Record a lifecycle transition
    ///
    /// Going `active` clears `ended_at`; every other status stamps it.
    pub fn set_session_status(&self, session_id: &str, status: SessionStatus) -> StoreResult<()> {
        debug!(%session_id, %status, "set_session_status: called");
        let ended_at = match status {
            SessionStatus::Active => None,
            _ => Some(now_ms()),
        };
        let changed = self.conn.execute(
            "UPDATE sessions SET status = ?1, ended_at = ?2 WHERE session_id = ?3",
            params![status.as_str(), ended_at, session_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("session", session_id));
        }
        info!(%session_id, %status, "Session status updated");
        Ok(())
    }

    /// Force every `active` session to `crashed`; returns how many changed
    pub fn mark_stale_sessions(&self) -> StoreResult<usize> {
        debug!("mark_stale_sessions: called");
        let changed = self.conn.execute(
            "UPDATE sessions SET status = 'crashed', ended_at = ?1 WHERE status = 'active'",
            params![now_ms()],
        )?;
        if changed > 0 {
            warn!(count = changed, "Marked stale active sessions as crashed");
        }
        Ok(changed)
    }

    /// The most recent shutdown/crashed session, if it still has work
    ///
    /// Only the single most recent candidate is considered; if it has no
    /// story outside {done, failed} there is nothing to resume and the
    /// result is `None`. Completed sessions are never candidates.
    pub fn get_most_recent_resumable_session(&self) -> StoreResult<Option<ResumableSession>> {
        debug!("get_most_recent_resumable_session: called");
        // Active rows are included so a late one is reclassified below
        let statuses: Vec<Value> = SessionStatus::ALL
            .iter()
            .filter(|s| s.is_resumable() || **s == SessionStatus::Active)
            .map(|s| Value::from(s.as_str().to_string()))
            .collect();
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let candidate = self
            .conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE status IN ({placeholders})
                     ORDER BY COALESCE(ended_at, started_at) DESC, started_at DESC, rowid DESC
                     LIMIT 1"
                ),
                params_from_iter(statuses.iter()),
                session_from_row,
            )
            .optional()?;

        let Some(mut session) = candidate else {
            debug!("get_most_recent_resumable_session: no candidate sessions");
            return Ok(None);
        };

        if session.status == SessionStatus::Active {
            // Raced with mark_stale_sessions; nothing can be running it now
            warn!(session_id = %session.session_id, "Reclassifying active session as crashed");
            self.set_session_status(&session.session_id, SessionStatus::Crashed)?;
            session = self.get_session(&session.session_id)?;
        }

        let (incomplete_stories, done_stories) = self.story_progress(&session.session_id)?;
        if incomplete_stories == 0 {
            info!(
                session_id = %session.session_id,
                done_stories, "Most recent session has no incomplete stories; not resumable"
            );
            return Ok(None);
        }

        Ok(Some(ResumableSession {
            session,
            incomplete_stories,
            done_stories,
        }))
    }

    /// (incomplete, done) story counts for a session
    pub fn story_progress(&self, session_id: &str) -> StoreResult<(usize, usize)> {
        debug!(%session_id, "story_progress: called");
        let (incomplete, done): (i64, i64) = self.conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN status NOT IN ('done', 'failed') THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'done' THEN 1 ELSE 0 END), 0)
             FROM stories WHERE session_id = ?1",
            params![session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((incomplete as usize, done as usize))
    }
}
