//! Agent message log
//!
//! Requests, responses and plans exchanged between agents, kept per session
//! so pending handshakes can be found again after a restart.

use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use crate::domain::{AgentPlan, AgentRequest, AgentResponse};
use crate::error::{StoreError, StoreResult};
use crate::store::Store;

const REQUEST_COLUMNS: &str = "id, request_type, from_agent, to_agent, story_id, content, approval_type, reason, correlation_id, parent_msg_id, created_at";
const RESPONSE_COLUMNS: &str = "id, request_id, response_type, from_agent, to_agent, story_id, content, status, feedback, correlation_id, created_at";
const PLAN_COLUMNS: &str = "id, story_id, from_agent, content, confidence, status, feedback, reviewed_by, reviewed_at, created_at";

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<AgentRequest> {
    Ok(AgentRequest {
        id: row.get(0)?,
        request_type: row.get(1)?,
        from_agent: row.get(2)?,
        to_agent: row.get(3)?,
        story_id: row.get(4)?,
        content: row.get(5)?,
        approval_type: row.get(6)?,
        reason: row.get(7)?,
        correlation_id: row.get(8)?,
        parent_msg_id: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn response_from_row(row: &Row<'_>) -> rusqlite::Result<AgentResponse> {
    Ok(AgentResponse {
        id: row.get(0)?,
        request_id: row.get(1)?,
        response_type: row.get(2)?,
        from_agent: row.get(3)?,
        to_agent: row.get(4)?,
        story_id: row.get(5)?,
        content: row.get(6)?,
        status: row.get(7)?,
        feedback: row.get(8)?,
        correlation_id: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<AgentPlan> {
    Ok(AgentPlan {
        id: row.get(0)?,
        story_id: row.get(1)?,
        from_agent: row.get(2)?,
        content: row.get(3)?,
        confidence: row.get(4)?,
        status: row.get(5)?,
        feedback: row.get(6)?,
        reviewed_by: row.get(7)?,
        reviewed_at: row.get(8)?,
        created_at: row.get(9)?,
    })
}

/// Which requests to list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSelector {
    Correlation(String),
    Story(String),
    ToAgent(String),
}

impl Store {
    pub fn upsert_agent_request(&self, session_id: &str, request: &AgentRequest) -> StoreResult<()> {
        debug!(
            %session_id,
            id = %request.id,
            request_type = %request.request_type,
            "upsert_agent_request: called"
        );
        self.conn
            .execute(
                "INSERT INTO agent_requests (session_id, id, request_type, from_agent, to_agent, story_id, content,
                                             approval_type, reason, correlation_id, parent_msg_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(session_id, id) DO UPDATE SET
                    request_type = excluded.request_type,
                    from_agent = excluded.from_agent,
                    to_agent = excluded.to_agent,
                    story_id = excluded.story_id,
                    content = excluded.content,
                    approval_type = excluded.approval_type,
                    reason = excluded.reason,
                    correlation_id = excluded.correlation_id,
                    parent_msg_id = excluded.parent_msg_id,
                    created_at = excluded.created_at",
                params![
                    session_id,
                    request.id,
                    request.request_type,
                    request.from_agent,
                    request.to_agent,
                    request.story_id,
                    request.content,
                    request.approval_type,
                    request.reason,
                    request.correlation_id,
                    request.parent_msg_id,
                    request.created_at,
                ],
            )
            .map_err(|e| StoreError::from_sqlite(e, || format!("agent request {} in session {}", request.id, session_id)))?;
        Ok(())
    }

    pub fn get_agent_request(&self, session_id: &str, id: &str) -> StoreResult<AgentRequest> {
        debug!(%session_id, %id, "get_agent_request: called");
        self.conn
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM agent_requests WHERE session_id = ?1 AND id = ?2"),
                params![session_id, id],
                request_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("agent request", id))
    }

    /// Requests matching `selector`, oldest first
    pub fn list_agent_requests(&self, session_id: &str, selector: &RequestSelector) -> StoreResult<Vec<AgentRequest>> {
        debug!(%session_id, ?selector, "list_agent_requests: called");
        let (column, value) = match selector {
            RequestSelector::Correlation(id) => ("correlation_id", id),
            RequestSelector::Story(id) => ("story_id", id),
            RequestSelector::ToAgent(id) => ("to_agent", id),
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM agent_requests
             WHERE session_id = ?1 AND {column} = ?2 ORDER BY created_at ASC, id ASC"
        ))?;
        let requests = stmt
            .query_map(params![session_id, value], request_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    /// Requests with no recorded response, oldest first
    pub fn get_unanswered_agent_requests(&self, session_id: &str) -> StoreResult<Vec<AgentRequest>> {
        debug!(%session_id, "get_unanswered_agent_requests: called");
        let columns = REQUEST_COLUMNS
            .split(", ")
            .map(|c| format!("r.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {columns} FROM agent_requests r
             LEFT JOIN agent_responses p ON p.session_id = r.session_id AND p.request_id = r.id
             WHERE r.session_id = ?1 AND p.id IS NULL
             ORDER BY r.created_at ASC, r.id ASC"
        ))?;
        let requests = stmt
            .query_map(params![session_id], request_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    pub fn upsert_agent_response(&self, session_id: &str, response: &AgentResponse) -> StoreResult<()> {
        debug!(
            %session_id,
            id = %response.id,
            request_id = %response.request_id,
            "upsert_agent_response: called"
        );
        self.conn
            .execute(
                "INSERT INTO agent_responses (session_id, id, request_id, response_type, from_agent, to_agent,
                                              story_id, content, status, feedback, correlation_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(session_id, id) DO UPDATE SET
                    request_id = excluded.request_id,
                    response_type = excluded.response_type,
                    from_agent = excluded.from_agent,
                    to_agent = excluded.to_agent,
                    story_id = excluded.story_id,
                    content = excluded.content,
                    status = excluded.status,
                    feedback = excluded.feedback,
                    correlation_id = excluded.correlation_id,
                    created_at = excluded.created_at",
                params![
                    session_id,
                    response.id,
                    response.request_id,
                    response.response_type,
                    response.from_agent,
                    response.to_agent,
                    response.story_id,
                    response.content,
                    response.status,
                    response.feedback,
                    response.correlation_id,
                    response.created_at,
                ],
            )
            .map_err(|e| {
                StoreError::from_sqlite(e, || format!("agent response {} in session {}", response.id, session_id))
            })?;
        Ok(())
    }

    pub fn get_responses_for_request(&self, session_id: &str, request_id: &str) -> StoreResult<Vec<AgentResponse>> {
        debug!(%session_id, %request_id, "get_responses_for_request: called");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RESPONSE_COLUMNS} FROM agent_responses
             WHERE session_id = ?1 AND request_id = ?2 ORDER BY created_at ASC, id ASC"
        ))?;
        let responses = stmt
            .query_map(params![session_id, request_id], response_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(responses)
    }

    pub fn upsert_agent_plan(&self, session_id: &str, plan: &AgentPlan) -> StoreResult<()> {
        debug!(%session_id, id = %plan.id, story_id = %plan.story_id, "upsert_agent_plan: called");
        self.conn
            .execute(
                "INSERT INTO agent_plans (session_id, id, story_id, from_agent, content, confidence, status,
                                          feedback, reviewed_by, reviewed_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(session_id, id) DO UPDATE SET
                    story_id = excluded.story_id,
                    from_agent = excluded.from_agent,
                    content = excluded.content,
                    confidence = excluded.confidence,
                    status = excluded.status,
                    feedback = excluded.feedback,
                    reviewed_by = excluded.reviewed_by,
                    reviewed_at = excluded.reviewed_at,
                    created_at = excluded.created_at",
                params![
                    session_id,
                    plan.id,
                    plan.story_id,
                    plan.from_agent,
                    plan.content,
                    plan.confidence,
                    plan.status,
                    plan.feedback,
                    plan.reviewed_by,
                    plan.reviewed_at,
                    plan.created_at,
                ],
            )
            .map_err(|e| StoreError::from_sqlite(e, || format!("agent plan {} in session {}", plan.id, session_id)))?;
        Ok(())
    }

    /// Plans submitted for a story, oldest first
    pub fn get_agent_plans_for_story(&self, session_id: &str, story_id: &str) -> StoreResult<Vec<AgentPlan>> {
        debug!(%session_id, %story_id, "get_agent_plans_for_story: called");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PLAN_COLUMNS} FROM agent_plans
             WHERE session_id = ?1 AND story_id = ?2 ORDER BY created_at ASC, id ASC"
        ))?;
        let plans = stmt
            .query_map(params![session_id, story_id], plan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store
    }

    fn question(id: &str) -> AgentRequest {
        AgentRequest::new(id, "question", "coder-001", "architect", "which crate?")
            .for_story("a1b2c3d4")
            .correlated("corr-1")
    }

    #[test]
    fn test_request_round_trip() {
        let store = store();
        let request = question("req-1");
        store.upsert_agent_request("s1", &request).unwrap();
        assert_eq!(store.get_agent_request("s1", "req-1").unwrap(), request);
        assert!(store.get_agent_request("s2", "req-1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_requests_by_selector() {
        let store = store();
        store.upsert_agent_request("s1", &question("req-1")).unwrap();
        store
            .upsert_agent_request(
                "s1",
                &AgentRequest::new("req-2", "approval", "coder-002", "architect", "plan ready").for_story("e5f6a7b8"),
            )
            .unwrap();

        let by_corr = store
            .list_agent_requests("s1", &RequestSelector::Correlation("corr-1".into()))
            .unwrap();
        assert_eq!(by_corr.len(), 1);

        let by_story = store
            .list_agent_requests("s1", &RequestSelector::Story("e5f6a7b8".into()))
            .unwrap();
        assert_eq!(by_story[0].id, "req-2");

        let to_architect = store
            .list_agent_requests("s1", &RequestSelector::ToAgent("architect".into()))
            .unwrap();
        assert_eq!(to_architect.len(), 2);
    }

    #[test]
    fn test_unanswered_requests() {
        let store = store();
        store.upsert_agent_request("s1", &question("req-1")).unwrap();
        store.upsert_agent_request("s1", &question("req-2")).unwrap();
        store
            .upsert_agent_response(
                "s1",
                &AgentResponse::new("resp-1", "req-1", "answer", "architect", "coder-001", "use rusqlite")
                    .with_status("approved"),
            )
            .unwrap();

        let pending = store.get_unanswered_agent_requests("s1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "req-2");

        let responses = store.get_responses_for_request("s1", "req-1").unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status.as_deref(), Some("approved"));
    }

    #[test]
    fn test_response_in_other_session_does_not_answer() {
        let store = store();
        store.upsert_agent_request("s1", &question("req-1")).unwrap();
        store
            .upsert_agent_response(
                "s2",
                &AgentResponse::new("resp-1", "req-1", "answer", "architect", "coder-001", "elsewhere"),
            )
            .unwrap();
        assert_eq!(store.get_unanswered_agent_requests("s1").unwrap().len(), 1);
    }

    #[test]
    fn test_plans_for_story() {
        let store = store();
        let mut plan = AgentPlan::new("plan-1", "a1b2c3d4", "coder-001", "1. write tests");
        store.upsert_agent_plan("s1", &plan).unwrap();

        plan.status = "approved".to_string();
        plan.reviewed_by = Some("architect".to_string());
        plan.reviewed_at = Some(42);
        store.upsert_agent_plan("s1", &plan).unwrap();

        let plans = store.get_agent_plans_for_story("s1", "a1b2c3d4").unwrap();
        assert_eq!(plans, vec![plan]);
        assert!(store.get_agent_plans_for_story("s2", "a1b2c3d4").unwrap().is_empty());
    }
}
