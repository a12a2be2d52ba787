//! StateStore - whole-row agent checkpoints
//!
//! Each upsert overwrites the full snapshot. A missing row is `Ok(None)`:
//! a fresh agent that never checkpointed is not an error.

use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use crate::domain::{AgentContext, ArchitectState, CoderState, PmState};
use crate::error::{StoreError, StoreResult};
use crate::store::Store;

const CODER_COLUMNS: &str = "agent_id, story_id, state, plan_json, todo_list_json, current_todo_index, knowledge_pack_json, pending_request_json, container_image, updated_at";

fn coder_from_row(row: &Row<'_>) -> rusqlite::Result<CoderState> {
    Ok(CoderState {
        agent_id: row.get(0)?,
        story_id: row.get(1)?,
        state: row.get(2)?,
        plan_json: row.get(3)?,
        todo_list_json: row.get(4)?,
        current_todo_index: row.get(5)?,
        knowledge_pack_json: row.get(6)?,
        pending_request_json: row.get(7)?,
        container_image: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn context_from_row(row: &Row<'_>) -> rusqlite::Result<AgentContext> {
    Ok(AgentContext {
        agent_id: row.get(0)?,
        context_type: row.get(1)?,
        messages_json: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

impl Store {
    pub fn upsert_coder_state(&self, session_id: &str, state: &CoderState) -> StoreResult<()> {
        debug!(%session_id, agent_id = %state.agent_id, state = %state.state, "upsert_coder_state: called");
        self.conn
            .execute(
                "INSERT INTO coder_state (session_id, agent_id, story_id, state, plan_json, todo_list_json,
                                          current_todo_index, knowledge_pack_json, pending_request_json,
                                          container_image, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(session_id, agent_id) DO UPDATE SET
                    story_id = excluded.story_id,
                    state = excluded.state,
                    plan_json = excluded.plan_json,
                    todo_list_json = excluded.todo_list_json,
                    current_todo_index = excluded.current_todo_index,
                    knowledge_pack_json = excluded.knowledge_pack_json,
                    pending_request_json = excluded.pending_request_json,
                    container_image = excluded.container_image,
                    updated_at = excluded.updated_at",
                params![
                    session_id,
                    state.agent_id,
                    state.story_id,
                    state.state,
                    state.plan_json,
                    state.todo_list_json,
                    state.current_todo_index,
                    state.knowledge_pack_json,
                    state.pending_request_json,
                    state.container_image,
                    state.updated_at,
                ],
            )
            .map_err(|e| {
                StoreError::from_sqlite(e, || format!("coder state {} in session {}", state.agent_id, session_id))
            })?;
        Ok(())
    }

    pub fn get_coder_state(&self, session_id: &str, agent_id: &str) -> StoreResult<Option<CoderState>> {
        debug!(%session_id, %agent_id, "get_coder_state: called");
        let state = self
            .conn
            .query_row(
                &format!("SELECT {CODER_COLUMNS} FROM coder_state WHERE session_id = ?1 AND agent_id = ?2"),
                params![session_id, agent_id],
                coder_from_row,
            )
            .optional()?;
        Ok(state)
    }

    /// Every coder that checkpointed in the session, by agent id
    pub fn list_coder_states(&self, session_id: &str) -> StoreResult<Vec<CoderState>> {
        debug!(%session_id, "list_coder_states: called");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CODER_COLUMNS} FROM coder_state WHERE session_id = ?1 ORDER BY agent_id"
        ))?;
        let states = stmt
            .query_map(params![session_id], coder_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(states)
    }

    pub fn upsert_architect_state(&self, session_id: &str, state: &ArchitectState) -> StoreResult<()> {
        debug!(%session_id, state = %state.state, "upsert_architect_state: called");
        self.conn.execute(
            "INSERT INTO architect_state (session_id, state, escalation_counts_json, pending_request_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id) DO UPDATE SET
                state = excluded.state,
                escalation_counts_json = excluded.escalation_counts_json,
                pending_request_json = excluded.pending_request_json,
                updated_at = excluded.updated_at",
            params![
                session_id,
                state.state,
                state.escalation_counts_json,
                state.pending_request_json,
                state.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_architect_state(&self, session_id: &str) -> StoreResult<Option<ArchitectState>> {
        debug!(%session_id, "get_architect_state: called");
        let state = self
            .conn
            .query_row(
                "SELECT state, escalation_counts_json, pending_request_json, updated_at
                 FROM architect_state WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(ArchitectState {
                        state: row.get(0)?,
                        escalation_counts_json: row.get(1)?,
                        pending_request_json: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    pub fn upsert_pm_state(&self, session_id: &str, state: &PmState) -> StoreResult<()> {
        debug!(%session_id, state = %state.state, "upsert_pm_state: called");
        self.conn.execute(
            "INSERT INTO pm_state (session_id, state, spec_id, draft_json, pending_request_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(session_id) DO UPDATE SET
                state = excluded.state,
                spec_id = excluded.spec_id,
                draft_json = excluded.draft_json,
                pending_request_json = excluded.pending_request_json,
                updated_at = excluded.updated_at",
            params![
                session_id,
                state.state,
                state.spec_id,
                state.draft_json,
                state.pending_request_json,
                state.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_pm_state(&self, session_id: &str) -> StoreResult<Option<PmState>> {
        debug!(%session_id, "get_pm_state: called");
        let state = self
            .conn
            .query_row(
                "SELECT state, spec_id, draft_json, pending_request_json, updated_at
                 FROM pm_state WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(PmState {
                        state: row.get(0)?,
                        spec_id: row.get(1)?,
                        draft_json: row.get(2)?,
                        pending_request_json: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    pub fn upsert_agent_context(&self, session_id: &str, context: &AgentContext) -> StoreResult<()> {
        debug!(
            %session_id,
            agent_id = %context.agent_id,
            context_type = %context.context_type,
            "upsert_agent_context: called"
        );
        self.conn.execute(
            "INSERT INTO agent_contexts (session_id, agent_id, context_type, messages_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id, agent_id, context_type) DO UPDATE SET
                messages_json = excluded.messages_json,
                updated_at = excluded.updated_at",
            params![
                session_id,
                context.agent_id,
                context.context_type,
                context.messages_json,
                context.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_agent_context(
        &self,
        session_id: &str,
        agent_id: &str,
        context_type: &str,
    ) -> StoreResult<Option<AgentContext>> {
        debug!(%session_id, %agent_id, %context_type, "get_agent_context: called");
        let context = self
            .conn
            .query_row(
                "SELECT agent_id, context_type, messages_json, updated_at FROM agent_contexts
                 WHERE session_id = ?1 AND agent_id = ?2 AND context_type = ?3",
                params![session_id, agent_id, context_type],
                context_from_row,
            )
            .optional()?;
        Ok(context)
    }

    /// All contexts of one agent
    pub fn list_agent_contexts(&self, session_id: &str, agent_id: &str) -> StoreResult<Vec<AgentContext>> {
        debug!(%session_id, %agent_id, "list_agent_contexts: called");
        let mut stmt = self.conn.prepare(
            "SELECT agent_id, context_type, messages_json, updated_at FROM agent_contexts
             WHERE session_id = ?1 AND agent_id = ?2 ORDER BY context_type",
        )?;
        let contexts = stmt
            .query_map(params![session_id, agent_id], context_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(contexts)
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

    #[test]
    fn test_missing_state_is_none() {
        let store = store();
        assert!(store.get_coder_state("s1", "coder-001").unwrap().is_none());
        assert!(store.get_architect_state("s1").unwrap().is_none());
        assert!(store.get_pm_state("s1").unwrap().is_none());
        assert!(store.get_agent_context("s1", "coder-001", "main").unwrap().is_none());
    }

    #[test]
    fn test_coder_state_is_a_whole_row_snapshot() {
        let store = store();
        let mut state = CoderState::new("coder-001", "CODING").with_story("a1b2c3d4");
        state.plan_json = Some(r#"{"steps":["one","two"]}"#.to_string());
        state.todo_list_json = Some("[1, 2,   3]".to_string());
        state.current_todo_index = 1;
        store.upsert_coder_state("s1", &state).unwrap();
        assert_eq!(store.get_coder_state("s1", "coder-001").unwrap(), Some(state));

        // A later checkpoint without a plan clears it
        let next = CoderState::new("coder-001", "WAITING");
        store.upsert_coder_state("s1", &next).unwrap();
        let loaded = store.get_coder_state("s1", "coder-001").unwrap().unwrap();
        assert_eq!(loaded.state, "WAITING");
        assert!(loaded.plan_json.is_none());
        assert!(loaded.story_id.is_none());
    }

    #[test]
    fn test_opaque_blobs_are_returned_verbatim() {
        let store = store();
        let mut state = ArchitectState::new("MONITORING");
        // Not valid JSON; never parsed
        state.escalation_counts_json = Some("{coder-001: 2,,}".to_string());
        store.upsert_architect_state("s1", &state).unwrap();
        assert_eq!(store.get_architect_state("s1").unwrap(), Some(state));
    }

    #[test]
    fn test_pm_state_round_trip() {
        let store = store();
        let mut state = PmState::new("DRAFTING");
        state.spec_id = Some("spec-1".to_string());
        state.draft_json = Some(r#"{"title":"x"}"#.to_string());
        store.upsert_pm_state("s1", &state).unwrap();
        assert_eq!(store.get_pm_state("s1").unwrap(), Some(state));
    }

    #[test]
    fn test_state_is_session_scoped() {
        let store = store();
        store.upsert_coder_state("s1", &CoderState::new("coder-001", "CODING")).unwrap();
        store.upsert_architect_state("s1", &ArchitectState::new("DISPATCHING")).unwrap();
        store.upsert_pm_state("s1", &PmState::new("IDLE")).unwrap();

        assert!(store.get_coder_state("s2", "coder-001").unwrap().is_none());
        assert!(store.get_architect_state("s2").unwrap().is_none());
        assert!(store.get_pm_state("s2").unwrap().is_none());
        assert!(store.list_coder_states("s2").unwrap().is_empty());
    }

    #[test]
    fn test_list_coder_states() {
        let store = store();
        store.upsert_coder_state("s1", &CoderState::new("coder-002", "PLANNING")).unwrap();
        store.upsert_coder_state("s1", &CoderState::new("coder-001", "CODING")).unwrap();

        let ids: Vec<String> = store
            .list_coder_states("s1")
            .unwrap()
            .into_iter()
            .map(|s| s.agent_id)
            .collect();
        assert_eq!(ids, vec!["coder-001", "coder-002"]);
    }

    #[test]
    fn test_agent_contexts() {
        let store = store();
        store
            .upsert_agent_context("s1", &AgentContext::new("coder-001", "planning", "[]"))
            .unwrap();
        store
            .upsert_agent_context("s1", &AgentContext::new("coder-001", "main", r#"[{"role":"user"}]"#))
            .unwrap();
        store
            .upsert_agent_context("s1", &AgentContext::new("coder-001", "main", r#"[{"role":"assistant"}]"#))
            .unwrap();

        let main = store.get_agent_context("s1", "coder-001", "main").unwrap().unwrap();
        assert_eq!(main.messages_json, r#"[{"role":"assistant"}]"#);

        let types: Vec<String> = store
            .list_agent_contexts("s1", "coder-001")
            .unwrap()
            .into_iter()
            .map(|c| c.context_type)
            .collect();
        assert_eq!(types, vec!["main", "planning"]);
        assert!(store.list_agent_contexts("s2", "coder-001").unwrap().is_empty());
    }
}
