//! Parameterized query building for optional filters
//!
//! Column names and SQL fragments come from this crate; every caller value
//! is bound as a parameter, never spliced into the SQL text.

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::domain::{StoryStatus, StoryType};

/// Appends `AND` predicates to a fixed statement template
#[derive(Debug)]
pub(crate) struct QueryBuilder {
    sql: String,
    values: Vec<Value>,
}

impl QueryBuilder {
    /// Start from a template that already ends in a `WHERE` clause scoped to
    /// one session: the session id is bound as the first parameter.
    pub(crate) fn scoped(template: &str, session_id: &str) -> Self {
        Self {
            sql: template.to_string(),
            values: vec![Value::Text(session_id.to_string())],
        }
    }

    pub(crate) fn and_eq(mut self, column: &'static str, value: Value) -> Self {
        self.sql.push_str(&format!(" AND {} = ?", column));
        self.values.push(value);
        self
    }

    /// `column IN (...)`; an empty set matches nothing
    pub(crate) fn and_in(mut self, column: &'static str, values: Vec<Value>) -> Self {
        if values.is_empty() {
            self.sql.push_str(" AND 0");
            return self;
        }
        self.sql
            .push_str(&format!(" AND {} IN ({})", column, placeholders(values.len())));
        self.values.extend(values);
        self
    }

    /// `column NOT IN (...)`; an empty set excludes nothing
    pub(crate) fn and_not_in(mut self, column: &'static str, values: Vec<Value>) -> Self {
        if values.is_empty() {
            return self;
        }
        self.sql
            .push_str(&format!(" AND {} NOT IN ({})", column, placeholders(values.len())));
        self.values.extend(values);
        self
    }

    pub(crate) fn order_by(mut self, clause: &'static str) -> Self {
        self.sql.push_str(" ORDER BY ");
        self.sql.push_str(clause);
        self
    }

    pub(crate) fn limit(mut self, limit: Option<usize>) -> Self {
        if let Some(n) = limit {
            self.sql.push_str(" LIMIT ?");
            self.values.push(Value::Integer(n as i64));
        }
        self
    }

    pub(crate) fn build(self) -> (String, Vec<Value>) {
        (self.sql, self.values)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub(crate) fn status_values(statuses: &[StoryStatus]) -> Vec<Value> {
    statuses.iter().map(|s| Value::Text(s.as_str().to_string())).collect()
}

/// Optional filters for [`crate::Store::query_stories`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryFilter {
    /// Only these statuses (empty = any)
    pub statuses: Vec<StoryStatus>,
    /// Never these statuses
    pub exclude_statuses: Vec<StoryStatus>,
    pub spec_id: Option<String>,
    pub assigned_agent: Option<String>,
    pub story_type: Option<StoryType>,
    pub limit: Option<usize>,
}

impl StoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: StoryStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn excluding(mut self, statuses: &[StoryStatus]) -> Self {
        self.exclude_statuses.extend_from_slice(statuses);
        self
    }

    pub fn for_spec(mut self, spec_id: impl Into<String>) -> Self {
        self.spec_id = Some(spec_id.into());
        self
    }

    pub fn assigned_to(mut self, agent_id: impl Into<String>) -> Self {
        self.assigned_agent = Some(agent_id.into());
        self
    }

    pub fn of_type(mut self, story_type: StoryType) -> Self {
        self.story_type = Some(story_type);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Apply the filter's predicates to a session-scoped builder
    pub(crate) fn apply(&self, mut builder: QueryBuilder) -> QueryBuilder {
        if !self.statuses.is_empty() {
            builder = builder.and_in("status", status_values(&self.statuses));
        }
        builder = builder.and_not_in("status", status_values(&self.exclude_statuses));
        if let Some(spec_id) = &self.spec_id {
            builder = builder.and_eq("spec_id", Value::Text(spec_id.clone()));
        }
        if let Some(agent) = &self.assigned_agent {
            builder = builder.and_eq("assigned_agent", Value::Text(agent.clone()));
        }
        if let Some(story_type) = self.story_type {
            builder = builder.and_eq("story_type", Value::Text(story_type.as_str().to_string()));
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_builder_binds_session_first() {
        let (sql, values) = QueryBuilder::scoped("SELECT id FROM stories WHERE session_id = ?", "s1").build();
        assert_eq!(sql, "SELECT id FROM stories WHERE session_id = ?");
        assert_eq!(values, vec![Value::Text("s1".to_string())]);
    }

    #[test]
    fn test_filter_values_are_never_inlined() {
        let filter = StoryFilter::new()
            .with_status(StoryStatus::New)
            .for_spec("x'); DROP TABLE stories; --")
            .limit(5);
        let builder = QueryBuilder::scoped("SELECT id FROM stories WHERE session_id = ?", "s1");
        let (sql, values) = filter.apply(builder).limit(filter.limit).build();

        assert!(!sql.contains("DROP"));
        assert_eq!(
            sql,
            "SELECT id FROM stories WHERE session_id = ? AND status IN (?) AND spec_id = ? LIMIT ?"
        );
        assert_eq!(values.len(), 4);
        assert_eq!(values[3], Value::Integer(5));
    }

    #[test]
    fn test_empty_in_matches_nothing_and_empty_not_in_is_dropped() {
        let (sql, values) = QueryBuilder::scoped("SELECT 1 WHERE ? IS NOT NULL", "s")
            .and_in("status", Vec::new())
            .and_not_in("status", Vec::new())
            .build();
        assert_eq!(sql, "SELECT 1 WHERE ? IS NOT NULL AND 0");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_order_by_and_not_in() {
        let (sql, values) = QueryBuilder::scoped("SELECT id FROM stories WHERE session_id = ?", "s")
            .and_not_in("status", status_values(&StoryStatus::TERMINAL))
            .order_by("priority DESC")
            .build();
        assert_eq!(
            sql,
            "SELECT id FROM stories WHERE session_id = ? AND status NOT IN (?, ?) ORDER BY priority DESC"
        );
        assert_eq!(values[1], Value::Text("done".to_string()));
    }
}
