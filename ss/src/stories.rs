//! StoryStore - specs, stories and the dependency graph
//!
//! Every statement is scoped by `session_id`. Single-statement writes are
//! atomic on their own; the batch upsert is the only multi-statement write
//! and runs in one transaction.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info, warn};

use crate::domain::{Spec, StatusUpdate, Story, StoryDependency, StoryStatus, now_ms};
use crate::error::{StoreError, StoreResult, parse_column};
use crate::query::{QueryBuilder, StoryFilter, status_values};
use crate::store::Store;

const STORY_COLUMNS: &str = "id, spec_id, title, content, status, priority, approved_plan, assigned_agent, created_at, started_at, completed_at, tokens_used, cost_usd, story_type, pr_id, commit_hash, completion_summary";

const SPEC_COLUMNS: &str = "id, content, created_at, processed_at";

fn qualified_story_columns(alias: &str) -> String {
    STORY_COLUMNS
        .split(", ")
        .map(|column| format!("{}.{}", alias, column))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Map a row selected with [`STORY_COLUMNS`]; `depends_on` is left empty
fn story_from_row(row: &Row<'_>) -> rusqlite::Result<Story> {
    Ok(Story {
        id: row.get(0)?,
        spec_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        status: parse_column(row, 4)?,
        priority: row.get(5)?,
        approved_plan: row.get(6)?,
        assigned_agent: row.get(7)?,
        created_at: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
        tokens_used: row.get(11)?,
        cost_usd: row.get(12)?,
        story_type: parse_column(row, 13)?,
        pr_id: row.get(14)?,
        commit_hash: row.get(15)?,
        completion_summary: row.get(16)?,
        depends_on: Vec::new(),
    })
}

fn spec_from_row(row: &Row<'_>) -> rusqlite::Result<Spec> {
    Ok(Spec {
        id: row.get(0)?,
        content: row.get(1)?,
        created_at: row.get(2)?,
        processed_at: row.get(3)?,
    })
}

fn write_story(conn: &Connection, session_id: &str, story: &Story) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO stories (session_id, id, spec_id, title, content, status, priority, approved_plan,
                              assigned_agent, created_at, started_at, completed_at, tokens_used, cost_usd,
                              story_type, pr_id, commit_hash, completion_summary)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
         ON CONFLICT(session_id, id) DO UPDATE SET
            spec_id = excluded.spec_id,
            title = excluded.title,
            content = excluded.content,
            status = excluded.status,
            priority = excluded.priority,
            approved_plan = excluded.approved_plan,
            assigned_agent = excluded.assigned_agent,
            created_at = excluded.created_at,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at,
            tokens_used = excluded.tokens_used,
            cost_usd = excluded.cost_usd,
            story_type = excluded.story_type,
            pr_id = excluded.pr_id,
            commit_hash = excluded.commit_hash,
            completion_summary = excluded.completion_summary",
        params![
            session_id,
            story.id,
            story.spec_id,
            story.title,
            story.content,
            story.status.as_str(),
            story.priority,
            story.approved_plan,
            story.assigned_agent,
            story.created_at,
            story.started_at,
            story.completed_at,
            story.tokens_used,
            story.cost_usd,
            story.story_type.as_str(),
            story.pr_id,
            story.commit_hash,
            story.completion_summary,
        ],
    )
    .map_err(|e| {
        StoreError::from_sqlite(e, || {
            format!("story {} (spec {}) in session {}", story.id, story.spec_id, session_id)
        })
    })?;
    Ok(())
}

fn write_dependency(conn: &Connection, session_id: &str, dep: &StoryDependency) -> StoreResult<()> {
    if dep.is_self_loop() {
        return Err(StoreError::Constraint(format!(
            "story {} cannot depend on itself in session {}",
            dep.story_id, session_id
        )));
    }
    conn.execute(
        "INSERT INTO story_dependencies (session_id, story_id, depends_on) VALUES (?1, ?2, ?3)
         ON CONFLICT(session_id, story_id, depends_on) DO NOTHING",
        params![session_id, dep.story_id, dep.depends_on],
    )
    .map_err(|e| {
        StoreError::from_sqlite(e, || {
            format!(
                "dependency {} -> {} in session {}",
                dep.story_id, dep.depends_on, session_id
            )
        })
    })?;
    Ok(())
}

impl Store {
    /// Insert or replace a spec by id
    pub fn upsert_spec(&self, session_id: &str, spec: &Spec) -> StoreResult<()> {
        debug!(%session_id, spec_id = %spec.id, "upsert_spec: called");
        self.conn
            .execute(
                "INSERT INTO specs (session_id, id, content, created_at, processed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(session_id, id) DO UPDATE SET
                    content = excluded.content,
                    created_at = excluded.created_at,
                    processed_at = excluded.processed_at",
                params![session_id, spec.id, spec.content, spec.created_at, spec.processed_at],
            )
            .map_err(|e| StoreError::from_sqlite(e, || format!("spec {} in session {}", spec.id, session_id)))?;
        Ok(())
    }

    pub fn get_spec(&self, session_id: &str, spec_id: &str) -> StoreResult<Spec> {
        debug!(%session_id, %spec_id, "get_spec: called");
        self.conn
            .query_row(
                &format!("SELECT {SPEC_COLUMNS} FROM specs WHERE session_id = ?1 AND id = ?2"),
                params![session_id, spec_id],
                spec_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("spec", spec_id))
    }

    /// Specs in creation order
    pub fn list_specs(&self, session_id: &str) -> StoreResult<Vec<Spec>> {
        debug!(%session_id, "list_specs: called");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SPEC_COLUMNS} FROM specs WHERE session_id = ?1 ORDER BY created_at ASC, id ASC"
        ))?;
        let specs = stmt
            .query_map(params![session_id], spec_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(specs)
    }

    /// Stamp `processed_at` once the spec has been broken into stories
    pub fn mark_spec_processed(&self, session_id: &str, spec_id: &str) -> StoreResult<()> {
        debug!(%session_id, %spec_id, "mark_spec_processed: called");
        let changed = self.conn.execute(
            "UPDATE specs SET processed_at = ?1 WHERE session_id = ?2 AND id = ?3",
            params![now_ms(), session_id, spec_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("spec", spec_id));
        }
        Ok(())
    }

    /// Insert or replace a story by id
    ///
    /// Only the story row is written; `story.depends_on` is ignored. Edges go
    /// through [`Store::add_story_dependency`] or the batch upsert.
    pub fn upsert_story(&self, session_id: &str, story: &Story) -> StoreResult<()> {
        debug!(%session_id, story_id = %story.id, status = %story.status, "upsert_story: called");
        write_story(&self.conn, session_id, story)
    }

    /// Load one story with its dependency list
    pub fn get_story(&self, session_id: &str, story_id: &str) -> StoreResult<Story> {
        debug!(%session_id, %story_id, "get_story: called");
        let mut story = self
            .conn
            .query_row(
                &format!("SELECT {STORY_COLUMNS} FROM stories WHERE session_id = ?1 AND id = ?2"),
                params![session_id, story_id],
                story_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("story", story_id))?;
        story.depends_on = self.get_story_dependencies(session_id, story_id)?;
        Ok(story)
    }

    /// Write stories then edges in one transaction; all or nothing
    pub fn batch_upsert_stories_with_dependencies(
        &mut self,
        session_id: &str,
        stories: &[Story],
        dependencies: &[StoryDependency],
    ) -> StoreResult<()> {
        debug!(
            %session_id,
            stories = stories.len(),
            dependencies = dependencies.len(),
            "batch_upsert_stories_with_dependencies: called"
        );
        let tx = self.conn.transaction()?;
        for story in stories {
            write_story(&tx, session_id, story)?;
        }
        for dep in dependencies {
            write_dependency(&tx, session_id, dep)?;
        }
        tx.commit()?;

        info!(
            %session_id,
            stories = stories.len(),
            dependencies = dependencies.len(),
            "Batch upserted stories"
        );
        Ok(())
    }

    /// Set a story's status and merge whatever metadata the update carries
    ///
    /// Started statuses stamp `started_at`, terminal ones stamp
    /// `completed_at`. The stamp is `update.timestamp` when given (so a
    /// repeated update is idempotent) and now otherwise. Any transition is
    /// accepted, including out of `done`; ordering is up to the caller.
    pub fn update_story_status(&self, session_id: &str, update: &StatusUpdate) -> StoreResult<()> {
        debug!(%session_id, story_id = %update.story_id, status = %update.status, "update_story_status: called");
        let timestamp = update.timestamp.filter(|ts| *ts > 0).unwrap_or_else(now_ms);
        let changed = self.conn.execute(
            "UPDATE stories SET
                status = ?1,
                started_at = CASE WHEN ?2 THEN ?3 ELSE started_at END,
                completed_at = CASE WHEN ?4 THEN ?3 ELSE completed_at END,
                assigned_agent = COALESCE(?5, assigned_agent),
                tokens_used = COALESCE(?6, tokens_used),
                cost_usd = COALESCE(?7, cost_usd),
                pr_id = COALESCE(?8, pr_id),
                commit_hash = COALESCE(?9, commit_hash),
                completion_summary = COALESCE(?10, completion_summary)
             WHERE session_id = ?11 AND id = ?12",
            params![
                update.status.as_str(),
                update.status.sets_started_at(),
                timestamp,
                update.status.sets_completed_at(),
                update.assigned_agent,
                update.tokens_used,
                update.cost_usd,
                update.pr_id,
                update.commit_hash,
                update.completion_summary,
                session_id,
                update.story_id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("story", update.story_id.as_str()));
        }
        Ok(())
    }

    pub fn add_story_dependency(&self, session_id: &str, dependency: &StoryDependency) -> StoreResult<()> {
        debug!(
            %session_id,
            story_id = %dependency.story_id,
            depends_on = %dependency.depends_on,
            "add_story_dependency: called"
        );
        write_dependency(&self.conn, session_id, dependency)
    }

    /// Remove an edge; returns false if it was not there
    pub fn remove_story_dependency(&self, session_id: &str, dependency: &StoryDependency) -> StoreResult<bool> {
        debug!(
            %session_id,
            story_id = %dependency.story_id,
            depends_on = %dependency.depends_on,
            "remove_story_dependency: called"
        );
        let changed = self.conn.execute(
            "DELETE FROM story_dependencies WHERE session_id = ?1 AND story_id = ?2 AND depends_on = ?3",
            params![session_id, dependency.story_id, dependency.depends_on],
        )?;
        Ok(changed > 0)
    }

    /// Ids the story depends on, sorted
    pub fn get_story_dependencies(&self, session_id: &str, story_id: &str) -> StoreResult<Vec<String>> {
        debug!(%session_id, %story_id, "get_story_dependencies: called");
        let mut stmt = self.conn.prepare(
            "SELECT depends_on FROM story_dependencies
             WHERE session_id = ?1 AND story_id = ?2 ORDER BY depends_on",
        )?;
        let deps = stmt
            .query_map(params![session_id, story_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(deps)
    }

    /// Stories ready to dispatch, in scheduling order
    ///
    /// A `new` story is ready when none of its dependencies exists with a
    /// status other than `done`. Order: priority descending, then oldest
    /// first.
    pub fn query_pending_stories(&self, session_id: &str) -> StoreResult<Vec<Story>> {
        debug!(%session_id, "query_pending_stories: called");
        let sql = format!(
            "SELECT {columns}
             FROM stories s
             LEFT JOIN story_dependencies d
                ON d.session_id = s.session_id AND d.story_id = s.id
             LEFT JOIN stories blocker
                ON blocker.session_id = d.session_id AND blocker.id = d.depends_on AND blocker.status <> 'done'
             WHERE s.session_id = ?1 AND s.status = 'new'
             GROUP BY s.session_id, s.id
             HAVING COUNT(blocker.id) = 0
             ORDER BY s.priority DESC, s.created_at ASC, s.id ASC",
            columns = qualified_story_columns("s")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut stories = stmt
            .query_map(params![session_id], story_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_dependencies(session_id, &mut stories)?;
        debug!(%session_id, count = stories.len(), "query_pending_stories: ready");
        Ok(stories)
    }

    /// Stories matching `filter`, highest priority first
    pub fn query_stories(&self, session_id: &str, filter: &StoryFilter) -> StoreResult<Vec<Story>> {
        debug!(%session_id, ?filter, "query_stories: called");
        let builder = QueryBuilder::scoped(
            &format!("SELECT {STORY_COLUMNS} FROM stories WHERE session_id = ?"),
            session_id,
        );
        let (sql, values) = filter
            .apply(builder)
            .order_by("priority DESC, created_at ASC, id ASC")
            .limit(filter.limit)
            .build();

        let mut stmt = self.conn.prepare(&sql)?;
        let mut stories = stmt
            .query_map(params_from_iter(values.iter()), story_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_dependencies(session_id, &mut stories)?;
        Ok(stories)
    }

    /// Every story not in {done, failed}, dependencies populated
    pub fn get_incomplete_stories_for_session(&self, session_id: &str) -> StoreResult<Vec<Story>> {
        debug!(%session_id, "get_incomplete_stories_for_session: called");
        let filter = StoryFilter::new().excluding(&StoryStatus::TERMINAL);
        self.query_stories(session_id, &filter)
    }

    /// Put every in-flight story back to `new`, unassigned and unstarted
    ///
    /// Returns how many rows changed; a second call returns 0.
    pub fn reset_in_flight_stories(&self, session_id: &str) -> StoreResult<usize> {
        debug!(%session_id, "reset_in_flight_stories: called");
        let (sql, values) = QueryBuilder::scoped(
            "UPDATE stories SET status = 'new', assigned_agent = NULL, started_at = NULL WHERE session_id = ?",
            session_id,
        )
        .and_in("status", status_values(&StoryStatus::IN_FLIGHT))
        .build();

        let reset = self.conn.execute(&sql, params_from_iter(values.iter()))?;
        if reset > 0 {
            warn!(%session_id, reset, "Reset in-flight stories to new");
        }
        Ok(reset)
    }

    /// Story count per status, ordered by status name
    pub fn story_status_counts(&self, session_id: &str) -> StoreResult<Vec<(StoryStatus, usize)>> {
        debug!(%session_id, "story_status_counts: called");
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM stories WHERE session_id = ?1 GROUP BY status ORDER BY status",
        )?;
        let counts = stmt
            .query_map(params![session_id], |row| {
                let status: StoryStatus = parse_column(row, 0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count as usize))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Fill `depends_on` for a set of stories with one query
    fn attach_dependencies(&self, session_id: &str, stories: &mut [Story]) -> StoreResult<()> {
        if stories.is_empty() {
            return Ok(());
        }
        let index: HashMap<String, usize> = stories
            .iter()
            .enumerate()
            .map(|(i, story)| (story.id.clone(), i))
            .collect();

        let mut stmt = self.conn.prepare(
            "SELECT story_id, depends_on FROM story_dependencies
             WHERE session_id = ?1 ORDER BY story_id, depends_on",
        )?;
        let mut rows = stmt.query(params![session_id])?;
        while let Some(row) = rows.next()? {
            let story_id: String = row.get(0)?;
            if let Some(&i) = index.get(&story_id) {
                stories[i].depends_on.push(row.get(1)?);
            }
        }
        Ok(())
    }
}
