//! Schema creation and versioned migrations
//!
//! The single-row `schema_version` table is the only compatibility contract
//! with databases already on disk. Migrations are numbered, applied in
//! order, each in its own transaction together with the version bump, and
//! must never be reordered or renumbered once shipped.

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Schema version this build creates and migrates to
pub const CURRENT_SCHEMA_VERSION: u32 = 6;

type Migration = fn(&Transaction<'_>) -> rusqlite::Result<()>;

/// Steps from version N-1 to N. Version 1 is the baseline and is never
/// migrated to; a database without a version gets [`FULL_SCHEMA`] instead.
const MIGRATIONS: &[(u32, Migration)] = &[
    (2, migrate_v2_sessions),
    (3, migrate_v3_story_type),
    (4, migrate_v4_agent_state),
    (5, migrate_v5_completion_metadata),
    (6, migrate_v6_status_backfill),
];

/// Current schema, created in one pass on an empty database
const FULL_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id  TEXT PRIMARY KEY,
    started_at  INTEGER NOT NULL,
    ended_at    INTEGER,
    status      TEXT NOT NULL DEFAULT 'active',
    config_json TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

CREATE TABLE IF NOT EXISTS specs (
    session_id   TEXT NOT NULL,
    id           TEXT NOT NULL,
    content      TEXT NOT NULL,
    created_at   INTEGER NOT NULL,
    processed_at INTEGER,
    PRIMARY KEY (session_id, id)
);
CREATE INDEX IF NOT EXISTS idx_specs_session ON specs(session_id);

CREATE TABLE IF NOT EXISTS stories (
    session_id     TEXT NOT NULL,
    id             TEXT NOT NULL,
    spec_id        TEXT NOT NULL,
    title          TEXT NOT NULL,
    content        TEXT NOT NULL DEFAULT '',
    status         TEXT NOT NULL DEFAULT 'new',
    priority       INTEGER NOT NULL DEFAULT 0,
    approved_plan  TEXT,
    assigned_agent TEXT,
    created_at     INTEGER NOT NULL,
    started_at     INTEGER,
    completed_at   INTEGER,
    tokens_used    INTEGER NOT NULL DEFAULT 0,
    cost_usd       REAL NOT NULL DEFAULT 0,
    story_type     TEXT NOT NULL DEFAULT 'app',
    pr_id          TEXT,
    commit_hash    TEXT,
    completion_summary TEXT,
    PRIMARY KEY (session_id, id),
    FOREIGN KEY (session_id, spec_id) REFERENCES specs(session_id, id)
);
CREATE INDEX IF NOT EXISTS idx_stories_session ON stories(session_id);
CREATE INDEX IF NOT EXISTS idx_stories_session_status ON stories(session_id, status);

CREATE TABLE IF NOT EXISTS story_dependencies (
    session_id TEXT NOT NULL,
    story_id   TEXT NOT NULL,
    depends_on TEXT NOT NULL,
    PRIMARY KEY (session_id, story_id, depends_on),
    CHECK (story_id <> depends_on),
    FOREIGN KEY (session_id, story_id) REFERENCES stories(session_id, id),
    FOREIGN KEY (session_id, depends_on) REFERENCES stories(session_id, id)
);
CREATE INDEX IF NOT EXISTS idx_story_dependencies_session ON story_dependencies(session_id);
CREATE INDEX IF NOT EXISTS idx_story_dependencies_depends_on ON story_dependencies(session_id, depends_on);

CREATE TABLE IF NOT EXISTS agent_requests (
    session_id     TEXT NOT NULL,
    id             TEXT NOT NULL,
    request_type   TEXT NOT NULL,
    from_agent     TEXT NOT NULL,
    to_agent       TEXT NOT NULL,
    story_id       TEXT,
    content        TEXT NOT NULL,
    approval_type  TEXT,
    reason         TEXT,
    correlation_id TEXT,
    parent_msg_id  TEXT,
    created_at     INTEGER NOT NULL,
    PRIMARY KEY (session_id, id)
);
CREATE INDEX IF NOT EXISTS idx_agent_requests_session ON agent_requests(session_id);
CREATE INDEX IF NOT EXISTS idx_agent_requests_correlation ON agent_requests(session_id, correlation_id);

CREATE TABLE IF NOT EXISTS agent_responses (
    session_id     TEXT NOT NULL,
    id             TEXT NOT NULL,
    request_id     TEXT NOT NULL,
    response_type  TEXT NOT NULL,
    from_agent     TEXT NOT NULL,
    to_agent       TEXT NOT NULL,
    story_id       TEXT,
    content        TEXT NOT NULL,
    status         TEXT,
    feedback       TEXT,
    correlation_id TEXT,
    created_at     INTEGER NOT NULL,
    PRIMARY KEY (session_id, id)
);
CREATE INDEX IF NOT EXISTS idx_agent_responses_session ON agent_responses(session_id);
CREATE INDEX IF NOT EXISTS idx_agent_responses_request ON agent_responses(session_id, request_id);

CREATE TABLE IF NOT EXISTS agent_plans (
    session_id  TEXT NOT NULL,
    id          TEXT NOT NULL,
    story_id    TEXT NOT NULL,
    from_agent  TEXT NOT NULL,
    content     TEXT NOT NULL,
    confidence  TEXT,
    status      TEXT NOT NULL DEFAULT 'submitted',
    feedback    TEXT,
    reviewed_by TEXT,
    reviewed_at INTEGER,
    created_at  INTEGER NOT NULL,
    PRIMARY KEY (session_id, id)
);
CREATE INDEX IF NOT EXISTS idx_agent_plans_session ON agent_plans(session_id);
CREATE INDEX IF NOT EXISTS idx_agent_plans_story ON agent_plans(session_id, story_id);

CREATE TABLE IF NOT EXISTS agent_contexts (
    session_id    TEXT NOT NULL,
    agent_id      TEXT NOT NULL,
    context_type  TEXT NOT NULL,
    messages_json TEXT NOT NULL,
    updated_at    INTEGER NOT NULL,
    PRIMARY KEY (session_id, agent_id, context_type)
);
CREATE INDEX IF NOT EXISTS idx_agent_contexts_session ON agent_contexts(session_id);

CREATE TABLE IF NOT EXISTS coder_state (
    session_id           TEXT NOT NULL,
    agent_id             TEXT NOT NULL,
    story_id             TEXT,
    state                TEXT NOT NULL,
    plan_json            TEXT,
    todo_list_json       TEXT,
    current_todo_index   INTEGER NOT NULL DEFAULT 0,
    knowledge_pack_json  TEXT,
    pending_request_json TEXT,
    container_image      TEXT,
    updated_at           INTEGER NOT NULL,
    PRIMARY KEY (session_id, agent_id)
);
CREATE INDEX IF NOT EXISTS idx_coder_state_session ON coder_state(session_id);

CREATE TABLE IF NOT EXISTS architect_state (
    session_id             TEXT PRIMARY KEY,
    state                  TEXT NOT NULL,
    escalation_counts_json TEXT,
    pending_request_json   TEXT,
    updated_at             INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_architect_state_session ON architect_state(session_id);

CREATE TABLE IF NOT EXISTS pm_state (
    session_id           TEXT PRIMARY KEY,
    state                TEXT NOT NULL,
    spec_id              TEXT,
    draft_json           TEXT,
    pending_request_json TEXT,
    updated_at           INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pm_state_session ON pm_state(session_id);
";

/// Bring the database to [`CURRENT_SCHEMA_VERSION`]
///
/// Idempotent: safe to call on every startup. Returns the resulting version.
pub fn ensure_schema(conn: &mut Connection) -> StoreResult<u32> {
    debug!("ensure_schema: called");
    let current = read_version(conn)?;

    if current > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: current,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current == 0 {
        create_full_schema(conn)?;
        info!(version = CURRENT_SCHEMA_VERSION, "Created database schema");
        return Ok(CURRENT_SCHEMA_VERSION);
    }

    if current == CURRENT_SCHEMA_VERSION {
        debug!(version = current, "ensure_schema: schema up to date");
        return Ok(current);
    }

    apply_migrations(conn, current, MIGRATIONS)
}

/// Recorded schema version, 0 when the database has never been initialized
pub fn read_version(conn: &Connection) -> StoreResult<u32> {
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !exists {
        return Ok(0);
    }

    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0) as u32)
}

fn write_version(tx: &Transaction<'_>, version: u32) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM schema_version", [])?;
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", params![version as i64])?;
    Ok(())
}

fn create_full_schema(conn: &mut Connection) -> StoreResult<()> {
    let wrap = |source| StoreError::Migration {
        version: CURRENT_SCHEMA_VERSION,
        source,
    };
    let tx = conn.transaction()?;
    tx.execute_batch(FULL_SCHEMA).map_err(wrap)?;
    write_version(&tx, CURRENT_SCHEMA_VERSION).map_err(wrap)?;
    tx.commit().map_err(wrap)?;
    Ok(())
}

/// Apply every migration newer than `current`, one transaction per step
///
/// A failing step rolls back on its own; earlier steps stay committed and
/// their version stays recorded.
fn apply_migrations(conn: &mut Connection, current: u32, migrations: &[(u32, Migration)]) -> StoreResult<u32> {
    let mut version = current;
    for &(target, migrate) in migrations.iter().filter(|(v, _)| *v > current) {
        debug!(from = version, to = target, "apply_migrations: applying step");
        let wrap = |source| StoreError::Migration { version: target, source };
        let tx = conn.transaction()?;
        migrate(&tx).map_err(wrap)?;
        write_version(&tx, target).map_err(wrap)?;
        tx.commit().map_err(wrap)?;
        info!(version = target, "Applied schema migration");
        version = target;
    }
    Ok(version)
}

fn migrate_v2_sessions(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE TABLE sessions (
            session_id  TEXT PRIMARY KEY,
            started_at  INTEGER NOT NULL,
            ended_at    INTEGER,
            status      TEXT NOT NULL DEFAULT 'active',
            config_json TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX idx_sessions_status ON sessions(status);",
    )
}

fn migrate_v3_story_type(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch("ALTER TABLE stories ADD COLUMN story_type TEXT NOT NULL DEFAULT 'app';")
}

fn migrate_v4_agent_state(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE TABLE agent_contexts (
            session_id    TEXT NOT NULL,
            agent_id      TEXT NOT NULL,
            context_type  TEXT NOT NULL,
            messages_json TEXT NOT NULL,
            updated_at    INTEGER NOT NULL,
            PRIMARY KEY (session_id, agent_id, context_type)
        );
        CREATE INDEX idx_agent_contexts_session ON agent_contexts(session_id);

        CREATE TABLE coder_state (
            session_id           TEXT NOT NULL,
            agent_id             TEXT NOT NULL,
            story_id             TEXT,
            state                TEXT NOT NULL,
            plan_json            TEXT,
            todo_list_json       TEXT,
            current_todo_index   INTEGER NOT NULL DEFAULT 0,
            knowledge_pack_json  TEXT,
            pending_request_json TEXT,
            container_image      TEXT,
            updated_at           INTEGER NOT NULL,
            PRIMARY KEY (session_id, agent_id)
        );
        CREATE INDEX idx_coder_state_session ON coder_state(session_id);

        CREATE TABLE architect_state (
            session_id             TEXT PRIMARY KEY,
            state                  TEXT NOT NULL,
            escalation_counts_json TEXT,
            pending_request_json   TEXT,
            updated_at             INTEGER NOT NULL
        );
        CREATE INDEX idx_architect_state_session ON architect_state(session_id);

        CREATE TABLE pm_state (
            session_id           TEXT PRIMARY KEY,
            state                TEXT NOT NULL,
            spec_id              TEXT,
            draft_json           TEXT,
            pending_request_json TEXT,
            updated_at           INTEGER NOT NULL
        );
        CREATE INDEX idx_pm_state_session ON pm_state(session_id);",
    )
}

fn migrate_v5_completion_metadata(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "ALTER TABLE stories ADD COLUMN pr_id TEXT;
        ALTER TABLE stories ADD COLUMN commit_hash TEXT;
        ALTER TABLE stories ADD COLUMN completion_summary TEXT;",
    )
}

/// Map baseline statuses onto the current lifecycle
fn migrate_v6_status_backfill(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "UPDATE stories SET status = 'review' WHERE status = 'committed';
        UPDATE stories SET status = 'done' WHERE status IN ('merged', 'duplicate');
        UPDATE stories SET status = 'failed' WHERE status = 'error';
        CREATE INDEX idx_stories_session_status ON stories(session_id, status);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    /// Version 1 layout as it shipped
    const BASELINE_SCHEMA: &str = "
    CREATE TABLE schema_version (version INTEGER NOT NULL);
    INSERT INTO schema_version (version) VALUES (1);

    CREATE TABLE specs (
        session_id   TEXT NOT NULL,
        id           TEXT NOT NULL,
        content      TEXT NOT NULL,
        created_at   INTEGER NOT NULL,
        processed_at INTEGER,
        PRIMARY KEY (session_id, id)
    );
    CREATE INDEX idx_specs_session ON specs(session_id);

    CREATE TABLE stories (
        session_id     TEXT NOT NULL,
        id             TEXT NOT NULL,
        spec_id        TEXT NOT NULL,
        title          TEXT NOT NULL,
        content        TEXT NOT NULL DEFAULT '',
        status         TEXT NOT NULL DEFAULT 'new',
        priority       INTEGER NOT NULL DEFAULT 0,
        approved_plan  TEXT,
        assigned_agent TEXT,
        created_at     INTEGER NOT NULL,
        started_at     INTEGER,
        completed_at   INTEGER,
        tokens_used    INTEGER NOT NULL DEFAULT 0,
        cost_usd       REAL NOT NULL DEFAULT 0,
        PRIMARY KEY (session_id, id),
        FOREIGN KEY (session_id, spec_id) REFERENCES specs(session_id, id)
    );
    CREATE INDEX idx_stories_session ON stories(session_id);

    CREATE TABLE story_dependencies (
        session_id TEXT NOT NULL,
        story_id   TEXT NOT NULL,
        depends_on TEXT NOT NULL,
        PRIMARY KEY (session_id, story_id, depends_on),
        CHECK (story_id <> depends_on),
        FOREIGN KEY (session_id, story_id) REFERENCES stories(session_id, id),
        FOREIGN KEY (session_id, depends_on) REFERENCES stories(session_id, id)
    );
    CREATE INDEX idx_story_dependencies_session ON story_dependencies(session_id);
    CREATE INDEX idx_story_dependencies_depends_on ON story_dependencies(session_id, depends_on);

    CREATE TABLE agent_requests (
        session_id     TEXT NOT NULL,
        id             TEXT NOT NULL,
        request_type   TEXT NOT NULL,
        from_agent     TEXT NOT NULL,
        to_agent       TEXT NOT NULL,
        story_id       TEXT,
        content        TEXT NOT NULL,
        approval_type  TEXT,
        reason         TEXT,
        correlation_id TEXT,
        parent_msg_id  TEXT,
        created_at     INTEGER NOT NULL,
        PRIMARY KEY (session_id, id)
    );
    CREATE INDEX idx_agent_requests_session ON agent_requests(session_id);
    CREATE INDEX idx_agent_requests_correlation ON agent_requests(session_id, correlation_id);

    CREATE TABLE agent_responses (
        session_id     TEXT NOT NULL,
        id             TEXT NOT NULL,
        request_id     TEXT NOT NULL,
        response_type  TEXT NOT NULL,
        from_agent     TEXT NOT NULL,
        to_agent       TEXT NOT NULL,
        story_id       TEXT,
        content        TEXT NOT NULL,
        status         TEXT,
        feedback       TEXT,
        correlation_id TEXT,
        created_at     INTEGER NOT NULL,
        PRIMARY KEY (session_id, id)
    );
    CREATE INDEX idx_agent_responses_session ON agent_responses(session_id);
    CREATE INDEX idx_agent_responses_request ON agent_responses(session_id, request_id);

    CREATE TABLE agent_plans (
        session_id  TEXT NOT NULL,
        id          TEXT NOT NULL,
        story_id    TEXT NOT NULL,
        from_agent  TEXT NOT NULL,
        content     TEXT NOT NULL,
        confidence  TEXT,
        status      TEXT NOT NULL DEFAULT 'submitted',
        feedback    TEXT,
        reviewed_by TEXT,
        reviewed_at INTEGER,
        created_at  INTEGER NOT NULL,
        PRIMARY KEY (session_id, id)
    );
    CREATE INDEX idx_agent_plans_session ON agent_plans(session_id);
    CREATE INDEX idx_agent_plans_story ON agent_plans(session_id, story_id);
    ";

    type ColumnInfo = (String, String, String, bool, Option<String>);

    /// Every (table, column, type, notnull, default) plus every index name
    fn describe(conn: &Connection) -> (BTreeSet<ColumnInfo>, BTreeSet<String>) {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        let mut columns = BTreeSet::new();
        for table in tables {
            let mut info = conn.prepare(&format!("PRAGMA table_info({})", table)).unwrap();
            let rows = info
                .query_map([], |row| {
                    Ok((
                        table.clone(),
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })
                .unwrap();
            for row in rows {
                columns.insert(row.unwrap());
            }
        }

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name NOT LIKE 'sqlite_%'")
            .unwrap();
        let indexes: BTreeSet<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        (columns, indexes)
    }

    fn baseline_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn.execute_batch(BASELINE_SCHEMA).unwrap();
        conn
    }

    #[test]
    fn test_migrations_are_contiguous() {
        let versions: Vec<u32> = MIGRATIONS.iter().map(|(v, _)| *v).collect();
        let expected: Vec<u32> = (2..=CURRENT_SCHEMA_VERSION).collect();
        assert_eq!(versions, expected);
    }

    #[test]
    fn test_fresh_database_gets_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_version(&conn).unwrap(), 0);

        let version = ensure_schema(&mut conn).unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
        assert_eq!(read_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&mut conn).unwrap();
        let before = describe(&conn);

        assert_eq!(ensure_schema(&mut conn).unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(describe(&conn), before);
    }

    #[test]
    fn test_every_scoped_table_has_session_id() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&mut conn).unwrap();
        let (columns, indexes) = describe(&conn);

        for table in [
            "specs",
            "stories",
            "story_dependencies",
            "agent_contexts",
            "coder_state",
            "architect_state",
            "pm_state",
            "agent_requests",
            "agent_responses",
            "agent_plans",
        ] {
            assert!(
                columns.iter().any(|(t, c, ..)| t == table && c == "session_id"),
                "{table} is missing session_id"
            );
            assert!(
                indexes.contains(&format!("idx_{}_session", table)),
                "{table} is missing its session index"
            );
        }
    }

    #[test]
    fn test_baseline_migrates_to_same_shape_as_fresh() {
        let mut migrated = baseline_db();
        assert_eq!(read_version(&migrated).unwrap(), 1);
        assert_eq!(ensure_schema(&mut migrated).unwrap(), CURRENT_SCHEMA_VERSION);

        let mut fresh = Connection::open_in_memory().unwrap();
        ensure_schema(&mut fresh).unwrap();

        assert_eq!(describe(&migrated), describe(&fresh));
    }

    #[test]
    fn test_legacy_statuses_are_backfilled() {
        let mut conn = baseline_db();
        conn.execute_batch(
            "INSERT INTO specs (session_id, id, content, created_at) VALUES ('s', 'spec', 'x', 1);
            INSERT INTO stories (session_id, id, spec_id, title, status, created_at) VALUES
                ('s', 'a', 'spec', 'A', 'committed', 1),
                ('s', 'b', 'spec', 'B', 'merged', 1),
                ('s', 'c', 'spec', 'C', 'error', 1),
                ('s', 'd', 'spec', 'D', 'duplicate', 1),
                ('s', 'e', 'spec', 'E', 'coding', 1);",
        )
        .unwrap();

        ensure_schema(&mut conn).unwrap();

        let status = |id: &str| -> String {
            conn.query_row("SELECT status FROM stories WHERE id = ?1", [id], |row| row.get(0))
                .unwrap()
        };
        assert_eq!(status("a"), "review");
        assert_eq!(status("b"), "done");
        assert_eq!(status("c"), "failed");
        assert_eq!(status("d"), "done");
        assert_eq!(status("e"), "coding");

        let story_type: String = conn
            .query_row("SELECT story_type FROM stories WHERE id = 'a'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(story_type, "app");
    }

    #[test]
    fn test_failed_migration_keeps_previous_version() {
        fn broken(tx: &Transaction<'_>) -> rusqlite::Result<()> {
            tx.execute_batch("ALTER TABLE no_such_table ADD COLUMN x TEXT;")
        }
        let steps: &[(u32, Migration)] = &[(2, migrate_v2_sessions), (3, broken)];

        let mut conn = baseline_db();
        let err = apply_migrations(&mut conn, 1, steps).unwrap_err();

        match err {
            StoreError::Migration { version, .. } => assert_eq!(version, 3),
            other => panic!("expected migration error, got {other:?}"),
        }
        // Step 2 committed, step 3 rolled back
        assert_eq!(read_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE schema_version (version INTEGER NOT NULL); INSERT INTO schema_version VALUES (99);")
            .unwrap();

        let err = ensure_schema(&mut conn).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion { found: 99, .. }));
    }
}
