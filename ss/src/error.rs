//! Store error taxonomy

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors returned by [`crate::Store`] operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The keyed row does not exist in the given session
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A constraint was violated (self-dependency, missing foreign key, ...)
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A status string that is not a known story or session status
    #[error("invalid status: {0}")]
    InvalidStatus(String),

    /// A schema migration step failed; the previous version remains recorded
    #[error("migration to schema version {version} failed: {source}")]
    Migration {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },

    /// The on-disk schema is newer than this build understands
    #[error("unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The database stayed locked for longer than the busy timeout
    #[error("database busy: {0}")]
    Busy(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Row mappers report unparseable enum columns as conversion failures
/// carrying a `StoreError`; unwrap those back into the original error.
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::FromSqlConversionFailure(idx, ty, inner) => match inner.downcast::<StoreError>() {
                Ok(store_err) => *store_err,
                Err(inner) => Self::Sqlite(rusqlite::Error::FromSqlConversionFailure(idx, ty, inner)),
            },
            other => match other.sqlite_error_code() {
                Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => Self::Busy(other.to_string()),
                _ => Self::Sqlite(other),
            },
        }
    }
}

/// Parse a TEXT column into one of the domain enums
pub(crate) fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = StoreError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: StoreError| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// True for the distinguished "legitimately absent" condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Classify a rusqlite error, attaching `context` (the offending ids) to
    /// constraint and lock failures.
    pub(crate) fn from_sqlite(err: rusqlite::Error, context: impl FnOnce() -> String) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Self::Constraint(format!("{}: {}", context(), err)),
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::Busy(format!("{}: {}", context(), err))
            }
            _ => Self::from(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = StoreError::not_found("story", "abc123");
        assert_eq!(err.to_string(), "story not found: abc123");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_constraint_classification() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY);").unwrap();
        conn.execute("INSERT INTO t (id) VALUES ('a')", []).unwrap();
        let err = conn.execute("INSERT INTO t (id) VALUES ('a')", []).unwrap_err();

        let classified = StoreError::from_sqlite(err, || "t a".to_string());
        match classified {
            StoreError::Constraint(msg) => assert!(msg.starts_with("t a:")),
            other => panic!("expected constraint error, got {other:?}"),
        }
    }

    #[test]
    fn test_conversion_failure_unwraps_invalid_status() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = conn
            .query_row("SELECT 'bogus'", [], |row| parse_column::<crate::StoryStatus>(row, 0))
            .unwrap_err();
        assert!(matches!(StoreError::from(err), StoreError::InvalidStatus(_)));
    }

    #[test]
    fn test_other_errors_pass_through() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = conn.execute("SELECT * FROM missing_table", []).unwrap_err();
        assert!(matches!(
            StoreError::from_sqlite(err, String::new),
            StoreError::Sqlite(_)
        ));
    }
}
