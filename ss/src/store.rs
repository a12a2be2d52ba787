//! Store - the SQLite handle every component receives explicitly
//!
//! One writable `Store` per database file per process. It is constructed
//! once at startup, used by recovery, then moved into the request
//! processor which becomes its only user. Inspection tools open a separate
//! read-only handle; WAL mode lets those readers run next to the writer.
//!
//! A writable handle holds an exclusive advisory lock on `<db>.lock` for as
//! long as it lives, so a second writer fails fast instead of taking over a
//! running session.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::schema;

/// Default time to wait on a locked database before failing with `Busy`
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Connection options
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Handle to the story database
pub struct Store {
    pub(crate) conn: Connection,
    path: Option<PathBuf>,
    /// Released when the handle is dropped
    writer_lock: Option<File>,
}

/// Lock file guarding the writable handle of `path`
fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn acquire_writer_lock(path: &Path) -> StoreResult<File> {
    let lock_path = lock_path(path);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    if let Err(e) = file.try_lock_exclusive() {
        warn!(path = %path.display(), error = %e, "Database already has a writer");
        return Err(StoreError::Busy(format!(
            "{} is held by another writer ({})",
            path.display(),
            lock_path.display()
        )));
    }
    Ok(file)
}

impl Store {
    /// Open (or create) the database at `path` with default options
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with(path, &StoreOptions::default())
    }

    /// Open (or create) the database at `path`
    ///
    /// Fails with [`StoreError::Busy`] if another writable handle, in this
    /// process or another, is open on the same file. Does not touch the
    /// schema; call [`Store::ensure_schema`] next.
    pub fn open_with(path: impl AsRef<Path>, options: &StoreOptions) -> StoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Store::open_with: called");
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer_lock = acquire_writer_lock(path)?;
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA foreign_keys=ON;",
        )?;
        conn.busy_timeout(options.busy_timeout)?;

        info!(path = %path.display(), "Opened story store");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            writer_lock: Some(writer_lock),
        })
    }

    /// Open a private in-memory database (tests)
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("Store::open_in_memory: called");
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: None,
            writer_lock: None,
        })
    }

    /// Open an existing database for reading only
    ///
    /// Never takes the write lock, so it is safe to use while a daemon owns
    /// the writable handle.
    pub fn open_read_only(path: impl AsRef<Path>, options: &StoreOptions) -> StoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Store::open_read_only: called");
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(options.busy_timeout)?;
        conn.execute_batch("PRAGMA query_only=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            writer_lock: None,
        })
    }

    /// Create or migrate the schema; see [`schema::ensure_schema`]
    pub fn ensure_schema(&mut self) -> StoreResult<u32> {
        schema::ensure_schema(&mut self.conn)
    }

    pub fn schema_version(&self) -> StoreResult<u32> {
        schema::read_version(&self.conn)
    }

    /// Database file path (`None` for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("writer", &self.writer_lock.is_some())
            .finish()
    }
}
