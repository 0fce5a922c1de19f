//! SQLite-backed store.
//!
//! A single connection sits behind a coarse mutex and every call hops onto
//! the blocking pool, the same way the embedded backend always has. The
//! submodules add the schedule store, the surge tables and the run status
//! bookkeeping on top of [`Database`].

pub mod schedules;
pub mod schema;
pub mod status;
pub mod surge;

pub use schedules::ScheduleStore;
pub use surge::{AlertFilter, AlertPage, Country, FilterOptions, MolnixTag, SurgeAlert};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};

use crate::error::StoreResult;
use schema::SQLITE_SCHEMA;

/// Handle to the SQLite database. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("in_memory", &self.path.is_none())
            .finish()
    }
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db_path = path.clone();

        let conn = tokio::task::spawn_blocking(move || -> StoreResult<Connection> {
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let conn = Connection::open(&db_path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            Self::prepare(&conn)?;
            Ok(conn)
        })
        .await??;

        tracing::debug!(path = %path.display(), "SQLite database opened");

        Ok(Self {
            path: Some(path),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database. Used by tests and dry runs.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::prepare(&conn)?;
        Ok(Self {
            path: None,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn prepare(conn: &Connection) -> StoreResult<()> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SQLITE_SCHEMA)?;
        Ok(())
    }

    /// Location of the database file, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await?
    }

    /// Run `f` inside a single transaction. Commits on `Ok`, rolls back on `Err`.
    pub async fn transaction<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("surge.sqlite");
        let db = Database::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result = db
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO api_status (name, last_run) VALUES ('job', '2024-01-01 00:00:00+00:00')",
                    [],
                )?;
                Err::<(), _>(crate::error::StoreError::Corrupt("boom".into()))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = db
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM api_status", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
