//! SQLite database handle.
//!
//! One `rusqlite::Connection` serves the whole process, shared behind a
//! mutex and driven from the blocking thread pool. Store code hands
//! closures to [`Database::execute`] / [`Database::execute_mut`]; a
//! closure runs with the connection locked, so its statements never
//! interleave with another caller's.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Pragmas applied to every fresh connection.
///
/// WAL allows concurrent readers against the single writer, and NORMAL
/// sync under WAL loses at most the last transaction on a power cut.
/// Foreign keys drive the schema's cascade deletes; the busy timeout makes
/// competing writers queue instead of erroring out.
const PRAGMAS: &[(&str, &str)] = &[
    ("journal_mode", "WAL"),
    ("synchronous", "NORMAL"),
    ("foreign_keys", "ON"),
    ("busy_timeout", "5000"),
];

/// Thread-safe handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file.
    ///
    /// Blocks briefly on file I/O; call during startup or from
    /// `spawn_blocking`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Open a database file and bring its schema up to date in one call.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(migration::run_all).await
    }

    /// Run a closure against the locked connection on the blocking pool.
    ///
    /// This is the primary way store code talks to SQLite.
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_connection(move |conn| f(conn)).await
    }

    /// Like [`Database::execute`], but the closure receives
    /// `&mut Connection` so it can open transactions via
    /// `conn.transaction()`.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_connection(f).await
    }

    // ── internals ────────────────────────────────────────────────────

    async fn with_connection<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&mut *lock(&conn)?)).await?
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        for &(pragma, value) in PRAGMAS {
            conn.pragma_update(None, pragma, value)?;
        }
        debug!("connection configured (WAL, foreign keys, 5s busy timeout)");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

/// Lock the connection, turning a poisoned mutex (a panicked writer on the
/// blocking pool) into a store error instead of a panic cascade.
fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| StoreError::TaskJoin(format!("connection mutex poisoned: {e}")))
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_works() {
        let db = Database::open_in_memory().unwrap();
        let version: String = db
            .execute(|conn| {
                let v: String = conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
                Ok(v)
            })
            .await
            .unwrap();
        assert!(!version.is_empty());
    }

    #[tokio::test]
    async fn migrations_run_on_fresh_db() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();

        let count: i64 = db
            .execute(|conn| {
                let c: i64 =
                    conn.query_row("SELECT count(*) FROM conversations", [], |row| row.get(0))?;
                Ok(c)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn foreign_keys_enforced() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();

        // A message pointing at a missing conversation must be rejected.
        let result = db
            .execute(|conn| {
                conn.execute(
                    "INSERT INTO messages (id, conversation_id, content, run_id, created_at) \
                     VALUES ('m1', 'no-such-conv', 'hi', 'r1', 0)",
                    [],
                )?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn execute_mut_supports_transactions() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();

        // A rolled-back transaction leaves no trace.
        db.execute_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, created_at, updated_at) VALUES ('c1', 0, 0)",
                [],
            )?;
            tx.rollback()?;
            Ok(())
        })
        .await
        .unwrap();

        let count: i64 = db
            .execute(|conn| {
                let c: i64 =
                    conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
                Ok(c)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
