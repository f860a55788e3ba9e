//! Per-tenant database handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use tokio::task;

/// A live, schema-correct handle to one tenant's SQLite database.
///
/// Exactly one `TenantDb` exists per tenant process-wide (enforced by the
/// [`TenantRegistry`]); the wrapped connection is shared and every operation
/// runs on the blocking thread pool. SQLite's WAL mode handles concurrent
/// readers against the single writer.
///
/// [`TenantRegistry`]: crate::database::TenantRegistry
#[derive(Debug, Clone)]
pub struct TenantDb {
    name: String,
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl TenantDb {
    pub(crate) fn new(name: String, path: PathBuf, conn: Connection) -> Self {
        Self {
            name,
            path,
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Tenant name this handle belongs to (e.g. `note_alice` or `member`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a closure against the connection on the blocking pool.
    ///
    /// The closure receives `&mut Connection` so it can open transactions.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut *guard)
        })
        .await
        .context("Failed to join blocking database task")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        let db = TenantDb::new("note_test".into(), PathBuf::from(":memory:"), conn);

        db.call(|conn| {
            conn.execute_batch("CREATE TABLE t (v INTEGER)")?;
            conn.execute("INSERT INTO t (v) VALUES (7)", [])?;
            Ok(())
        })
        .await
        .unwrap();

        let v: i64 = db
            .call(|conn| {
                conn.query_row("SELECT v FROM t", [], |row| row.get(0))
                    .context("query")
            })
            .await
            .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn test_call_error_propagates() {
        let conn = Connection::open_in_memory().unwrap();
        let db = TenantDb::new("note_test".into(), PathBuf::from(":memory:"), conn);

        let result = db
            .call(|conn| {
                conn.execute("INSERT INTO missing (v) VALUES (1)", [])
                    .context("insert into missing table")?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }
}
