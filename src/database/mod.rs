//! Tenant database manager.
//!
//! Resolves a tenant name to a live, schema-correct SQLite handle. Handles
//! are cached so each tenant has at most one open connection process-wide;
//! concurrent `acquire` calls for the same tenant collapse into a single
//! initialization attempt, while different tenants initialize independently.
//!
//! A corrupt tenant file is backed up to a timestamped path and recreated
//! once; a second failure surfaces as an initialization error and the cache
//! entry is evicted so a later request can retry cleanly.

pub mod schema;
pub mod tenant;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode};
use tokio::sync::OnceCell;
use tokio::task;

pub use tenant::TenantDb;

/// Name of the shared identity database.
pub const IDENTITY_DB: &str = "member";

/// Which schema a database name maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbKind {
    /// Shared `users` table.
    Identity,
    /// Per-user notes schema.
    Tenant,
}

impl DbKind {
    fn for_name(name: &str) -> Self {
        if name == IDENTITY_DB {
            Self::Identity
        } else {
            Self::Tenant
        }
    }
}

/// Registry of open tenant database handles.
///
/// This is the composition root's single piece of shared mutable storage
/// state; it is injected into every component that touches a database.
#[derive(Debug)]
pub struct TenantRegistry {
    base_dir: PathBuf,
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<TenantDb>>>>>,
    init_count: AtomicU64,
}

impl TenantRegistry {
    /// Create a registry rooted at `base_dir`. The directory is created on
    /// first acquire.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            cells: Mutex::new(HashMap::new()),
            init_count: AtomicU64::new(0),
        }
    }

    /// Path of the database file for a tenant name.
    pub fn db_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{name}.sqlite"))
    }

    /// Number of schema-initialization sequences that have run.
    pub fn init_count(&self) -> u64 {
        self.init_count.load(Ordering::Relaxed)
    }

    /// Acquire the handle for a tenant, initializing it on first use.
    ///
    /// Idempotent and safe under concurrent callers for the same tenant:
    /// the per-tenant cell guarantees a single initialization, and a failed
    /// initialization leaves no poisoned entry behind.
    pub async fn acquire(&self, name: &str) -> Result<Arc<TenantDb>> {
        validate_name(name)?;

        let cell = {
            let mut cells = self.cells.lock();
            Arc::clone(cells.entry(name.to_string()).or_default())
        };

        let result = cell.get_or_try_init(|| self.initialize(name)).await.cloned();

        if result.is_err() {
            self.evict_stale(name, &cell);
        }

        result
    }

    /// Remove the map entry for `name` only if it still holds `cell` and the
    /// cell never produced a handle.
    ///
    /// A concurrent caller can replace the entry, or retry the same cell and
    /// succeed, between this caller's failure and the lock below; either way
    /// the live handle must stay tracked so no second handle is ever built
    /// for the tenant.
    fn evict_stale(&self, name: &str, cell: &Arc<OnceCell<Arc<TenantDb>>>) {
        let mut cells = self.cells.lock();
        let stale = cells
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, cell) && current.get().is_none());
        if stale {
            cells.remove(name);
        }
    }

    /// Acquire the shared identity database.
    pub async fn identity(&self) -> Result<Arc<TenantDb>> {
        self.acquire(IDENTITY_DB).await
    }

    /// Drop the cached handle for a tenant, if any.
    ///
    /// The next `acquire` reopens the file from disk. Used before the bulk
    /// `save` path replaces the file wholesale.
    pub fn evict(&self, name: &str) {
        if self.cells.lock().remove(name).is_some() {
            tracing::debug!(tenant = name, "Evicted tenant handle");
        }
    }

    async fn initialize(&self, name: &str) -> Result<Arc<TenantDb>> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .context("Failed to create database directory")?;

        let path = self.db_path(name);
        let kind = DbKind::for_name(name);
        let tenant = name.to_string();

        let open_path = path.clone();
        let conn = task::spawn_blocking(move || -> Result<Connection> {
            match open_and_init(&open_path, kind) {
                Ok(conn) => Ok(conn),
                Err(err) if is_corruption(&err) => {
                    tracing::warn!(
                        tenant = %tenant,
                        error = %err,
                        "Database is corrupt; backing up and recreating"
                    );
                    backup_corrupt_file(&open_path)?;
                    open_and_init(&open_path, kind)
                        .context("Failed to reinitialize database after corruption backup")
                }
                Err(err) => Err(err).context("Failed to initialize database"),
            }
        })
        .await
        .context("Failed to join database initialization task")??;

        self.init_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(tenant = name, "Tenant database ready");

        Ok(Arc::new(TenantDb::new(name.to_string(), path, conn)))
    }
}

/// Open the file, switch to WAL, create tables, migrate columns, create
/// indexes and seed defaults. Every step is idempotent.
fn open_and_init(path: &Path, kind: DbKind) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;

    match kind {
        DbKind::Identity => {
            conn.execute_batch(schema::IDENTITY_SCHEMA)?;
            schema::apply_migrations(&conn, schema::IDENTITY_MIGRATIONS)?;
        }
        DbKind::Tenant => {
            conn.execute_batch(schema::TENANT_SCHEMA)?;
            schema::apply_migrations(&conn, schema::TENANT_MIGRATIONS)?;
            conn.execute_batch(schema::TENANT_INDEXES)?;
            schema::seed_default_categories(&conn)?;
        }
    }

    Ok(conn)
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
    )
}

/// Rename a corrupt database file to `<path>.corrupt.<unix-millis>` and
/// drop any stale WAL siblings.
fn backup_corrupt_file(path: &Path) -> Result<()> {
    let backup = PathBuf::from(format!(
        "{}.corrupt.{}",
        path.display(),
        chrono::Utc::now().timestamp_millis()
    ));
    std::fs::rename(path, &backup).context("Failed to back up corrupt database file")?;
    for suffix in ["-wal", "-shm"] {
        let sibling = PathBuf::from(format!("{}{suffix}", path.display()));
        let _ = std::fs::remove_file(sibling);
    }
    tracing::info!(backup = %backup.display(), "Corrupt database backed up");
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("Invalid database name: {name:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (TenantRegistry, TempDir) {
        let dir = TempDir::new().unwrap();
        (TenantRegistry::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn test_fresh_tenant_seeds_default_categories() {
        let (registry, _dir) = registry();
        let db = registry.acquire("note_alice").await.unwrap();

        let names: Vec<String> = db
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM categories WHERE parent_id IS NULL ORDER BY id",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<_>>()?;
                Ok(names)
            })
            .await
            .unwrap();

        assert_eq!(names, vec!["All", "Personal", "Work", "Ideas"]);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_initializes_once() {
        let (registry, _dir) = registry();
        let registry = Arc::new(registry);

        let mut handles = vec![];
        for _ in 0..10 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.acquire("note_bob").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.init_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_tenants_get_distinct_handles() {
        let (registry, _dir) = registry();
        let a = registry.acquire("note_a").await.unwrap();
        let b = registry.acquire("note_b").await.unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(registry.init_count(), 2);
    }

    #[tokio::test]
    async fn test_corruption_recovery_backs_up_and_recreates() {
        let (registry, dir) = registry();
        let path = registry.db_path("note_carol");
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(&path, b"this is definitely not a sqlite file").unwrap();

        let db = registry.acquire("note_carol").await.unwrap();

        // Fresh schema present and empty.
        let count: i64 = db
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))
                    .context("count")
            })
            .await
            .unwrap();
        assert_eq!(count, 0);

        // Backup file preserves the original bytes.
        let backup = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .find(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .contains("note_carol.sqlite.corrupt.")
            })
            .expect("backup file exists");
        let bytes = std::fs::read(backup.path()).unwrap();
        assert_eq!(bytes, b"this is definitely not a sqlite file");
    }

    #[tokio::test]
    async fn test_evict_allows_reacquire() {
        let (registry, _dir) = registry();
        registry.acquire("note_dave").await.unwrap();
        registry.evict("note_dave");
        registry.acquire("note_dave").await.unwrap();
        assert_eq!(registry.init_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_init_allows_clean_retry() {
        let (registry, _dir) = registry();
        let path = registry.db_path("note_frank");
        // A directory at the database path makes the open fail.
        std::fs::create_dir_all(&path).unwrap();
        assert!(registry.acquire("note_frank").await.is_err());

        std::fs::remove_dir(&path).unwrap();
        assert!(registry.acquire("note_frank").await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_init_evicts_only_its_own_unset_cell() {
        let (registry, _dir) = registry();

        let unset: Arc<OnceCell<Arc<TenantDb>>> = Arc::default();
        registry
            .cells
            .lock()
            .insert("note_eve".into(), Arc::clone(&unset));

        // A failure against some other caller's cell must not disturb the
        // mapped one.
        let other: Arc<OnceCell<Arc<TenantDb>>> = Arc::default();
        registry.evict_stale("note_eve", &other);
        assert!(registry.cells.lock().contains_key("note_eve"));

        // A cell that produced a handle in the meantime stays tracked.
        let db = registry.acquire("note_live").await.unwrap();
        let mapped = Arc::clone(registry.cells.lock().get("note_live").unwrap());
        registry.evict_stale("note_live", &mapped);
        assert!(registry.cells.lock().contains_key("note_live"));
        drop(db);

        // Only the caller's own, still-unset cell is removed.
        registry.evict_stale("note_eve", &unset);
        assert!(!registry.cells.lock().contains_key("note_eve"));
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let (registry, _dir) = registry();
        assert!(registry.acquire("../escape").await.is_err());
        assert!(registry.acquire("").await.is_err());
    }
}
