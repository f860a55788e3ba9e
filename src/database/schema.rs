//! Database schema definitions, column migrations and the sync allow-list.

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};

/// Tenant database schema (one file per user).
pub const TENANT_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY,
    title TEXT,
    content TEXT,
    category_id INTEGER,
    created_at TEXT,
    updated_at TEXT,
    is_pinned INTEGER DEFAULT 0,
    is_deleted INTEGER DEFAULT 0,
    order_index INTEGER DEFAULT 0,
    plain_text TEXT
);
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE
);
CREATE TABLE IF NOT EXISTS note_tags (
    note_id INTEGER,
    tag_id INTEGER,
    PRIMARY KEY (note_id, tag_id),
    FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE,
    FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    parent_id INTEGER,
    is_favorite INTEGER DEFAULT 0,
    order_index INTEGER DEFAULT 0,
    updated_at TEXT
);
CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY,
    data TEXT
);
CREATE TABLE IF NOT EXISTS templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT,
    content TEXT,
    description TEXT,
    created_at TEXT,
    updated_at TEXT
);
";

/// Performance indexes for the tenant schema.
pub const TENANT_INDEXES: &str = r"
CREATE INDEX IF NOT EXISTS idx_notes_category_id ON notes(category_id);
CREATE INDEX IF NOT EXISTS idx_notes_is_deleted ON notes(is_deleted);
CREATE INDEX IF NOT EXISTS idx_notes_list_sort ON notes(is_pinned DESC, order_index ASC, updated_at DESC);
";

/// Identity database schema (shared across tenants).
pub const IDENTITY_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE,
    password TEXT,
    salt TEXT,
    naver_id TEXT,
    kakao_id TEXT
);
";

/// A single additive column migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Table to migrate.
    pub table: &'static str,
    /// Column to add when missing.
    pub column: &'static str,
    /// Column definition appended to `ADD COLUMN`.
    pub definition: &'static str,
}

/// Column migrations for tenant databases.
///
/// Applied in order; each entry is skipped when `PRAGMA table_info` already
/// lists the column, so the pass is idempotent and never destructive.
pub const TENANT_MIGRATIONS: &[Migration] = &[
    Migration { table: "categories", column: "order_index", definition: "INTEGER DEFAULT 0" },
    Migration { table: "notes", column: "is_pinned", definition: "INTEGER DEFAULT 0" },
    Migration { table: "notes", column: "is_deleted", definition: "INTEGER DEFAULT 0" },
    Migration { table: "notes", column: "category_id", definition: "INTEGER" },
    Migration { table: "notes", column: "order_index", definition: "INTEGER DEFAULT 0" },
    Migration { table: "notes", column: "plain_text", definition: "TEXT" },
    Migration { table: "categories", column: "updated_at", definition: "TEXT" },
    Migration { table: "templates", column: "updated_at", definition: "TEXT" },
];

/// Column migrations for the identity database.
pub const IDENTITY_MIGRATIONS: &[Migration] = &[
    Migration { table: "users", column: "google_id", definition: "TEXT" },
];

/// Categories seeded into a fresh tenant database.
pub const DEFAULT_CATEGORIES: &[&str] = &["All", "Personal", "Work", "Ideas"];

/// Root category that adopts the notes of a deleted category.
pub const FALLBACK_CATEGORY: &str = "Personal";

/// Tables and columns the sync channel is allowed to write.
///
/// The caller supplies table and column names verbatim; everything is checked
/// against this list before any SQL is built.
pub const SYNC_TABLES: &[(&str, &[&str])] = &[
    (
        "notes",
        &[
            "id", "title", "content", "category_id", "created_at", "updated_at",
            "is_pinned", "is_deleted", "order_index", "plain_text",
        ],
    ),
    ("tags", &["id", "name"]),
    ("note_tags", &["note_id", "tag_id"]),
    (
        "categories",
        &["id", "name", "parent_id", "is_favorite", "order_index", "updated_at"],
    ),
    ("images", &["id", "data"]),
    (
        "templates",
        &["id", "title", "content", "description", "created_at", "updated_at"],
    ),
];

/// Look up the allow-listed columns for a syncable table.
pub fn sync_columns(table: &str) -> Option<&'static [&'static str]> {
    SYNC_TABLES
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, columns)| *columns)
}

/// Run the additive column-migration pass.
///
/// For each entry the table's current columns are inspected and the column is
/// added only if missing. Existing data is never reordered or dropped.
pub fn apply_migrations(conn: &Connection, migrations: &[Migration]) -> rusqlite::Result<()> {
    for migration in migrations {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", migration.table))?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<_>>()?;

        if !existing.iter().any(|name| name == migration.column) {
            conn.execute(
                &format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    migration.table, migration.column, migration.definition
                ),
                [],
            )?;
            tracing::info!(
                table = migration.table,
                column = migration.column,
                "Migrated: added column"
            );
        }
    }
    Ok(())
}

/// Seed the default categories into a tenant database.
///
/// Name plus NULL parent is the uniqueness probe, so re-running the seed on a
/// populated database adds nothing.
pub fn seed_default_categories(conn: &Connection) -> rusqlite::Result<()> {
    for name in DEFAULT_CATEGORIES {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM categories WHERE name = ?1 AND parent_id IS NULL",
                [name],
                |row| row.get(0),
            )
            .optional()?;

        if existing.is_none() {
            conn.execute("INSERT INTO categories (name) VALUES (?1)", [name])?;
        }
    }
    Ok(())
}

/// Current ISO-8601 timestamp with millisecond precision.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Count the columns of a table, for migration assertions.
pub fn column_count(conn: &Connection, table: &str) -> anyhow::Result<usize> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .context("Failed to inspect table")?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .context("Failed to list columns")?
        .collect::<rusqlite::Result<_>>()
        .context("Failed to read column rows")?;
    Ok(names.len())
}
