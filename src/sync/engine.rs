//! Transactional apply of sync batches plus full-snapshot save/load.

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Transaction};

use crate::database::{self, schema, TenantRegistry};
use crate::sync::protocol::{ClientMessage, ServerMessage, SyncChanges, SyncRow};

/// Dispatch one inbound channel message against a tenant database.
///
/// Failures surface as a `*_response` with `success:false` rather than
/// closing the channel.
pub async fn handle_message(
    registry: &TenantRegistry,
    tenant: &str,
    message: ClientMessage,
) -> ServerMessage {
    match message {
        ClientMessage::Save { data } => match save_snapshot(registry, tenant, &data).await {
            Ok(()) => ServerMessage::save_ok(),
            Err(e) => {
                tracing::warn!(tenant, error = %e, "Snapshot save failed");
                ServerMessage::save_err(e.to_string())
            }
        },
        ClientMessage::Load => match load_snapshot(registry, tenant).await {
            Ok(Some(data)) => ServerMessage::load_ok(data),
            Ok(None) => ServerMessage::load_err("No database file found"),
            Err(e) => {
                tracing::warn!(tenant, error = %e, "Snapshot load failed");
                ServerMessage::load_err(e.to_string())
            }
        },
        ClientMessage::Sync { changes } => match apply_sync(registry, tenant, changes).await {
            Ok(timestamp) => ServerMessage::sync_ok(timestamp),
            Err(e) => {
                tracing::warn!(tenant, error = %e, "Sync batch rolled back");
                ServerMessage::sync_err(e.to_string())
            }
        },
    }
}

/// Replace the tenant's on-disk database wholesale.
///
/// The cached handle is evicted first so no open connection outlives the
/// file swap; stale WAL siblings are removed alongside.
async fn save_snapshot(registry: &TenantRegistry, tenant: &str, encoded: &str) -> Result<()> {
    database::validate_name(tenant)?;
    let bytes = BASE64
        .decode(encoded)
        .context("Invalid base64 database image")?;

    let path = registry.db_path(tenant);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create database directory")?;
    }

    registry.evict(tenant);
    tokio::fs::write(&path, &bytes)
        .await
        .context("Failed to write database image")?;
    for suffix in ["-wal", "-shm"] {
        let _ = tokio::fs::remove_file(format!("{}{suffix}", path.display())).await;
    }

    tracing::info!(tenant, size = bytes.len(), "Replaced tenant database from snapshot");
    Ok(())
}

/// Read the tenant's on-disk database, base64-encoded. `None` when no file
/// exists yet.
async fn load_snapshot(registry: &TenantRegistry, tenant: &str) -> Result<Option<String>> {
    database::validate_name(tenant)?;
    let path = registry.db_path(tenant);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Some(BASE64.encode(bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context("Failed to read database file"),
    }
}

async fn apply_sync(registry: &TenantRegistry, tenant: &str, changes: SyncChanges) -> Result<i64> {
    let db = registry.acquire(tenant).await?;
    db.call(move |conn| apply_changes(conn, &changes)).await?;
    Ok(chrono::Utc::now().timestamp_millis())
}

/// Apply a sync batch inside one transaction.
///
/// Every table and column is checked against the allow-list before any SQL
/// is built. Any failure rolls the whole batch back; no partial application
/// is observable afterward.
pub fn apply_changes(conn: &mut Connection, changes: &SyncChanges) -> Result<()> {
    let tx = conn
        .transaction()
        .context("Failed to open sync transaction")?;

    for (table, rows) in changes {
        let allowed = schema::sync_columns(table)
            .ok_or_else(|| anyhow!("Table not allowed for sync: {table}"))?;
        for row in rows {
            upsert_row(&tx, table, allowed, row)?;
        }
    }

    tx.commit().context("Failed to commit sync transaction")
}

fn upsert_row(tx: &Transaction<'_>, table: &str, allowed: &[&str], row: &SyncRow) -> Result<()> {
    if row.is_empty() {
        bail!("Empty row for table {table}");
    }

    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (column, value) in row {
        if !allowed.contains(&column.as_str()) {
            bail!("Column not allowed for sync: {table}.{column}");
        }
        columns.push(column.as_str());
        values.push(to_sql_value(value).with_context(|| format!("Bad value for {table}.{column}"))?);
    }

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT OR REPLACE INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );
    tx.execute(&sql, rusqlite::params_from_iter(values))
        .with_context(|| format!("Failed to upsert into {table}"))?;
    Ok(())
}

fn to_sql_value(value: &serde_json::Value) -> Result<SqlValue> {
    use serde_json::Value as Json;
    Ok(match value {
        Json::Null => SqlValue::Null,
        Json::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                SqlValue::Real(f)
            } else {
                bail!("Numeric value out of range: {n}")
            }
        }
        Json::String(s) => SqlValue::Text(s.clone()),
        Json::Array(_) | Json::Object(_) => bail!("Nested values are not syncable"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn tenant_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(schema::TENANT_SCHEMA).unwrap();
        conn
    }

    fn changes(value: serde_json::Value) -> SyncChanges {
        serde_json::from_value(value).unwrap()
    }

    fn note_title(conn: &Connection, id: i64) -> Option<String> {
        conn.query_row("SELECT title FROM notes WHERE id = ?1", [id], |row| row.get(0))
            .ok()
    }

    #[test]
    fn test_upsert_batch_is_idempotent() {
        let mut conn = tenant_conn();
        let batch = changes(json!({
            "notes": [{"id": 1, "title": "A", "is_pinned": true}]
        }));

        apply_changes(&mut conn, &batch).unwrap();
        apply_changes(&mut conn, &batch).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(note_title(&conn, 1).as_deref(), Some("A"));

        // Booleans land as SQLite integers.
        let pinned: i64 = conn
            .query_row("SELECT is_pinned FROM notes WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(pinned, 1);
    }

    #[test]
    fn test_second_upsert_of_same_row_wins() {
        let mut conn = tenant_conn();
        let batch = changes(json!({
            "notes": [
                {"id": 1, "title": "A"},
                {"id": 1, "title": "B"}
            ]
        }));

        apply_changes(&mut conn, &batch).unwrap();
        assert_eq!(note_title(&conn, 1).as_deref(), Some("B"));
    }

    #[test]
    fn test_unknown_table_rolls_back_whole_batch() {
        let mut conn = tenant_conn();
        apply_changes(
            &mut conn,
            &changes(json!({"notes": [{"id": 1, "title": "kept"}]})),
        )
        .unwrap();

        let bad = changes(json!({
            "notes": [{"id": 2, "title": "lost"}],
            "not_a_table": [{"id": 1}]
        }));
        assert!(apply_changes(&mut conn, &bad).is_err());

        // The earlier batch survives; nothing from the failed one is visible.
        assert_eq!(note_title(&conn, 1).as_deref(), Some("kept"));
        assert_eq!(note_title(&conn, 2), None);
    }

    #[test]
    fn test_unknown_column_rejected() {
        let mut conn = tenant_conn();
        let bad = changes(json!({
            "notes": [{"id": 1, "sneaky_column": "x"}]
        }));
        let err = apply_changes(&mut conn, &bad).unwrap_err();
        assert!(err.to_string().contains("sneaky_column"));
    }

    #[test]
    fn test_empty_row_rejected() {
        let mut conn = tenant_conn();
        let bad = changes(json!({"notes": [{}]}));
        assert!(apply_changes(&mut conn, &bad).is_err());
    }

    #[tokio::test]
    async fn test_sync_message_end_to_end() {
        let dir = TempDir::new().unwrap();
        let registry = TenantRegistry::new(dir.path());

        let message: ClientMessage = serde_json::from_value(json!({
            "type": "sync",
            "changes": {"notes": [{"id": 5, "title": "from channel"}]}
        }))
        .unwrap();

        let reply = handle_message(&registry, "note_alice", message).await;
        let ServerMessage::SyncResponse { success, timestamp, .. } = reply else {
            panic!("expected sync_response");
        };
        assert!(success);
        // Acknowledged server time is unix milliseconds.
        assert!(timestamp.is_some_and(|t| t > 1_600_000_000_000));

        let db = registry.acquire("note_alice").await.unwrap();
        let title: String = db
            .call(|conn| {
                conn.query_row("SELECT title FROM notes WHERE id = 5", [], |row| row.get(0))
                    .context("query")
            })
            .await
            .unwrap();
        assert_eq!(title, "from channel");
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let registry = TenantRegistry::new(dir.path());
        let image = BASE64.encode(b"snapshot-bytes");

        let saved = handle_message(
            &registry,
            "note_bob",
            ClientMessage::Save { data: image.clone() },
        )
        .await;
        assert!(matches!(saved, ServerMessage::SaveResponse { success: true, .. }));

        let loaded = handle_message(&registry, "note_bob", ClientMessage::Load).await;
        let ServerMessage::LoadResponse { success, data, .. } = loaded else {
            panic!("expected load_response");
        };
        assert!(success);
        assert_eq!(data.as_deref(), Some(image.as_str()));
    }

    #[tokio::test]
    async fn test_load_missing_tenant_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let registry = TenantRegistry::new(dir.path());

        let reply = handle_message(&registry, "note_nobody", ClientMessage::Load).await;
        let ServerMessage::LoadResponse { success, data, error } = reply else {
            panic!("expected load_response");
        };
        assert!(!success);
        assert!(data.is_none());
        assert_eq!(error.as_deref(), Some("No database file found"));
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_base64() {
        let dir = TempDir::new().unwrap();
        let registry = TenantRegistry::new(dir.path());

        let reply = handle_message(
            &registry,
            "note_bob",
            ClientMessage::Save { data: "!!! not base64 !!!".into() },
        )
        .await;
        assert!(matches!(reply, ServerMessage::SaveResponse { success: false, .. }));
    }
}
