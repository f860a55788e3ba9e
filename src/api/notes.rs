//! Note CRUD, batch operations, bulk import and cross-tenant sharing.

use anyhow::Context;
use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Extension, Json, Router,
};
use rusqlite::{params, params_from_iter, OptionalExtension};
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::database::schema::now_iso;
use crate::error::ApiError;
use crate::gateway::auth::AuthenticatedUser;
use crate::sync::ServerMessage;
use crate::AppState;

/// Note routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notes", get(list_notes).post(create_note).delete(delete_notes))
        .route("/api/notes/restore", put(restore_note))
        .route("/api/notes/reorder", post(reorder_notes))
        .route("/api/notes/batch-move", post(batch_move))
        .route("/api/notes/import", post(import_notes))
        .route("/api/notes/{id}", get(get_note).put(update_note))
        .route("/api/notes/{id}/share", post(share_note))
}

/// A note row without its content, as returned by list queries.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NoteSummary {
    id: i64,
    title: Option<String>,
    category_id: Option<i64>,
    created_at: Option<String>,
    updated_at: Option<String>,
    is_pinned: bool,
    is_deleted: bool,
    order_index: i64,
    plain_text: Option<String>,
    tags: Vec<String>,
}

/// A full note row, content included.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NoteDetail {
    id: i64,
    title: Option<String>,
    content: Option<String>,
    category_id: Option<i64>,
    created_at: Option<String>,
    updated_at: Option<String>,
    is_pinned: bool,
    is_deleted: bool,
    order_index: i64,
    plain_text: Option<String>,
    tags: Vec<String>,
}

fn split_tags(concat: Option<String>) -> Vec<String> {
    concat
        .map(|s| s.split(',').map(str::to_string).collect())
        .unwrap_or_default()
}

/// List all notes with their tags, content omitted (lazy-loaded by the
/// detail endpoint). Sorted pinned-first, then by manual order, then by
/// recency.
async fn list_notes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<NoteSummary>>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    let notes = db
        .call(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT n.id, n.title, n.category_id, n.created_at, n.updated_at,
                            n.is_pinned, n.is_deleted, n.order_index, n.plain_text,
                            GROUP_CONCAT(t.name) AS tags
                     FROM notes n
                     LEFT JOIN note_tags nt ON n.id = nt.note_id
                     LEFT JOIN tags t ON nt.tag_id = t.id
                     GROUP BY n.id
                     ORDER BY n.is_pinned DESC, n.order_index ASC, n.updated_at DESC",
                )
                .context("Failed to prepare note list query")?;
            let notes = stmt
                .query_map([], |row| {
                    Ok(NoteSummary {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        category_id: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                        is_pinned: row.get::<_, i64>(5)? != 0,
                        is_deleted: row.get::<_, i64>(6)? != 0,
                        order_index: row.get(7)?,
                        plain_text: row.get(8)?,
                        tags: split_tags(row.get(9)?),
                    })
                })
                .context("Failed to run note list query")?
                .collect::<rusqlite::Result<_>>()
                .context("Failed to read note rows")?;
            Ok(notes)
        })
        .await?;
    Ok(Json(notes))
}

async fn get_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<Json<NoteDetail>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    let note = db
        .call(move |conn| {
            let note = conn
                .query_row(
                    "SELECT id, title, content, category_id, created_at, updated_at,
                            is_pinned, is_deleted, order_index, plain_text
                     FROM notes WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(NoteDetail {
                            id: row.get(0)?,
                            title: row.get(1)?,
                            content: row.get(2)?,
                            category_id: row.get(3)?,
                            created_at: row.get(4)?,
                            updated_at: row.get(5)?,
                            is_pinned: row.get::<_, i64>(6)? != 0,
                            is_deleted: row.get::<_, i64>(7)? != 0,
                            order_index: row.get(8)?,
                            plain_text: row.get(9)?,
                            tags: Vec::new(),
                        })
                    },
                )
                .optional()
                .context("Failed to fetch note")?;

            let Some(mut note) = note else {
                return Ok(None);
            };

            let mut stmt = conn
                .prepare(
                    "SELECT t.name FROM tags t
                     JOIN note_tags nt ON t.id = nt.tag_id
                     WHERE nt.note_id = ?1",
                )
                .context("Failed to prepare tag query")?;
            note.tags = stmt
                .query_map([id], |row| row.get(0))
                .context("Failed to run tag query")?
                .collect::<rusqlite::Result<_>>()
                .context("Failed to read tag rows")?;
            Ok(Some(note))
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Note not found".into()))?;
    Ok(Json(note))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewNote {
    id: i64,
    title: Option<String>,
    content: Option<String>,
    category_id: Option<i64>,
    created_at: Option<String>,
    updated_at: Option<String>,
    plain_text: Option<String>,
}

async fn create_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(note): Json<NewNote>,
) -> Result<Json<Value>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO notes (id, title, content, category_id, created_at, updated_at,
                                is_pinned, is_deleted, order_index, plain_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, 0, ?7)",
            params![
                note.id,
                note.title,
                note.content,
                note.category_id,
                note.created_at,
                note.updated_at,
                note.plain_text
            ],
        )
        .context("Failed to insert note")?;
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteUpdate {
    title: Option<String>,
    content: Option<String>,
    category_id: Option<i64>,
    updated_at: Option<String>,
    plain_text: Option<String>,
    is_pinned: Option<bool>,
}

/// Partial update: only fields present in the body are written.
async fn update_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(update): Json<NoteUpdate>,
) -> Result<Json<Value>, ApiError> {
    let mut assignments: Vec<&str> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();

    let mut push = |column: &'static str, value: SqlValue| {
        assignments.push(column);
        values.push(value);
    };
    if let Some(title) = update.title {
        push("title", SqlValue::Text(title));
    }
    if let Some(content) = update.content {
        push("content", SqlValue::Text(content));
    }
    if let Some(category_id) = update.category_id {
        push("category_id", SqlValue::Integer(category_id));
    }
    if let Some(updated_at) = update.updated_at {
        push("updated_at", SqlValue::Text(updated_at));
    }
    if let Some(plain_text) = update.plain_text {
        push("plain_text", SqlValue::Text(plain_text));
    }
    if let Some(is_pinned) = update.is_pinned {
        push("is_pinned", SqlValue::Integer(i64::from(is_pinned)));
    }

    if assignments.is_empty() {
        return Ok(Json(json!({ "success": true })));
    }

    let set_clause = assignments
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{column} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE notes SET {set_clause} WHERE id = ?{}", assignments.len() + 1);
    values.push(SqlValue::Integer(id));

    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        conn.execute(&sql, params_from_iter(values))
            .context("Failed to update note")?;
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct DeleteNotes {
    ids: Vec<i64>,
    #[serde(default)]
    permanent: bool,
}

/// Batch delete: soft by default (trash flag), permanent on request.
async fn delete_notes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<DeleteNotes>,
) -> Result<Json<Value>, ApiError> {
    if body.ids.is_empty() {
        return Err(ApiError::Validation("Note IDs are required".into()));
    }

    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        let placeholders = placeholders(body.ids.len(), 0);
        let sql = if body.permanent {
            format!("DELETE FROM notes WHERE id IN ({placeholders})")
        } else {
            format!("UPDATE notes SET is_deleted = 1 WHERE id IN ({placeholders})")
        };
        conn.execute(&sql, params_from_iter(body.ids))
            .context("Failed to delete notes")?;
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreNote {
    id: i64,
    category_id: Option<i64>,
}

async fn restore_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<RestoreNote>,
) -> Result<Json<Value>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        conn.execute(
            "UPDATE notes SET is_deleted = 0, category_id = ?1 WHERE id = ?2",
            params![body.category_id, body.id],
        )
        .context("Failed to restore note")?;
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct OrderUpdate {
    pub id: i64,
    pub order_index: i64,
}

#[derive(Debug, Deserialize)]
pub(super) struct ReorderBody {
    pub updates: Vec<OrderUpdate>,
}

/// Apply manual ordering in one transaction.
async fn reorder_notes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<ReorderBody>,
) -> Result<Json<Value>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        let tx = conn.transaction().context("Failed to open transaction")?;
        for update in &body.updates {
            tx.execute(
                "UPDATE notes SET order_index = ?1 WHERE id = ?2",
                params![update.order_index, update.id],
            )
            .context("Failed to reorder note")?;
        }
        tx.commit().context("Failed to commit reorder")
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchMove {
    ids: Vec<i64>,
    category_id: Option<i64>,
    updated_at: Option<String>,
}

async fn batch_move(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<BatchMove>,
) -> Result<Json<Value>, ApiError> {
    if body.ids.is_empty() {
        return Err(ApiError::Validation("Note IDs are required".into()));
    }

    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        let placeholders = placeholders(body.ids.len(), 2);
        let sql = format!(
            "UPDATE notes SET category_id = ?1, updated_at = ?2 WHERE id IN ({placeholders})"
        );
        let mut values: Vec<SqlValue> = vec![
            body.category_id.map_or(SqlValue::Null, SqlValue::Integer),
            body.updated_at.map_or(SqlValue::Null, SqlValue::Text),
        ];
        values.extend(body.ids.iter().map(|id| SqlValue::Integer(*id)));
        conn.execute(&sql, params_from_iter(values))
            .context("Failed to move notes")?;
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportNote {
    id: i64,
    title: Option<String>,
    content: Option<String>,
    category_id: Option<i64>,
    created_at: Option<String>,
    updated_at: Option<String>,
    #[serde(default)]
    is_pinned: bool,
    #[serde(default)]
    is_deleted: bool,
    #[serde(default)]
    order_index: i64,
    plain_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImportImage {
    id: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ImportBody {
    #[serde(default)]
    notes: Vec<ImportNote>,
    #[serde(default)]
    images: Vec<ImportImage>,
}

/// Bulk import of notes and inline images, all-or-nothing.
///
/// Images are idempotent (content-addressed ids), notes are plain inserts so
/// an id collision fails the whole import.
async fn import_notes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<ImportBody>,
) -> Result<Json<Value>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        let tx = conn.transaction().context("Failed to open import transaction")?;

        {
            let mut stmt = tx
                .prepare("INSERT OR REPLACE INTO images (id, data) VALUES (?1, ?2)")
                .context("Failed to prepare image import")?;
            for image in &body.images {
                stmt.execute(params![image.id, image.data])
                    .context("Failed to import image")?;
            }

            let mut stmt = tx
                .prepare(
                    "INSERT INTO notes (id, title, content, category_id, created_at,
                                        updated_at, is_pinned, is_deleted, order_index, plain_text)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )
                .context("Failed to prepare note import")?;
            for note in &body.notes {
                stmt.execute(params![
                    note.id,
                    note.title,
                    note.content,
                    note.category_id,
                    note.created_at,
                    note.updated_at,
                    i64::from(note.is_pinned),
                    i64::from(note.is_deleted),
                    note.order_index,
                    note.plain_text
                ])
                .context("Failed to import note")?;
            }
        }

        tx.commit().context("Failed to commit import")
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct ShareBody {
    username: String,
}

/// Copy a note into another user's tenant database and notify their live
/// sessions.
async fn share_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(body): Json<ShareBody>,
) -> Result<Json<Value>, ApiError> {
    if body.username.is_empty() {
        return Err(ApiError::Validation("Target username is required".into()));
    }

    let identity = state.registry.identity().await?;
    let target_username = body.username.clone();
    let target_id: Option<i64> = identity
        .call(move |conn| {
            conn.query_row(
                "SELECT id FROM users WHERE username = ?1",
                params![&target_username],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up target user")
        })
        .await?;
    let target_id = target_id.ok_or_else(|| ApiError::NotFound("Target user not found".into()))?;

    let source = state.registry.acquire(&user.tenant_name()).await?;
    let note: Option<(i64, Option<String>, Option<String>, Option<String>, Option<String>)> =
        source
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, title, content, created_at, plain_text FROM notes WHERE id = ?1",
                    [id],
                    |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                    },
                )
                .optional()
                .context("Failed to fetch note to share")
            })
            .await?;
    let (note_id, title, content, created_at, plain_text) =
        note.ok_or_else(|| ApiError::NotFound("Note not found".into()))?;

    let target_db = state
        .registry
        .acquire(&format!("note_{}", body.username))
        .await?;
    let copied_title = title.clone();
    target_db
        .call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO notes (id, title, content, category_id, created_at,
                                               updated_at, is_pinned, is_deleted, order_index, plain_text)
                 VALUES (?1, ?2, ?3, NULL, ?4, ?5, 0, 0, 0, ?6)",
                params![note_id, copied_title, content, created_at, now_iso(), plain_text],
            )
            .context("Failed to copy note into target tenant")?;
            Ok(())
        })
        .await?;

    let delivered = state.channels.notify(
        target_id,
        &ServerMessage::NoteShared {
            from: user.username.clone(),
            title: title.unwrap_or_default(),
        },
    );
    tracing::info!(
        from = %user.username,
        to = %body.username,
        note_id,
        delivered,
        "Note shared"
    );

    Ok(Json(json!({
        "success": true,
        "message": format!("Note shared with {}", body.username),
    })))
}

/// `?N` placeholder list for an `IN` clause, numbered after `offset` leading
/// parameters.
pub(super) fn placeholders(count: usize, offset: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i + offset))
        .collect::<Vec<_>>()
        .join(", ")
}
