//! Tag attach/detach endpoints.

use anyhow::Context;
use axum::{
    extract::{Path, State},
    routing::{delete, post},
    Extension, Json, Router,
};
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::gateway::auth::AuthenticatedUser;
use crate::AppState;

/// Tag routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/tags", post(attach_tag))
        .route("/api/notes/{id}/tags/{tag_name}", delete(detach_tag))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachTag {
    note_id: i64,
    tag_name: String,
}

/// Attach a tag to a note, creating the tag row on first use. Both inserts
/// are idempotent.
async fn attach_tag(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<AttachTag>,
) -> Result<Json<Value>, ApiError> {
    if body.tag_name.is_empty() {
        return Err(ApiError::Validation("Tag name is required".into()));
    }

    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        conn.execute(
            "INSERT OR IGNORE INTO tags (name) VALUES (?1)",
            params![&body.tag_name],
        )
        .context("Failed to create tag")?;
        let tag_id: i64 = conn
            .query_row(
                "SELECT id FROM tags WHERE name = ?1",
                params![&body.tag_name],
                |row| row.get(0),
            )
            .context("Failed to look up tag")?;
        conn.execute(
            "INSERT OR IGNORE INTO note_tags (note_id, tag_id) VALUES (?1, ?2)",
            params![body.note_id, tag_id],
        )
        .context("Failed to attach tag")?;
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

/// Detach a tag from a note by name. Unknown tags are a silent no-op.
async fn detach_tag(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((note_id, tag_name)): Path<(i64, String)>,
) -> Result<Json<Value>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        let tag_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM tags WHERE name = ?1",
                params![&tag_name],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up tag")?;
        if let Some(tag_id) = tag_id {
            conn.execute(
                "DELETE FROM note_tags WHERE note_id = ?1 AND tag_id = ?2",
                params![note_id, tag_id],
            )
            .context("Failed to detach tag")?;
        }
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}
