//! Image upload and batch deletion.

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::HeaderMap,
    routing::post,
    Extension, Json, Router,
};
use rusqlite::params_from_iter;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::gateway::auth::AuthenticatedUser;
use crate::AppState;

use super::notes::placeholders;

/// Image routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/upload", post(upload))
        .route("/api/images/delete", post(delete_images))
}

/// Streamed upload. The body is raw bytes; the original filename travels in
/// the `x-filename` header and contributes only its extension.
async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Value>, ApiError> {
    let filename = headers
        .get("x-filename")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Validation("Filename is required".into()))?
        .to_string();

    let blob = state.blobs.store(body.into_data_stream(), &filename).await?;
    Ok(Json(json!({ "url": blob.url })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteImages {
    image_ids: Vec<String>,
}

/// Remove inline image rows by content digest. Missing ids are a no-op.
async fn delete_images(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<DeleteImages>,
) -> Result<Json<Value>, ApiError> {
    if body.image_ids.is_empty() {
        return Ok(Json(json!({ "success": true })));
    }

    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        let sql = format!(
            "DELETE FROM images WHERE id IN ({})",
            placeholders(body.image_ids.len(), 0)
        );
        conn.execute(&sql, params_from_iter(body.image_ids))
            .context("Failed to delete images")?;
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}
