//! Note template endpoints.

use anyhow::Context;
use axum::{
    extract::{Path, State},
    routing::get,
    Extension, Json, Router,
};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::database::schema::now_iso;
use crate::error::ApiError;
use crate::gateway::auth::AuthenticatedUser;
use crate::AppState;

/// Template routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/templates", get(list_templates).post(create_template))
        .route(
            "/api/templates/{id}",
            axum::routing::put(update_template).delete(delete_template),
        )
}

#[derive(Debug, Serialize)]
struct Template {
    id: i64,
    title: Option<String>,
    content: Option<String>,
    description: Option<String>,
}

async fn list_templates(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<Template>>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    let templates = db
        .call(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, content, description FROM templates
                     ORDER BY created_at DESC",
                )
                .context("Failed to prepare template query")?;
            let templates = stmt
                .query_map([], |row| {
                    Ok(Template {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        content: row.get(2)?,
                        description: row.get(3)?,
                    })
                })
                .context("Failed to run template query")?
                .collect::<rusqlite::Result<_>>()
                .context("Failed to read template rows")?;
            Ok(templates)
        })
        .await?;
    Ok(Json(templates))
}

#[derive(Debug, Deserialize)]
struct NewTemplate {
    title: String,
    content: Option<String>,
    description: Option<String>,
}

async fn create_template(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<NewTemplate>,
) -> Result<Json<Value>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO templates (title, content, description, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![body.title, body.content, body.description, now_iso()],
        )
        .context("Failed to insert template")?;
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct TemplateUpdate {
    title: Option<String>,
    description: Option<String>,
}

async fn update_template(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(body): Json<TemplateUpdate>,
) -> Result<Json<Value>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        conn.execute(
            "UPDATE templates SET title = ?1, description = ?2, updated_at = ?3 WHERE id = ?4",
            params![body.title, body.description, now_iso(), id],
        )
        .context("Failed to update template")?;
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

async fn delete_template(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        conn.execute("DELETE FROM templates WHERE id = ?1", [id])
            .context("Failed to delete template")?;
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}
