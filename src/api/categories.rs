//! Category CRUD and reorder endpoints.

use anyhow::Context;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::database::schema::FALLBACK_CATEGORY;
use crate::error::ApiError;
use crate::gateway::auth::AuthenticatedUser;
use crate::AppState;

use super::notes::ReorderBody;

/// Category routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/categories", get(list_categories).post(create_category))
        .route("/api/categories/reorder", post(reorder_categories))
        .route(
            "/api/categories/{id}",
            axum::routing::put(update_category).delete(delete_category),
        )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Category {
    id: i64,
    name: Option<String>,
    parent_id: Option<i64>,
    order_index: i64,
    is_favorite: bool,
}

async fn list_categories(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<Category>>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    let categories = db
        .call(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, parent_id, order_index, is_favorite
                     FROM categories
                     ORDER BY parent_id, order_index, id",
                )
                .context("Failed to prepare category query")?;
            let categories = stmt
                .query_map([], |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        parent_id: row.get(2)?,
                        order_index: row.get(3)?,
                        is_favorite: row.get::<_, i64>(4)? != 0,
                    })
                })
                .context("Failed to run category query")?
                .collect::<rusqlite::Result<_>>()
                .context("Failed to read category rows")?;
            Ok(categories)
        })
        .await?;
    Ok(Json(categories))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewCategory {
    name: String,
    parent_id: Option<i64>,
}

/// Create a category under an optional parent. Name plus parent must be
/// unique; the new category lands at the end of its sibling order.
async fn create_category(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<NewCategory>,
) -> Result<Json<Value>, ApiError> {
    if body.name.is_empty() {
        return Err(ApiError::Validation("Category name is required".into()));
    }

    let db = state.registry.acquire(&user.tenant_name()).await?;
    let created = db
        .call(move |conn| {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM categories WHERE name = ?1 AND parent_id IS ?2",
                    params![&body.name, body.parent_id],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to check for duplicate category")?;
            if existing.is_some() {
                return Ok(false);
            }

            let max_order: Option<i64> = conn
                .query_row(
                    "SELECT MAX(order_index) FROM categories WHERE parent_id IS ?1",
                    params![body.parent_id],
                    |row| row.get(0),
                )
                .context("Failed to read sibling order")?;

            conn.execute(
                "INSERT INTO categories (name, parent_id, order_index) VALUES (?1, ?2, ?3)",
                params![&body.name, body.parent_id, max_order.unwrap_or(0) + 1],
            )
            .context("Failed to insert category")?;
            Ok(true)
        })
        .await?;

    if !created {
        return Err(ApiError::Validation("Duplicate category".into()));
    }
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoryUpdate {
    name: Option<String>,
    is_favorite: Option<bool>,
}

async fn update_category(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(body): Json<CategoryUpdate>,
) -> Result<Json<Value>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        if let Some(name) = &body.name {
            conn.execute(
                "UPDATE categories SET name = ?1 WHERE id = ?2",
                params![name, id],
            )
            .context("Failed to rename category")?;
        }
        if let Some(is_favorite) = body.is_favorite {
            conn.execute(
                "UPDATE categories SET is_favorite = ?1 WHERE id = ?2",
                params![i64::from(is_favorite), id],
            )
            .context("Failed to update category favorite flag")?;
        }
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

/// Delete a category and its children; orphaned notes are adopted by the
/// fallback category when it exists, otherwise left uncategorized.
async fn delete_category(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        let tx = conn.transaction().context("Failed to open transaction")?;

        let fallback: Option<i64> = tx
            .query_row(
                "SELECT id FROM categories WHERE name = ?1 AND parent_id IS NULL",
                params![FALLBACK_CATEGORY],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up fallback category")?;

        tx.execute(
            "UPDATE notes SET category_id = ?1 WHERE category_id = ?2",
            params![fallback, id],
        )
        .context("Failed to reassign notes")?;
        tx.execute("DELETE FROM categories WHERE parent_id = ?1", [id])
            .context("Failed to delete child categories")?;
        tx.execute("DELETE FROM categories WHERE id = ?1", [id])
            .context("Failed to delete category")?;

        tx.commit().context("Failed to commit category deletion")
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

async fn reorder_categories(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<ReorderBody>,
) -> Result<Json<Value>, ApiError> {
    let db = state.registry.acquire(&user.tenant_name()).await?;
    db.call(move |conn| {
        let tx = conn.transaction().context("Failed to open transaction")?;
        for update in &body.updates {
            tx.execute(
                "UPDATE categories SET order_index = ?1 WHERE id = ?2",
                params![update.order_index, update.id],
            )
            .context("Failed to reorder category")?;
        }
        tx.commit().context("Failed to commit reorder")
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}
