//! HTTP API endpoints.

pub mod categories;
pub mod health;
pub mod images;
pub mod notes;
pub mod tags;
pub mod templates;

use axum::Router;

use crate::AppState;

/// Create the API router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(notes::router())
        .merge(categories::router())
        .merge(templates::router())
        .merge(tags::router())
        .merge(images::router())
}
