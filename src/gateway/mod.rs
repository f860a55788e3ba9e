//! Gateway layer: identity token validation and the auth endpoints.
//!
//! Everything else in the API consumes the trust boundary established here —
//! an opaque, signed identity token mapping to a `(user_id, username)` pair.

pub mod auth;
pub mod routes;

use axum::Router;

use crate::AppState;

/// Create the gateway router (auth endpoints).
pub fn create_router() -> Router<AppState> {
    Router::new().merge(routes::router())
}
