//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api;
use crate::config::AppConfig;
use crate::database::TenantRegistry;
use crate::gateway;
use crate::logging::OpTimer;
use crate::storage::BlobStore;
use crate::sync::{self, ChannelRegistry};
use crate::{log_banner, log_init_step, log_init_warning, log_success, AppState};

/// Server version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create the application with all routes and middleware.
pub async fn create_app(config: AppConfig) -> anyhow::Result<Router> {
    let overall_timer = OpTimer::new("server", "create_app");
    let state = build_state(config).await?;
    let app = create_app_from_state(state);
    overall_timer.finish();
    log_success!("Note Station ready");
    Ok(app)
}

/// Initialize every shared component and assemble the [`AppState`].
pub async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    log_banner!(
        format!("🗒️  Note Station v{VERSION}"),
        format!("Tenant Storage & Sync Engine | port {}", config.server.port)
    );

    if config.auth.jwt_secret.is_none() {
        log_init_warning!("JWT_SECRET is not set. Auth endpoints will fail until it is configured.");
    }

    // [1/4] Tenant database registry
    let step_timer = OpTimer::new("server", "tenant_registry");
    let registry = Arc::new(TenantRegistry::new(&config.storage.data_dir));
    log_init_step!(
        1,
        4,
        "Tenant Registry",
        format!("🗄️  {}", config.storage.data_dir)
    );
    step_timer.finish();

    // [2/4] Identity database warm-up
    let step_timer = OpTimer::new("server", "identity_db");
    registry.identity().await?;
    log_init_step!(2, 4, "Identity Database", "👤 users table ready");
    step_timer.finish();

    // [3/4] Blob store
    let step_timer = OpTimer::new("server", "blob_store");
    let blobs = Arc::new(BlobStore::new(&config.storage.uploads_dir));
    blobs.ensure_dir().await?;
    log_init_step!(
        3,
        4,
        "Blob Store",
        format!("🖼️  {}", config.storage.uploads_dir)
    );
    step_timer.finish();

    // [4/4] Sync channel registry
    let step_timer = OpTimer::new("server", "channel_registry");
    let channels = Arc::new(ChannelRegistry::new());
    log_init_step!(
        4,
        4,
        "Sync Channels",
        format!("🔄 heartbeat {}s", config.sync.heartbeat_secs)
    );
    step_timer.finish();

    Ok(AppState {
        config: Arc::new(config),
        registry,
        blobs,
        channels,
    })
}

/// Layer middleware and routes over an already-built state.
pub fn create_app_from_state(state: AppState) -> Router {
    let uploads_dir = state.config.storage.uploads_dir.clone();
    let timeout_secs = state.config.server.timeout_secs;

    create_router(&uploads_dir)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            gateway::auth::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(timeout_secs)))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the main router with all routes.
fn create_router(uploads_dir: &str) -> Router<AppState> {
    Router::new()
        .merge(api::create_router())
        .merge(gateway::create_router())
        .merge(sync::router())
        .nest_service("/uploads", ServeDir::new(uploads_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_app() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.auth.jwt_secret = Some("test-secret".into());
        config.storage.data_dir = dir.path().join("db").display().to_string();
        config.storage.uploads_dir = dir.path().join("uploads").display().to_string();

        let app = create_app(config).await;
        assert!(app.is_ok());
    }
}
