//! Note Station - Tenant Storage & Sync Engine
//!
//! Server-side engine for a personal note-taking service. Each user (tenant)
//! owns one physically separate SQLite database, lazily created and migrated
//! on first use, with automatic corruption recovery. Connected sessions stay
//! consistent through an incremental sync protocol over WebSocket, and image
//! uploads are deduplicated via content-addressed storage.
//!
//! # Architecture
//!
//! - [`config`]: Configuration management and environment loading
//! - [`gateway`]: Identity token validation and auth endpoints
//! - [`database`]: Per-tenant database registry, schema and migrations
//! - [`sync`]: Sync channel protocol, transactional apply and fan-out
//! - [`storage`]: Content-addressed blob store for uploads
//! - [`api`]: HTTP API endpoints
//!
//! # Example
//!
//! ```rust,ignore
//! use note_station::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let app = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:4000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod server;
pub mod storage;
pub mod sync;

use std::sync::Arc;

use config::AppConfig;
use database::TenantRegistry;
use storage::BlobStore;
use sync::ChannelRegistry;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Tenant database registry (the composition root's only shared
    /// storage state).
    pub registry: Arc<TenantRegistry>,
    /// Content-addressed blob store for uploads.
    pub blobs: Arc<BlobStore>,
    /// Open sync channels, for notification fan-out.
    pub channels: Arc<ChannelRegistry>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("registry", &self.registry)
            .field("blobs", &self.blobs)
            .field("channels", &self.channels)
            .finish()
    }
}
