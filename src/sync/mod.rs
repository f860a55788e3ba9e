//! Sync channel: WebSocket endpoint, per-channel message loop and heartbeat.
//!
//! The upgrade is gated by the identity token presented as a query
//! parameter; a channel never reaches the open state without a validated
//! identity. While open, a liveness ping goes out on a fixed interval and a
//! silent peer is closed and deregistered from the fan-out registry.

pub mod engine;
pub mod fanout;
pub mod protocol;

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::SinkExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::gateway::auth::{user_from_claims, validate_jwt, AuthenticatedUser};
use crate::AppState;

pub use fanout::ChannelRegistry;
pub use protocol::{ClientMessage, ServerMessage};

/// Sync channel route.
pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade))
}

#[derive(Debug, Deserialize)]
struct UpgradeParams {
    token: Option<String>,
}

/// Validate the identity token, then upgrade.
async fn upgrade(
    State(state): State<AppState>,
    Query(params): Query<UpgradeParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = params.token.ok_or(ApiError::Unauthorized)?;
    let secret = state
        .config
        .auth
        .jwt_secret
        .as_deref()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("JWT secret not configured")))?;
    let claims = validate_jwt(&token, secret).map_err(|_| ApiError::Unauthorized)?;
    let user = user_from_claims(claims)?;

    Ok(ws
        .on_upgrade(move |socket| handle_channel(socket, state, user))
        .into_response())
}

async fn handle_channel(mut socket: WebSocket, state: AppState, user: AuthenticatedUser) {
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let channel_id = state.channels.register(user.user_id, tx);
    let tenant = user.tenant_name();
    tracing::info!(user = %user.username, channel_id, "Sync channel opened");

    let mut heartbeat =
        tokio::time::interval(Duration::from_secs(state.config.sync.heartbeat_secs));
    // First tick fires immediately; skip it so the first ping waits a full
    // interval.
    heartbeat.tick().await;
    let mut alive = true;

    loop {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    alive = true;
                    let reply = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => engine::handle_message(&state.registry, &tenant, message).await,
                        Err(e) => ServerMessage::Error {
                            message: format!("Unrecognized message: {e}"),
                        },
                    };
                    if !send_json(&mut socket, &reply).await {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => alive = true,
                Some(Ok(Message::Ping(payload))) => {
                    alive = true;
                    if socket.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(channel_id, error = %e, "Sync channel receive error");
                    break;
                }
            },
            Some(message) = outbound.recv() => {
                if !send_json(&mut socket, &message).await {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if !alive {
                    tracing::info!(channel_id, "Closing unresponsive sync channel");
                    break;
                }
                alive = false;
                if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.channels.deregister(channel_id);
    tracing::info!(user = %user.username, channel_id, "Sync channel closed");
    let _ = socket.close().await;
}

async fn send_json(socket: &mut WebSocket, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server message");
            true
        }
    }
}
