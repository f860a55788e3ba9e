//! Wire protocol for the sync channel.
//!
//! JSON envelopes tagged by `type`. Client messages select one of three
//! operations; every server reply mirrors the request type with a
//! `*_response` tag so the client can keep working locally and resync later
//! instead of tearing down the connection on failure.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One row of caller-supplied column/value pairs.
pub type SyncRow = serde_json::Map<String, serde_json::Value>;

/// Batched mutations keyed by table name. Row order within a table is
/// preserved and applied in sequence.
pub type SyncChanges = HashMap<String, Vec<SyncRow>>;

/// Messages received from a client session.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace the tenant's on-disk database wholesale.
    Save {
        /// Base64-encoded full database image.
        data: String,
    },
    /// Fetch the full current on-disk database.
    Load,
    /// Apply batched row upserts in one transaction.
    Sync { changes: SyncChanges },
}

/// Messages sent to a client session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SaveResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    LoadResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    SyncResponse {
        success: bool,
        /// Server apply time, unix milliseconds.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Unsolicited: a note was shared with this user.
    NoteShared { from: String, title: String },
    /// The inbound message could not be understood.
    Error { message: String },
}

impl ServerMessage {
    pub fn save_ok() -> Self {
        Self::SaveResponse { success: true, error: None }
    }

    pub fn save_err(error: impl Into<String>) -> Self {
        Self::SaveResponse { success: false, error: Some(error.into()) }
    }

    pub fn load_ok(data: String) -> Self {
        Self::LoadResponse { success: true, data: Some(data), error: None }
    }

    pub fn load_err(error: impl Into<String>) -> Self {
        Self::LoadResponse { success: false, data: None, error: Some(error.into()) }
    }

    pub fn sync_ok(timestamp: i64) -> Self {
        Self::SyncResponse { success: true, timestamp: Some(timestamp), error: None }
    }

    pub fn sync_err(error: impl Into<String>) -> Self {
        Self::SyncResponse { success: false, timestamp: None, error: Some(error.into()) }
    }
}
