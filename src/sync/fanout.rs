//! Best-effort notification fan-out to live sync channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::sync::protocol::ServerMessage;

struct Channel {
    user_id: i64,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

/// Registry of open sync channels, keyed by an opaque channel id.
///
/// Delivery is best-effort: a message reaches a user only if a live channel
/// for that user exists at the instant of the call. Channels whose receiver
/// has gone away are pruned during delivery.
#[derive(Default)]
pub struct ChannelRegistry {
    next_id: AtomicU64,
    channels: Mutex<HashMap<u64, Channel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open channel; returns its id for later deregistration.
    pub fn register(&self, user_id: i64, sender: mpsc::UnboundedSender<ServerMessage>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.channels.lock().insert(id, Channel { user_id, sender });
        id
    }

    /// Remove a channel when its connection closes.
    pub fn deregister(&self, id: u64) {
        self.channels.lock().remove(&id);
    }

    /// Push a message to every open channel belonging to `target_user_id`.
    ///
    /// Returns the number of channels the message was handed to.
    pub fn notify(&self, target_user_id: i64, message: &ServerMessage) -> usize {
        let mut channels = self.channels.lock();
        let mut dead = Vec::new();
        let mut delivered = 0;

        for (id, channel) in channels.iter() {
            if channel.user_id != target_user_id {
                continue;
            }
            if channel.sender.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }

        for id in dead {
            channels.remove(&id);
        }

        delivered
    }

    /// Number of currently registered channels.
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.len())
            .finish()
    }
}
