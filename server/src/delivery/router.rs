//! Router/broadcaster: resolves a target spec against the registry and
//! pushes onto live connections' outbound queues, falling back to the
//! queue store for offline single-user targets.
//!
//! `deliver` never blocks on socket I/O and never surfaces a failure to
//! the producer — this is a best-effort notification layer, and producers
//! only ever learn that delivery was attempted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::queue::QueueStore;
use crate::ws::protocol::Notification;
use crate::ws::registry::{ConnectionHandle, ConnectionRegistry};

/// Who a notification is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    User { id: String },
    Role { role: String },
    Category { category: String },
    Global,
}

/// What happened to a delivery attempt. Informational only — producers
/// treat every outcome as "attempted".
#[derive(Debug, Default, Clone, Serialize)]
pub struct DeliveryResult {
    /// Live connections the message was pushed to.
    pub live: usize,
    /// Whether the message was handed to the queue store.
    pub queued: bool,
    /// Messages evicted from full outbound buffers to make room.
    pub dropped: u64,
}

/// Process-wide delivery counters, surfaced by the status endpoint.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    queued: AtomicU64,
    dropped: AtomicU64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.delivered.load(Ordering::Relaxed),
            self.queued.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }
}

pub struct Router {
    registry: Arc<ConnectionRegistry>,
    queue: Arc<dyn QueueStore>,
    stats: Arc<DeliveryStats>,
}

impl Router {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        queue: Arc<dyn QueueStore>,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self {
            registry,
            queue,
            stats,
        }
    }

    /// Deliver a notification to a target spec.
    ///
    /// Single-user targets fall back to the queue store when the user has
    /// no live connection, or when every push failed because the
    /// connection closed mid-delivery (a push race is a delivery miss, not
    /// an error — the message is re-routed exactly once). Broadcast
    /// targets are best-effort only and are never queued.
    pub async fn deliver(&self, target: Target, notification: Notification) -> DeliveryResult {
        match target {
            Target::User { id } => self.deliver_user(&id, notification).await,
            Target::Role { role } => {
                self.fan_out(self.registry.lookup_role(&role), notification)
            }
            Target::Category { category } => {
                self.fan_out(self.registry.lookup_category(&category), notification)
            }
            Target::Global => self.fan_out(self.registry.all(), notification),
        }
    }

    async fn deliver_user(&self, user_id: &str, notification: Notification) -> DeliveryResult {
        let connections = self.registry.lookup_user(user_id);
        let mut result = self.push_all(&connections, &notification);

        if result.live == 0 {
            tracing::debug!(
                user_id = %user_id,
                message_id = %notification.id,
                "No live connection, queueing for offline delivery"
            );
            self.queue.enqueue(user_id, notification).await;
            self.stats.queued.fetch_add(1, Ordering::Relaxed);
            result.queued = true;
        }
        result
    }

    fn fan_out(
        &self,
        connections: Vec<Arc<ConnectionHandle>>,
        notification: Notification,
    ) -> DeliveryResult {
        self.push_all(&connections, &notification)
    }

    /// Non-blocking push onto each connection's bounded outbound queue.
    /// A closed connection counts as a miss, not a panic.
    fn push_all(
        &self,
        connections: &[Arc<ConnectionHandle>],
        notification: &Notification,
    ) -> DeliveryResult {
        let mut result = DeliveryResult::default();
        for connection in connections {
            match connection.outbound.push(notification.clone()) {
                Ok(dropped) => {
                    result.live += 1;
                    result.dropped += dropped;
                }
                Err(_) => {
                    // Connection closed between lookup and push.
                }
            }
        }
        if result.live > 0 {
            self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        }
        if result.dropped > 0 {
            self.stats.dropped.fetch_add(result.dropped, Ordering::Relaxed);
            tracing::debug!(
                dropped = result.dropped,
                message_id = %notification.id,
                "Backpressure drop on full outbound buffer"
            );
        }
        result
    }
}
