//! Durable per-user backlog for messages that missed a live delivery.
//!
//! Two backends implement the same contract: Redis for deployments, an
//! in-memory store for tests and Redis-less single-node setups. Backend
//! failures are logged and swallowed — the notification layer degrades to
//! live-only delivery rather than surfacing errors to producers.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::ws::protocol::{Notification, Priority};

pub use memory::MemoryQueueStore;
pub use redis::RedisQueueStore;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-priority retention for queued messages.
#[derive(Debug, Clone, Copy)]
pub struct QueueTtls {
    pub critical: Duration,
    pub normal: Duration,
}

impl QueueTtls {
    pub fn ttl_for(&self, priority: Priority) -> Duration {
        match priority {
            Priority::Critical => self.critical,
            Priority::Normal => self.normal,
        }
    }
}

impl Default for QueueTtls {
    fn default() -> Self {
        Self {
            critical: Duration::from_secs(24 * 3600),
            normal: Duration::from_secs(3600),
        }
    }
}

/// Contract shared by both backends.
///
/// `flush_for` is one-shot: returned messages are cleared from the store,
/// so a second call only sees messages enqueued after the first. Ordering
/// is priority desc, then enqueue time asc within a tier.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a missed message with a TTL derived from its priority.
    /// Never fails from the caller's perspective.
    async fn enqueue(&self, user_id: &str, notification: Notification);

    /// Drain all non-expired messages for a user, ordered for delivery.
    async fn flush_for(&self, user_id: &str) -> Vec<Notification>;

    /// Remove TTL-expired entries. Called by the background sweep.
    async fn sweep_expired(&self);

    /// Total non-expired queued messages across all users (status endpoint).
    async fn depth(&self) -> u64;
}

/// Spawn the background expiry sweep. Runs forever on a fixed interval,
/// independent of flush calls.
pub fn spawn_expiry_sweep(store: Arc<dyn QueueStore>, interval: Duration) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await;
        loop {
            timer.tick().await;
            store.sweep_expired().await;
        }
    });
}

/// Sort a flushed batch into delivery order: critical first, FIFO within a
/// tier. Backends store per-priority queues in enqueue order, so a stable
/// sort on the priority key is all that is needed.
pub(crate) fn delivery_order(messages: &mut [(Notification, i64)]) {
    messages.sort_by_key(|(n, enqueued_ms)| (!n.is_critical(), *enqueued_ms));
}
