//! In-memory queue store: same contract as the Redis backend, used when no
//! Redis URL is configured and throughout the test suite.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::queue::{delivery_order, QueueStore, QueueTtls};
use crate::ws::protocol::Notification;

struct Stored {
    notification: Notification,
    enqueued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryQueueStore {
    ttls: QueueTtls,
    queues: Mutex<HashMap<String, Vec<Stored>>>,
}

impl MemoryQueueStore {
    pub fn new(ttls: QueueTtls) -> Self {
        Self {
            ttls,
            queues: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, user_id: &str, notification: Notification) {
        let now = Utc::now();
        let ttl = self.ttls.ttl_for(notification.priority);
        let expires_at = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut queues = self.queues.lock().expect("queue store lock");
        queues.entry(user_id.to_string()).or_default().push(Stored {
            notification,
            enqueued_at: now,
            expires_at,
        });
    }

    async fn flush_for(&self, user_id: &str) -> Vec<Notification> {
        let drained = {
            let mut queues = self.queues.lock().expect("queue store lock");
            queues.remove(user_id)
        };
        let Some(drained) = drained else {
            return Vec::new();
        };

        let now = Utc::now();
        let mut live: Vec<(Notification, i64)> = drained
            .into_iter()
            .filter(|s| s.expires_at > now)
            .map(|s| (s.notification, s.enqueued_at.timestamp_millis()))
            .collect();
        delivery_order(&mut live);
        live.into_iter().map(|(n, _)| n).collect()
    }

    async fn sweep_expired(&self) {
        let now = Utc::now();
        let mut removed = 0usize;
        {
            let mut queues = self.queues.lock().expect("queue store lock");
            queues.retain(|_, stored| {
                let before = stored.len();
                stored.retain(|s| s.expires_at > now);
                removed += before - stored.len();
                !stored.is_empty()
            });
        }
        if removed > 0 {
            tracing::info!(removed, "Swept expired queued messages");
        }
    }

    async fn depth(&self) -> u64 {
        // Expired-but-unswept entries never get delivered, so they do not
        // count toward the reported backlog.
        let now = Utc::now();
        let queues = self.queues.lock().expect("queue store lock");
        queues
            .values()
            .flatten()
            .filter(|s| s.expires_at > now)
            .count() as u64
    }
}
