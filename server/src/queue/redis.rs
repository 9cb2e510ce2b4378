//! Redis-backed queue store.
//!
//! Layout: one sorted set per user per priority tier,
//! `haven:backlog:{user_id}:{critical|normal}`, member = notification JSON,
//! score = enqueue time in epoch millis. Expiry is derived from the score
//! (a message is dead once `score + ttl < now`), so the sweep is a single
//! ZREMRANGEBYSCORE per key. A key-level EXPIRE acts as a safety net for
//! users who never reconnect.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::queue::{QueueError, QueueStore, QueueTtls};
use crate::ws::protocol::{Notification, Priority};

const KEY_PREFIX: &str = "haven:backlog:";

fn backlog_key(user_id: &str, priority: Priority) -> String {
    let tier = match priority {
        Priority::Critical => "critical",
        Priority::Normal => "normal",
    };
    format!("{KEY_PREFIX}{user_id}:{tier}")
}

/// Priority tier encoded in a backlog key, if it is one of ours.
fn tier_of_key(key: &str) -> Option<Priority> {
    if key.ends_with(":critical") {
        Some(Priority::Critical)
    } else if key.ends_with(":normal") {
        Some(Priority::Normal)
    } else {
        None
    }
}

pub struct RedisQueueStore {
    conn: ConnectionManager,
    ttls: QueueTtls,
}

impl RedisQueueStore {
    /// Open a multiplexed connection with automatic reconnection.
    pub async fn connect(url: &str, ttls: QueueTtls) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis queue store");
        Ok(Self { conn, ttls })
    }

    async fn try_enqueue(&self, user_id: &str, notification: &Notification) -> Result<(), QueueError> {
        let key = backlog_key(user_id, notification.priority);
        let member = serde_json::to_string(notification)?;
        let score = Utc::now().timestamp_millis();
        let ttl_secs = self.ttls.ttl_for(notification.priority).as_secs() as i64;

        let mut conn = self.conn.clone();
        let _: () = conn.zadd(&key, member, score).await?;
        let _: () = conn.expire(&key, ttl_secs).await?;
        Ok(())
    }

    async fn try_flush(&self, user_id: &str) -> Result<Vec<Notification>, QueueError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();
        let mut out = Vec::new();

        // Critical tier first, then normal; each zset is already in
        // enqueue order, giving (priority desc, enqueue asc) overall.
        for priority in [Priority::Critical, Priority::Normal] {
            let key = backlog_key(user_id, priority);
            let cutoff = now_ms - self.ttls.ttl_for(priority).as_millis() as i64;

            // Read-then-delete atomically so an enqueue racing the flush is
            // either included or left for the next one, never lost.
            let (members,): (Vec<String>,) = redis::pipe()
                .atomic()
                .cmd("ZRANGEBYSCORE")
                .arg(&key)
                .arg(format!("({cutoff}"))
                .arg("+inf")
                .cmd("DEL")
                .arg(&key)
                .ignore()
                .query_async(&mut conn)
                .await?;

            for member in members {
                match serde_json::from_str::<Notification>(&member) {
                    Ok(notification) => out.push(notification),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping undecodable queued message");
                    }
                }
            }
        }
        Ok(out)
    }

    async fn backlog_keys(&self) -> Result<Vec<String>, QueueError> {
        let mut scan_conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut iter = scan_conn
            .scan_match::<_, String>(format!("{KEY_PREFIX}*"))
            .await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn try_sweep(&self) -> Result<u64, QueueError> {
        let now_ms = Utc::now().timestamp_millis();
        let keys = self.backlog_keys().await?;
        let mut conn = self.conn.clone();
        let mut removed = 0u64;
        for key in keys {
            let Some(priority) = tier_of_key(&key) else {
                continue;
            };
            let cutoff = now_ms - self.ttls.ttl_for(priority).as_millis() as i64;
            let count: u64 = redis::cmd("ZREMRANGEBYSCORE")
                .arg(&key)
                .arg("-inf")
                .arg(cutoff)
                .query_async(&mut conn)
                .await?;
            removed += count;
        }
        Ok(removed)
    }

    async fn try_depth(&self) -> Result<u64, QueueError> {
        let now_ms = Utc::now().timestamp_millis();
        let keys = self.backlog_keys().await?;
        let mut conn = self.conn.clone();
        let mut total = 0u64;
        for key in keys {
            let Some(priority) = tier_of_key(&key) else {
                continue;
            };
            // Count only entries a flush would still deliver.
            let cutoff = now_ms - self.ttls.ttl_for(priority).as_millis() as i64;
            let count: u64 = conn.zcount(&key, format!("({cutoff}"), "+inf").await?;
            total += count;
        }
        Ok(total)
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn enqueue(&self, user_id: &str, notification: Notification) {
        if let Err(e) = self.try_enqueue(user_id, &notification).await {
            // The producer already got its "delivery attempted" result;
            // log the loss and move on.
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Queue store unavailable, dropping queued message"
            );
        }
    }

    async fn flush_for(&self, user_id: &str) -> Vec<Notification> {
        match self.try_flush(user_id).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Backlog flush failed, continuing with live traffic only"
                );
                Vec::new()
            }
        }
    }

    async fn sweep_expired(&self) {
        match self.try_sweep().await {
            Ok(removed) if removed > 0 => {
                tracing::info!(removed, "Swept expired queued messages");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Expiry sweep failed");
            }
        }
    }

    async fn depth(&self) -> u64 {
        match self.try_depth().await {
            Ok(depth) => depth,
            Err(e) => {
                tracing::warn!(error = %e, "Queue depth query failed");
                0
            }
        }
    }
}
