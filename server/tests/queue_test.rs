//! Queue store contract tests against the in-memory backend: priority
//! ordering, one-shot flush, and idempotent TTL expiry.

use std::time::Duration;

use haven_notify::queue::{MemoryQueueStore, QueueStore, QueueTtls};
use haven_notify::ws::protocol::{Notification, Priority};

fn notification(kind: &str, priority: Priority) -> Notification {
    Notification::new(kind, "help_requests", priority, serde_json::json!({}))
}

fn short_ttls() -> QueueTtls {
    QueueTtls {
        critical: Duration::from_secs(60),
        normal: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn test_flush_orders_critical_first_then_fifo() {
    let store = MemoryQueueStore::new(QueueTtls::default());

    store.enqueue("u1", notification("n1", Priority::Normal)).await;
    store.enqueue("u1", notification("c1", Priority::Critical)).await;
    store.enqueue("u1", notification("n2", Priority::Normal)).await;
    store.enqueue("u1", notification("c2", Priority::Critical)).await;

    let flushed = store.flush_for("u1").await;
    let kinds: Vec<&str> = flushed.iter().map(|n| n.kind.as_str()).collect();
    assert_eq!(kinds, vec!["c1", "c2", "n1", "n2"]);
}

#[tokio::test]
async fn test_flush_is_one_shot() {
    let store = MemoryQueueStore::new(QueueTtls::default());
    store.enqueue("u1", notification("m1", Priority::Normal)).await;

    assert_eq!(store.flush_for("u1").await.len(), 1);
    assert!(store.flush_for("u1").await.is_empty());

    // Messages enqueued after the first flush show up in the next one.
    store.enqueue("u1", notification("m2", Priority::Normal)).await;
    let second = store.flush_for("u1").await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].kind, "m2");
}

#[tokio::test]
async fn test_flush_scopes_to_user() {
    let store = MemoryQueueStore::new(QueueTtls::default());
    store.enqueue("u1", notification("for-u1", Priority::Normal)).await;
    store.enqueue("u2", notification("for-u2", Priority::Normal)).await;

    let flushed = store.flush_for("u1").await;
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].kind, "for-u1");
    assert_eq!(store.depth().await, 1);
}

#[tokio::test]
async fn test_expired_messages_never_flushed() {
    let store = MemoryQueueStore::new(short_ttls());
    store.enqueue("u1", notification("stale", Priority::Normal)).await;
    store.enqueue("u1", notification("alert", Priority::Critical)).await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    // The normal message's TTL elapsed; the critical one survives.
    let flushed = store.flush_for("u1").await;
    let kinds: Vec<&str> = flushed.iter().map(|n| n.kind.as_str()).collect();
    assert_eq!(kinds, vec!["alert"]);

    // Idempotent expiry: the stale message does not resurface later.
    assert!(store.flush_for("u1").await.is_empty());
}

#[tokio::test]
async fn test_depth_excludes_expired_entries() {
    let store = MemoryQueueStore::new(short_ttls());
    store.enqueue("u1", notification("stale", Priority::Normal)).await;
    store.enqueue("u1", notification("alert", Priority::Critical)).await;
    assert_eq!(store.depth().await, 2);

    tokio::time::sleep(Duration::from_millis(50)).await;

    // An expired message stops counting as soon as its TTL elapses,
    // before any sweep or flush has run.
    assert_eq!(store.depth().await, 1);
}

#[tokio::test]
async fn test_sweep_removes_expired_entries() {
    let store = MemoryQueueStore::new(short_ttls());
    store.enqueue("u1", notification("stale", Priority::Normal)).await;
    store.enqueue("u2", notification("alert", Priority::Critical)).await;
    assert_eq!(store.depth().await, 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    store.sweep_expired().await;

    assert_eq!(store.depth().await, 1);
    let remaining = store.flush_for("u2").await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].kind, "alert");
}
