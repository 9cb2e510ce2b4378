//! Router behavior: offline fallback to the queue store, backpressure on
//! full outbound buffers, and broadcast fan-out semantics.

use std::collections::HashSet;
use std::sync::Arc;

use haven_notify::delivery::{DeliveryStats, Router, Target};
use haven_notify::queue::{MemoryQueueStore, QueueStore, QueueTtls};
use haven_notify::ws::protocol::{Notification, Priority};
use haven_notify::ws::registry::{ConnectionHandle, ConnectionRegistry};

struct Harness {
    registry: Arc<ConnectionRegistry>,
    queue: Arc<MemoryQueueStore>,
    router: Router,
}

fn harness() -> Harness {
    let registry = Arc::new(ConnectionRegistry::new());
    let queue = Arc::new(MemoryQueueStore::new(QueueTtls::default()));
    let router = Router::new(
        registry.clone(),
        queue.clone() as Arc<dyn QueueStore>,
        Arc::new(DeliveryStats::default()),
    );
    Harness {
        registry,
        queue,
        router,
    }
}

fn categories(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn notification(kind: &str, priority: Priority) -> Notification {
    Notification::new(kind, "queue_updates", priority, serde_json::json!({}))
}

#[tokio::test]
async fn test_offline_user_delivery_is_queued() {
    let h = harness();

    let result = h
        .router
        .deliver(
            Target::User { id: "u1".into() },
            notification("m1", Priority::Critical),
        )
        .await;

    assert_eq!(result.live, 0);
    assert!(result.queued);

    let backlog = h.queue.flush_for("u1").await;
    assert_eq!(backlog.len(), 1);
    assert_eq!(backlog[0].kind, "m1");
}

#[tokio::test]
async fn test_live_user_delivery_is_not_queued() {
    let h = harness();
    let conn = ConnectionHandle::new("u1", "visitor", "s1", 8);
    h.registry.register(conn.clone(), categories(&[]));

    let result = h
        .router
        .deliver(
            Target::User { id: "u1".into() },
            notification("m1", Priority::Normal),
        )
        .await;

    assert_eq!(result.live, 1);
    assert!(!result.queued);
    assert_eq!(conn.outbound.len(), 1);
    assert_eq!(h.queue.depth().await, 0);
}

#[tokio::test]
async fn test_closed_connection_requeues_exactly_once() {
    let h = harness();
    let conn = ConnectionHandle::new("u1", "visitor", "s1", 8);
    h.registry.register(conn.clone(), categories(&[]));

    // Connection closes while still registered (actor teardown has not
    // reached unregister yet).
    conn.outbound.close();

    let result = h
        .router
        .deliver(
            Target::User { id: "u1".into() },
            notification("m1", Priority::Normal),
        )
        .await;

    assert_eq!(result.live, 0);
    assert!(result.queued);

    // Re-queued exactly once — not lost, not duplicated.
    let backlog = h.queue.flush_for("u1").await;
    assert_eq!(backlog.len(), 1);
    assert_eq!(backlog[0].kind, "m1");
    assert!(h.queue.flush_for("u1").await.is_empty());
}

#[tokio::test]
async fn test_category_broadcast_reaches_subscribers_only() {
    let h = harness();
    let subscribed = ConnectionHandle::new("u1", "visitor", "s1", 8);
    let other = ConnectionHandle::new("u2", "visitor", "s1", 8);
    h.registry
        .register(subscribed.clone(), categories(&["queue_updates"]));
    h.registry.register(other.clone(), categories(&["donations"]));

    let result = h
        .router
        .deliver(
            Target::Category {
                category: "queue_updates".into(),
            },
            notification("update", Priority::Normal),
        )
        .await;

    assert_eq!(result.live, 1);
    assert_eq!(subscribed.outbound.len(), 1);
    assert!(other.outbound.is_empty());
}

#[tokio::test]
async fn test_broadcast_is_never_queued_for_offline_users() {
    let h = harness();

    let result = h
        .router
        .deliver(
            Target::Category {
                category: "queue_updates".into(),
            },
            notification("update", Priority::Critical),
        )
        .await;

    assert_eq!(result.live, 0);
    assert!(!result.queued);
    assert_eq!(h.queue.depth().await, 0);
}

#[tokio::test]
async fn test_role_and_global_fan_out() {
    let h = harness();
    let vol = ConnectionHandle::new("v1", "volunteer", "s1", 8);
    let admin = ConnectionHandle::new("a1", "admin", "s1", 8);
    h.registry.register(vol.clone(), categories(&[]));
    h.registry.register(admin.clone(), categories(&[]));

    let result = h
        .router
        .deliver(
            Target::Role {
                role: "volunteer".into(),
            },
            notification("shift", Priority::Normal),
        )
        .await;
    assert_eq!(result.live, 1);
    assert_eq!(vol.outbound.len(), 1);
    assert!(admin.outbound.is_empty());

    let result = h
        .router
        .deliver(Target::Global, notification("maintenance", Priority::Normal))
        .await;
    assert_eq!(result.live, 2);
}

#[tokio::test]
async fn test_backpressure_drops_oldest_without_blocking() {
    let h = harness();
    // Capacity 10, no write pump draining.
    let conn = ConnectionHandle::new("u1", "visitor", "s1", 10);
    h.registry
        .register(conn.clone(), categories(&["queue_updates"]));

    let mut total_dropped = 0u64;
    for i in 0..100 {
        let result = h
            .router
            .deliver(
                Target::Category {
                    category: "queue_updates".into(),
                },
                notification(&format!("m{i}"), Priority::Normal),
            )
            .await;
        assert_eq!(result.live, 1, "router must never block or miss");
        total_dropped += result.dropped;
    }

    assert_eq!(conn.outbound.len(), 10);
    assert!(total_dropped >= 90);
    assert!(conn.outbound.dropped_count() >= 90);

    // The survivors are the newest messages.
    assert_eq!(conn.outbound.pop().unwrap().kind, "m90");
}
