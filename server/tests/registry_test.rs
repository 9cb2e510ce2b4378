//! Registry invariants: session eviction, index consistency, no dangling
//! category entries after unregister.

use std::collections::HashSet;

use haven_notify::ws::registry::{ConnectionHandle, ConnectionRegistry};

fn categories(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_same_session_register_evicts_previous() {
    let registry = ConnectionRegistry::new();

    let c1 = ConnectionHandle::new("u1", "volunteer", "device-a", 8);
    let c2 = ConnectionHandle::new("u1", "volunteer", "device-a", 8);

    assert!(registry.register(c1.clone(), categories(&["queue_updates"])).is_none());
    let evicted = registry
        .register(c2.clone(), categories(&["queue_updates"]))
        .expect("second register for the same session must evict");
    assert_eq!(evicted.id, c1.id);

    // Only the newer connection is tracked.
    let live = registry.lookup_user("u1");
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, c2.id);

    // The evicted connection's queue was closed by the caller; the
    // registry no longer references it anywhere.
    let subs = registry.lookup_category("queue_updates");
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].id, c2.id);
}

#[test]
fn test_distinct_sessions_coexist() {
    let registry = ConnectionRegistry::new();

    let phone = ConnectionHandle::new("u1", "volunteer", "phone", 8);
    let laptop = ConnectionHandle::new("u1", "volunteer", "laptop", 8);

    assert!(registry.register(phone, categories(&[])).is_none());
    assert!(registry.register(laptop, categories(&[])).is_none());

    assert_eq!(registry.lookup_user("u1").len(), 2);
    assert_eq!(registry.connection_count(), 2);
}

#[test]
fn test_unregister_clears_every_index() {
    let registry = ConnectionRegistry::new();
    let conn = ConnectionHandle::new("u1", "admin", "s1", 8);
    registry.register(conn.clone(), categories(&["alerts", "queue_updates"]));

    registry.unregister(conn.id);

    assert!(registry.lookup_user("u1").is_empty());
    assert!(registry.lookup_category("alerts").is_empty());
    assert!(registry.lookup_category("queue_updates").is_empty());
    assert!(registry.lookup_role("admin").is_empty());
    assert!(registry.category_counts().is_empty());
    assert_eq!(registry.connection_count(), 0);

    // Idempotent: a second unregister is a no-op.
    registry.unregister(conn.id);
}

#[test]
fn test_runtime_subscribe_and_unsubscribe() {
    let registry = ConnectionRegistry::new();
    let conn = ConnectionHandle::new("u1", "visitor", "s1", 8);
    registry.register(conn.clone(), categories(&[]));

    registry.subscribe(conn.id, &categories(&["help_requests"]));
    assert_eq!(registry.lookup_category("help_requests").len(), 1);

    registry.unsubscribe(conn.id, &categories(&["help_requests"]));
    assert!(registry.lookup_category("help_requests").is_empty());

    // Unsubscribing a category never subscribed to is a no-op.
    registry.unsubscribe(conn.id, &categories(&["donations"]));
    assert_eq!(registry.lookup_user("u1").len(), 1);
}

#[test]
fn test_role_and_global_lookups() {
    let registry = ConnectionRegistry::new();
    let admin = ConnectionHandle::new("a1", "admin", "s1", 8);
    let vol1 = ConnectionHandle::new("v1", "volunteer", "s1", 8);
    let vol2 = ConnectionHandle::new("v2", "volunteer", "s1", 8);
    registry.register(admin, categories(&[]));
    registry.register(vol1, categories(&[]));
    registry.register(vol2, categories(&[]));

    assert_eq!(registry.lookup_role("volunteer").len(), 2);
    assert_eq!(registry.lookup_role("admin").len(), 1);
    assert!(registry.lookup_role("visitor").is_empty());
    assert_eq!(registry.all().len(), 3);
}

#[test]
fn test_close_all_closes_outbound_queues() {
    let registry = ConnectionRegistry::new();
    let c1 = ConnectionHandle::new("u1", "visitor", "s1", 8);
    let c2 = ConnectionHandle::new("u2", "visitor", "s1", 8);
    registry.register(c1.clone(), categories(&[]));
    registry.register(c2.clone(), categories(&[]));

    registry.close_all(1001, "Server shutting down");

    assert!(c1.outbound.is_closed());
    assert!(c2.outbound.is_closed());
    assert_eq!(
        c1.outbound.take_close_reason(),
        Some((1001, "Server shutting down".to_string()))
    );
}
