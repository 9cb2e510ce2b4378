//! Connection registry: live WebSocket connections indexed by user, device
//! session, subscribed category, and role.
//!
//! The registry holds back-references only — a connection's lifetime is
//! owned by its actor (`ws::actor`). All indices sit behind one RwLock so
//! that register/unregister updates every index atomically and removal can
//! never leave a dangling category or role entry. The lock is never held
//! across an await point.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use uuid::Uuid;

use crate::ws::outbound::OutboundQueue;

pub type ConnectionId = Uuid;

/// Shared handle to one live connection. The actor owns the socket; the
/// registry and router only ever touch the outbound queue and metadata.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
    pub role: String,
    /// Device session key: a new connection for the same (user, session)
    /// evicts the previous one.
    pub session_id: String,
    pub outbound: OutboundQueue,
    /// Millis since epoch of the last heartbeat (pong or connect).
    last_heartbeat_ms: AtomicI64,
}

impl ConnectionHandle {
    pub fn new(user_id: &str, role: &str, session_id: &str, buffer_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            role: role.to_string(),
            session_id: session_id.to_string(),
            outbound: OutboundQueue::new(buffer_capacity),
            last_heartbeat_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        })
    }

    pub fn touch_heartbeat(&self) {
        self.last_heartbeat_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// True if no heartbeat was seen within `window_ms`.
    pub fn heartbeat_overdue(&self, window_ms: i64) -> bool {
        let last = self.last_heartbeat_ms.load(Ordering::Relaxed);
        Utc::now().timestamp_millis() - last > window_ms
    }
}

struct Registered {
    handle: Arc<ConnectionHandle>,
    categories: HashSet<String>,
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<ConnectionId, Registered>,
    by_user: HashMap<String, Vec<ConnectionId>>,
    by_session: HashMap<(String, String), ConnectionId>,
    by_category: HashMap<String, HashSet<ConnectionId>>,
    by_role: HashMap<String, HashSet<ConnectionId>>,
}

impl Indexes {
    /// Remove a connection from every index. No-op if absent.
    fn remove(&mut self, id: ConnectionId) -> Option<Registered> {
        let registered = self.by_id.remove(&id)?;
        let handle = &registered.handle;

        if let Some(ids) = self.by_user.get_mut(&handle.user_id) {
            ids.retain(|c| *c != id);
            if ids.is_empty() {
                self.by_user.remove(&handle.user_id);
            }
        }

        let session_key = (handle.user_id.clone(), handle.session_id.clone());
        if self.by_session.get(&session_key) == Some(&id) {
            self.by_session.remove(&session_key);
        }

        for category in &registered.categories {
            if let Some(ids) = self.by_category.get_mut(category) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_category.remove(category);
                }
            }
        }

        if let Some(ids) = self.by_role.get_mut(&handle.role) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_role.remove(&handle.role);
            }
        }

        Some(registered)
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Indexes>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a connection under its user, session, role, and categories.
    /// Returns the handle of a prior connection for the same (user, session)
    /// if one was evicted; the caller closes it outside the lock.
    pub fn register(
        &self,
        handle: Arc<ConnectionHandle>,
        categories: HashSet<String>,
    ) -> Option<Arc<ConnectionHandle>> {
        let evicted = {
            let mut inner = self.inner.write().expect("registry lock");

            let session_key = (handle.user_id.clone(), handle.session_id.clone());
            let evicted = inner
                .by_session
                .get(&session_key)
                .copied()
                .and_then(|old_id| inner.remove(old_id))
                .map(|r| r.handle);

            inner
                .by_user
                .entry(handle.user_id.clone())
                .or_default()
                .push(handle.id);
            inner.by_session.insert(session_key, handle.id);
            inner
                .by_role
                .entry(handle.role.clone())
                .or_default()
                .insert(handle.id);
            for category in &categories {
                inner
                    .by_category
                    .entry(category.clone())
                    .or_default()
                    .insert(handle.id);
            }
            inner.by_id.insert(
                handle.id,
                Registered {
                    handle: handle.clone(),
                    categories,
                },
            );
            evicted
        };

        tracing::debug!(
            user_id = %handle.user_id,
            connection_id = %handle.id,
            evicted = evicted.is_some(),
            "Connection registered"
        );
        evicted
    }

    /// Remove a connection from all indices. Safe to call repeatedly.
    pub fn unregister(&self, id: ConnectionId) {
        let removed = self.inner.write().expect("registry lock").remove(id);
        if let Some(registered) = removed {
            tracing::debug!(
                user_id = %registered.handle.user_id,
                connection_id = %id,
                "Connection unregistered"
            );
        }
    }

    /// Add categories to a live connection's subscription set.
    pub fn subscribe(&self, id: ConnectionId, categories: &HashSet<String>) {
        let mut inner = self.inner.write().expect("registry lock");
        if !inner.by_id.contains_key(&id) {
            return;
        }
        for category in categories {
            inner
                .by_category
                .entry(category.clone())
                .or_default()
                .insert(id);
        }
        if let Some(registered) = inner.by_id.get_mut(&id) {
            registered.categories.extend(categories.iter().cloned());
        }
    }

    /// Drop categories from a live connection's subscription set.
    pub fn unsubscribe(&self, id: ConnectionId, categories: &HashSet<String>) {
        let mut inner = self.inner.write().expect("registry lock");
        for category in categories {
            if let Some(ids) = inner.by_category.get_mut(category) {
                ids.remove(&id);
                if ids.is_empty() {
                    inner.by_category.remove(category);
                }
            }
        }
        if let Some(registered) = inner.by_id.get_mut(&id) {
            registered.categories.retain(|c| !categories.contains(c));
        }
    }

    /// Clear every category subscription for a connection.
    pub fn unsubscribe_all(&self, id: ConnectionId) {
        let categories = {
            let inner = self.inner.read().expect("registry lock");
            match inner.by_id.get(&id) {
                Some(registered) => registered.categories.clone(),
                None => return,
            }
        };
        self.unsubscribe(id, &categories);
    }

    /// Snapshot of a user's live connections. Callers must not retain the
    /// handles past the current operation — connections close concurrently.
    pub fn lookup_user(&self, user_id: &str) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().expect("registry lock");
        inner
            .by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id))
                    .map(|r| r.handle.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn lookup_category(&self, category: &str) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().expect("registry lock");
        inner
            .by_category
            .get(category)
            .map(|ids| collect_handles(&inner, ids))
            .unwrap_or_default()
    }

    pub fn lookup_role(&self, role: &str) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().expect("registry lock");
        inner
            .by_role
            .get(role)
            .map(|ids| collect_handles(&inner, ids))
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().expect("registry lock");
        inner.by_id.values().map(|r| r.handle.clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().expect("registry lock").by_id.len()
    }

    /// Per-category subscriber counts for the status endpoint. BTreeMap
    /// keeps the JSON output stable.
    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        let inner = self.inner.read().expect("registry lock");
        inner
            .by_category
            .iter()
            .map(|(category, ids)| (category.clone(), ids.len()))
            .collect()
    }

    /// Close every live connection (server shutdown). The actors observe
    /// their queues closing and tear themselves down.
    pub fn close_all(&self, code: u16, reason: &str) {
        for handle in self.all() {
            handle.outbound.close_with(code, reason);
        }
    }
}

fn collect_handles(inner: &Indexes, ids: &HashSet<ConnectionId>) -> Vec<Arc<ConnectionHandle>> {
    ids.iter()
        .filter_map(|id| inner.by_id.get(id))
        .map(|r| r.handle.clone())
        .collect()
}
