//! Bounded outbound buffer between the router and a connection's write pump.
//!
//! Pushes never block: on overflow the oldest non-critical message is
//! evicted (drop-oldest backpressure). A slow client therefore loses old
//! non-critical messages instead of stalling the router or other clients.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::ws::protocol::Notification;

/// Why a push was refused outright.
#[derive(Debug)]
pub struct Closed(pub Notification);

pub struct OutboundQueue {
    items: Mutex<VecDeque<Notification>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
    /// Close frame (code, reason) the write pump should send on drain-out.
    close_reason: Mutex<Option<(u16, String)>>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            close_reason: Mutex::new(None),
        }
    }

    /// Push a notification, evicting under backpressure. Returns the number
    /// of messages dropped to make room (0 or 1), or `Closed` carrying the
    /// message back so the caller can re-route it to the queue store.
    ///
    /// Eviction policy on a full buffer:
    /// - incoming critical evicts the oldest non-critical, or failing that
    ///   the oldest message outright;
    /// - incoming normal evicts the oldest non-critical, or is itself
    ///   dropped when only critical messages are buffered.
    pub fn push(&self, notification: Notification) -> Result<u64, Closed> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Closed(notification));
        }
        let mut dropped = 0u64;
        {
            let mut items = self.items.lock().expect("outbound queue lock");
            if items.len() >= self.capacity {
                let oldest_normal = items.iter().position(|n| !n.is_critical());
                match (oldest_normal, notification.is_critical()) {
                    (Some(idx), _) => {
                        items.remove(idx);
                        dropped = 1;
                    }
                    (None, true) => {
                        items.pop_front();
                        dropped = 1;
                    }
                    (None, false) => {
                        // Buffer is all-critical: the incoming normal
                        // message is the one that gets dropped.
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return Ok(1);
                    }
                }
            }
            items.push_back(notification);
        }
        if dropped > 0 {
            self.dropped.fetch_add(dropped, Ordering::Relaxed);
        }
        self.notify.notify_one();
        Ok(dropped)
    }

    /// Insert a backlog batch ahead of everything already buffered,
    /// preserving the batch's own order. Used once per connection to put
    /// flushed offline messages in front of live traffic; the backlog is
    /// bounded by the store's TTLs, so it may exceed `capacity`.
    pub fn prepend(&self, batch: Vec<Notification>) -> Result<(), Closed> {
        if self.closed.load(Ordering::Acquire) {
            if let Some(first) = batch.into_iter().next() {
                return Err(Closed(first));
            }
            return Ok(());
        }
        {
            let mut items = self.items.lock().expect("outbound queue lock");
            for notification in batch.into_iter().rev() {
                items.push_front(notification);
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Non-blocking pop of the oldest buffered message.
    pub fn pop(&self) -> Option<Notification> {
        self.items.lock().expect("outbound queue lock").pop_front()
    }

    /// Await the next message. Returns `None` once the queue is closed and
    /// fully drained, so the write pump can flush pending frames before
    /// sending the close frame.
    pub async fn recv(&self) -> Option<Notification> {
        loop {
            let notified = self.notify.notified();
            if let Some(n) = self.pop() {
                return Some(n);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Close the queue; pending items stay poppable for the grace drain.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Close and record the WebSocket close frame the write pump should
    /// emit (e.g. 4008 "session replaced", 1001 on shutdown).
    pub fn close_with(&self, code: u16, reason: &str) {
        {
            let mut slot = self.close_reason.lock().expect("close reason lock");
            if slot.is_none() {
                *slot = Some((code, reason.to_string()));
            }
        }
        self.close();
    }

    pub fn take_close_reason(&self) -> Option<(u16, String)> {
        self.close_reason.lock().expect("close reason lock").take()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("outbound queue lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total messages dropped under backpressure since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
