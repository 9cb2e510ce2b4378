//! Wire protocol for the notification WebSocket.
//!
//! Client frames are small JSON commands (subscribe/unsubscribe/pong).
//! Server frames are `Notification` objects with a stable id, category,
//! priority, and an opaque JSON payload produced by the domain handlers.

use std::collections::HashSet;

use axum::extract::ws::Message;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;
use crate::ws::registry::ConnectionHandle;

/// Category used for server-originated warning frames (rate limiting etc.).
pub const SYSTEM_CATEGORY: &str = "system";

/// Delivery priority. Critical messages get a longer queue TTL and are
/// flushed to reconnecting clients before normal ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    Critical,
}

/// A server→client notification frame.
///
/// `id` is a UUIDv7 assigned at creation; clients use it to de-duplicate
/// (the router may deliver the same message twice after a transient retry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub timestamp: String,
}

impl Notification {
    /// Build a notification with a fresh id and current timestamp.
    pub fn new(
        kind: &str,
        category: &str,
        priority: Priority,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind: kind.to_string(),
            category: category.to_string(),
            priority,
            payload,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Warning frame sent back to a client (e.g. rate limit exceeded).
    /// Reuses the notification shape so clients only parse one frame type.
    pub fn warning(reason: &str) -> Self {
        Self::new(
            "warning",
            SYSTEM_CATEGORY,
            Priority::Normal,
            serde_json::json!({ "reason": reason }),
        )
    }

    pub fn is_critical(&self) -> bool {
        self.priority == Priority::Critical
    }
}

/// Encode a notification as a WebSocket text message.
/// Serialization of this shape cannot fail; fall back to an empty object
/// rather than panicking in the write pump.
pub fn to_message(notification: &Notification) -> Message {
    let text = serde_json::to_string(notification).unwrap_or_else(|_| "{}".to_string());
    Message::Text(text.into())
}

/// Client→server frames.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe { categories: Vec<String> },
    Unsubscribe { categories: Vec<String> },
    Pong,
}

/// Outcome of processing one inbound frame.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    /// Client unsubscribed from everything — initiate close.
    Close,
}

/// Handle a decoded inbound text frame. Undecodable frames are logged and
/// dropped (the rate limiter has already charged a token for them).
pub fn handle_client_frame(
    text: &str,
    handle: &ConnectionHandle,
    state: &AppState,
) -> FrameOutcome {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(
                user_id = %handle.user_id,
                error = %e,
                "Dropping undecodable client frame"
            );
            return FrameOutcome::Continue;
        }
    };

    match frame {
        ClientFrame::Subscribe { categories } => {
            let categories: HashSet<String> = categories.into_iter().collect();
            state.registry.subscribe(handle.id, &categories);
            tracing::debug!(
                user_id = %handle.user_id,
                count = categories.len(),
                "Subscribed to categories"
            );
            FrameOutcome::Continue
        }
        ClientFrame::Unsubscribe { categories } => {
            if categories.is_empty() {
                // Unsubscribe-all: the client is done with this connection.
                state.registry.unsubscribe_all(handle.id);
                return FrameOutcome::Close;
            }
            let categories: HashSet<String> = categories.into_iter().collect();
            state.registry.unsubscribe(handle.id, &categories);
            FrameOutcome::Continue
        }
        ClientFrame::Pong => {
            handle.touch_heartbeat();
            FrameOutcome::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_decodes_subscribe() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"subscribe","categories":["queue_updates"]}"#)
                .expect("decode");
        match frame {
            ClientFrame::Subscribe { categories } => {
                assert_eq!(categories, vec!["queue_updates".to_string()]);
            }
            other => panic!("expected subscribe, got {:?}", other),
        }
    }

    #[test]
    fn notification_round_trips_priority_lowercase() {
        let n = Notification::new(
            "help_request_approved",
            "help_requests",
            Priority::Critical,
            serde_json::json!({ "request_id": 42 }),
        );
        let text = serde_json::to_string(&n).unwrap();
        assert!(text.contains(r#""priority":"critical""#));
        assert!(text.contains(r#""type":"help_request_approved""#));
        let back: Notification = serde_json::from_str(&text).unwrap();
        assert_eq!(back, n);
    }
}
