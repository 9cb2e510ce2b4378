//! Read-only operator status endpoint.

use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Live WebSocket connections
    pub connections: usize,
    /// Subscriber count per category
    pub categories: BTreeMap<String, usize>,
    /// Messages waiting in the offline queue across all users
    pub queue_depth: u64,
    /// Deliveries that reached at least one live connection
    pub delivered: u64,
    /// Messages handed to the offline queue
    pub queued: u64,
    /// Messages dropped under backpressure
    pub dropped: u64,
}

/// GET /api/status — live connection count, per-category subscriber
/// counts, queue depth, and delivery counters. No mutation.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let (delivered, queued, dropped) = state.stats.snapshot();
    Json(StatusResponse {
        connections: state.registry.connection_count(),
        categories: state.registry.category_counts(),
        queue_depth: state.queue.depth().await,
        delivered,
        queued,
        dropped,
    })
}
