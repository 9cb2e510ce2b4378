use std::sync::Arc;

use crate::config::WsConfig;
use crate::delivery::{DeliveryStats, Router};
use crate::queue::QueueStore;
use crate::ws::registry::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
///
/// Everything is explicitly constructed in main (or a test harness) and
/// injected here — no package-level singletons, so lifecycle and tests
/// stay explicit.
#[derive(Clone)]
pub struct AppState {
    /// Live WebSocket connection indices
    pub registry: Arc<ConnectionRegistry>,
    /// Offline message backlog (Redis or in-memory)
    pub queue: Arc<dyn QueueStore>,
    /// Producer-facing delivery entry point
    pub router: Arc<Router>,
    /// Process-wide delivery counters
    pub stats: Arc<DeliveryStats>,
    /// HS256 key shared with the auth service (validation only)
    pub jwt_secret: Vec<u8>,
    /// Per-connection WebSocket tuning
    pub ws: WsConfig,
}
