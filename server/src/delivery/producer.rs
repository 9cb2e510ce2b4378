//! HTTP producer endpoint for out-of-process domain handlers.
//!
//! In-process code calls `Router::deliver` directly; the CRUD services
//! that produce domain events (help request approved, shift assigned,
//! donation received) reach the core through this endpoint instead.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::middleware::Claims;
use crate::delivery::router::{DeliveryResult, Target};
use crate::state::AppState;
use crate::ws::protocol::{Notification, Priority};

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub target: Target,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    #[serde(default)]
    pub payload: Value,
}

fn default_priority() -> Priority {
    Priority::Normal
}

/// POST /api/notify — producer API. Requires an admin or service token.
/// Always responds 202 once accepted: delivery is fire-and-forget and the
/// result body is informational only.
pub async fn notify(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<NotifyRequest>,
) -> Result<(StatusCode, Json<DeliveryResult>), StatusCode> {
    if claims.role != "admin" && claims.role != "service" {
        return Err(StatusCode::FORBIDDEN);
    }

    let notification = Notification::new(&body.kind, &body.category, body.priority, body.payload);
    tracing::debug!(
        message_id = %notification.id,
        target = ?body.target,
        producer = %claims.sub,
        "Producer delivery"
    );

    let result = state.router.deliver(body.target, notification).await;
    Ok((StatusCode::ACCEPTED, Json(result)))
}
