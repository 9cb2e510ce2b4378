use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::time::interval;

use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::ws::handler::CLOSE_SESSION_REPLACED;
use crate::ws::limiter::TokenBucket;
use crate::ws::protocol::{self, FrameOutcome, Notification};
use crate::ws::registry::ConnectionHandle;

/// Grace period for draining pending writes once the connection enters
/// its closing state.
const WRITE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Write pump: owns the sink; drains the connection's outbound queue
///   and sends periodic heartbeat pings
/// - Read pump (this task): consumes inbound frames — subscribe,
///   unsubscribe, pong — behind a per-connection rate limiter
///
/// On entry the connection registers (evicting a prior connection for the
/// same device session) and its offline backlog is flushed onto the
/// outbound queue ahead of any live traffic.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    claims: Claims,
    initial_categories: HashSet<String>,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let handle = ConnectionHandle::new(
        &claims.sub,
        &claims.role,
        &claims.sid,
        state.ws.outbound_buffer,
    );

    // At most one live connection per (user, session): the newcomer wins.
    if let Some(evicted) = state
        .registry
        .register(handle.clone(), initial_categories)
    {
        tracing::info!(
            user_id = %handle.user_id,
            session = %handle.session_id,
            "Evicting previous connection for session"
        );
        evicted
            .outbound
            .close_with(CLOSE_SESSION_REPLACED, "Session replaced");
    }

    // Backlog flush happens before the write pump starts, so queued
    // messages always precede live traffic. A flush failure inside the
    // store is logged there and yields an empty backlog — live traffic
    // is never blocked.
    let backlog = state.queue.flush_for(&handle.user_id).await;
    if !backlog.is_empty() {
        tracing::info!(
            user_id = %handle.user_id,
            count = backlog.len(),
            "Delivering offline backlog"
        );
        let _ = handle.outbound.prepend(backlog);
    }

    tracing::info!(
        user_id = %handle.user_id,
        connection_id = %handle.id,
        "WebSocket actor started"
    );

    let ping_interval = Duration::from_secs(state.ws.ping_interval_secs);
    let pong_window_ms =
        ((state.ws.ping_interval_secs + state.ws.pong_timeout_secs) * 1000) as i64;
    let mut writer_handle = tokio::spawn(write_pump(
        ws_sender,
        handle.clone(),
        ping_interval,
        pong_window_ms,
    ));

    // Inbound frames are rate limited per connection; the bucket lives in
    // this task and so resets naturally on reconnect.
    let mut bucket = TokenBucket::new(state.ws.rate_limit_burst, state.ws.rate_limit_per_minute);

    let mut writer_done = false;
    loop {
        tokio::select! {
            // Write failure, pong timeout, or eviction ends the write pump;
            // treat any of them as the connection closing.
            _ = &mut writer_handle => {
                writer_done = true;
                break;
            }
            maybe = ws_receiver.next() => match maybe {
                Some(Ok(msg)) => match msg {
                    Message::Text(text) => {
                        if !bucket.allow() {
                            tracing::warn!(
                                user_id = %handle.user_id,
                                "Inbound rate limit exceeded, dropping frame"
                            );
                            let _ = handle
                                .outbound
                                .push(Notification::warning("rate limit exceeded, frame dropped"));
                        } else if protocol::handle_client_frame(&text, &handle, &state)
                            == FrameOutcome::Close
                        {
                            tracing::info!(
                                user_id = %handle.user_id,
                                "Client unsubscribed from all categories, closing"
                            );
                            break;
                        }
                    }
                    Message::Pong(_) => {
                        handle.touch_heartbeat();
                    }
                    Message::Ping(_) => {
                        // The transport replies with a pong automatically;
                        // a pinging client counts as a heartbeat.
                        handle.touch_heartbeat();
                    }
                    Message::Binary(_) => {
                        tracing::debug!(
                            user_id = %handle.user_id,
                            "Ignoring unexpected binary frame"
                        );
                    }
                    Message::Close(frame) => {
                        tracing::info!(
                            user_id = %handle.user_id,
                            reason = ?frame,
                            "Client initiated close"
                        );
                        break;
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(
                        user_id = %handle.user_id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
                None => {
                    tracing::info!(user_id = %handle.user_id, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    // Closing: unregister first so the router stops resolving this
    // connection, then let the write pump drain best-effort.
    state.registry.unregister(handle.id);
    handle.outbound.close();

    if !writer_done
        && tokio::time::timeout(WRITE_DRAIN_GRACE, &mut writer_handle)
            .await
            .is_err()
    {
        writer_handle.abort();
    }

    tracing::info!(
        user_id = %handle.user_id,
        connection_id = %handle.id,
        "WebSocket actor stopped"
    );
}

/// Write pump: drains the outbound queue to the WebSocket sink and sends
/// periodic heartbeat pings. Exits on write failure (the client must
/// reconnect — no retry on the same connection), on pong timeout, or once
/// the queue is closed and drained.
async fn write_pump(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    handle: Arc<ConnectionHandle>,
    ping_interval: Duration,
    pong_window_ms: i64,
) {
    let mut ping_timer = interval(ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        tokio::select! {
            maybe = handle.outbound.recv() => match maybe {
                Some(notification) => {
                    if ws_sender
                        .send(protocol::to_message(&notification))
                        .await
                        .is_err()
                    {
                        // Write failure — connection is broken.
                        handle.outbound.close();
                        break;
                    }
                }
                None => {
                    // Queue closed and drained: send the close frame
                    // (eviction or shutdown carries an explicit reason).
                    let frame = handle
                        .outbound
                        .take_close_reason()
                        .map(|(code, reason)| CloseFrame {
                            code,
                            reason: reason.into(),
                        });
                    let _ = ws_sender.send(Message::Close(frame)).await;
                    break;
                }
            },
            _ = ping_timer.tick() => {
                if handle.heartbeat_overdue(pong_window_ms) {
                    tracing::warn!(
                        user_id = %handle.user_id,
                        "Pong timeout, closing connection"
                    );
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: 1001,
                            reason: "Pong timeout".into(),
                        })))
                        .await;
                    handle.outbound.close();
                    break;
                }
                if ws_sender.send(Message::Ping(vec![1, 2, 3, 4].into())).await.is_err() {
                    handle.outbound.close();
                    break;
                }
            }
        }
    }
}
