//! WebSocket handlers for viewer and producer connections.
//!
//! Each connection runs one task that pumps messages between the socket and
//! the hub's per-peer channel. The hub never touches sockets directly; its
//! send deadline applies to the channel, and a stalled socket fills the
//! channel until the hub evicts the peer.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::hub::ViewerMessage;
use crate::protocol_constants::{
    CLOSE_DUPLICATE_PRODUCER, CLOSE_UNAUTHORIZED, PRODUCER_CHANNEL_CAPACITY,
    VIEWER_CHANNEL_CAPACITY, VIEWER_SEND_TIMEOUT_SECS,
};

// ─────────────────────────────────────────────────────────────────────────────
// Viewer endpoint
// ─────────────────────────────────────────────────────────────────────────────

/// Viewer control messages. Unknown types are ignored.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ViewerIncoming {
    Ping,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ViewerOutgoing {
    Pong,
}

/// Parses a viewer text message and returns the reply to send, if any.
fn viewer_reply(text: &str) -> Option<String> {
    match serde_json::from_str::<ViewerIncoming>(text) {
        Ok(ViewerIncoming::Ping) => serde_json::to_string(&ViewerOutgoing::Pong).ok(),
        Err(_) => {
            log::debug!("[WS] ignoring unrecognized viewer message");
            None
        }
    }
}

/// Viewer WebSocket upgrade handler.
pub async fn viewer_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_viewer(socket, state))
}

async fn handle_viewer(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ViewerMessage>(VIEWER_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    let id = state.hub.connect_viewer(tx, cancel.clone()).await;
    let send_deadline = Duration::from_secs(VIEWER_SEND_TIMEOUT_SECS);

    loop {
        tokio::select! {
            // Evicted by the hub (send deadline missed)
            _ = cancel.cancelled() => break,

            // Messages from the hub: frames, status, config
            outbound = rx.recv() => {
                let Some(msg) = outbound else { break };
                let ws_msg = match msg {
                    ViewerMessage::Text(text) => Message::Text(text.into()),
                    ViewerMessage::Binary(data) => Message::Binary(data),
                };
                match timeout(send_deadline, sender.send(ws_msg)).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }

            // Messages from the viewer: only ping is acted upon
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = viewer_reply(&text) {
                            if sender.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    state.hub.disconnect_viewer(id);
}

// ─────────────────────────────────────────────────────────────────────────────
// Producer endpoint
// ─────────────────────────────────────────────────────────────────────────────

/// Verifies the producer bearer token with a constant-time comparison.
///
/// An unset secret accepts everything; that is a dev-mode footgun, so it is
/// logged loudly.
fn check_producer_auth(headers: &HeaderMap, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        log::warn!("[WS] producer token not configured - accepting unauthenticated producer (dev mode)");
        return true;
    };

    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(token) = value.strip_prefix("Bearer ") else {
        return false;
    };

    token.as_bytes().ct_eq(secret.as_bytes()).into()
}

/// Producer WebSocket upgrade handler.
///
/// Auth is checked before the upgrade; the close code is delivered after it,
/// since a WS close frame needs an established socket.
pub async fn producer_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let authorized = check_producer_auth(&headers, state.config.producer_token.as_deref());
    ws.on_upgrade(move |socket| handle_producer(socket, state, authorized))
}

async fn handle_producer(socket: WebSocket, state: AppState, authorized: bool) {
    if !authorized {
        log::warn!("[WS] producer rejected: missing or invalid bearer token");
        close_with(socket, CLOSE_UNAUTHORIZED, "invalid token").await;
        return;
    }

    let (tx, mut rx) = mpsc::channel::<Bytes>(PRODUCER_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    if state
        .hub
        .connect_producer(tx, cancel.clone())
        .await
        .is_err()
    {
        close_with(socket, CLOSE_DUPLICATE_PRODUCER, "producer already connected").await;
        return;
    }

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            // Control messages from the hub (save-state, shutdown)
            control = rx.recv() => {
                let Some(data) = control else { break };
                if sender.send(Message::Binary(data)).await.is_err() {
                    break;
                }
            }

            // Binary protocol from the GPU worker
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Binary(data))) => {
                        state.hub.handle_producer_message(data).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    state.hub.disconnect_producer().await;
}

/// Closes a socket with an application close code.
async fn close_with(mut socket: WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
