//! WebSocket handler — text frame relay between a socket and its session.
//!
//! DESIGN
//! ======
//! Each connection runs three pieces:
//! - a session task that owns the `Session` and consumes `TransportEvent`s
//! - a writer task that drains the session's `ChannelSink` into the socket
//! - this handler's read loop, which turns socket messages into events
//!
//! The session never touches the socket directly. Broadcasts from other
//! sessions land in the same bounded channel as direct replies, so per-client
//! ordering is the order lines were queued.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → spawn writer (marks the sink ready) and session task
//! 2. `Open` → session sends the username prompt
//! 3. Text frames → `Frame` events, in arrival order
//! 4. Client close, read error, or a fatal session error → session closes,
//!    the sink is released, and the writer closes the socket

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::services::session::{Session, TransportEvent};
use crate::services::sink::ChannelSink;
use crate::state::AppState;

const EVENT_BUFFER: usize = 64;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (sink, mut out_rx) = ChannelSink::channel(state.config.outbound_buffer);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(EVENT_BUFFER);

    let session = Session::new(&state, sink.clone());
    let session_id = session.id();
    info!(%session_id, "ws: client connected");

    let writer_sink = Arc::clone(&sink);
    let writer = tokio::spawn(async move {
        writer_sink.mark_ready();
        while let Some(line) = out_rx.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(line.into())).await {
                debug!(%session_id, error = %e, "ws: write failed");
                break;
            }
        }
        // Dropping the receiver makes further deliveries fail as Closed.
        drop(out_rx);
        let _ = ws_tx.close().await;
    });

    let mut session_task = tokio::spawn(session.run(event_rx));
    let mut session_done = false;

    if event_tx.send(TransportEvent::Open).await.is_ok() {
        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    let event = match msg {
                        Some(Ok(Message::Text(text))) => TransportEvent::Frame(text.as_str().to_owned()),
                        Some(Ok(Message::Close(_))) | None => TransportEvent::Closed,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => TransportEvent::Error(e.to_string()),
                    };
                    let last = !matches!(event, TransportEvent::Frame(_));
                    if event_tx.send(event).await.is_err() || last {
                        break;
                    }
                }
                result = &mut session_task => {
                    if let Err(e) = result {
                        warn!(%session_id, error = %e, "ws: session task failed");
                    }
                    session_done = true;
                    break;
                }
            }
        }
    }

    drop(event_tx);
    if !session_done {
        if let Err(e) = session_task.await {
            warn!(%session_id, error = %e, "ws: session task failed");
        }
    }
    if let Err(e) = writer.await {
        warn!(%session_id, error = %e, "ws: writer task failed");
    }
    info!(%session_id, "ws: client disconnected");
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
