//! Outbound sinks — where a session's text frames go.
//!
//! DESIGN
//! ======
//! `Outbound` is the seam between the core and the transport. The websocket
//! route backs it with `ChannelSink`, a bounded mpsc queue drained by a
//! writer task; tests back it with a recording sink.
//!
//! Delivery is non-blocking. A full queue counts as a failed delivery: a
//! client that cannot drain `OUTBOUND_BUFFER` frames is treated as dead and
//! pruned from its board.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound sink closed")]
    Closed,
    #[error("outbound buffer full")]
    Full,
}

impl ErrorCode for DeliveryError {
    fn error_code(&self) -> &'static str {
        "E_DELIVERY_FAILURE"
    }
}

pub trait Outbound: Send + Sync {
    /// Whether the transport can accept writes yet.
    fn is_ready(&self) -> bool;

    /// Queue one text frame for this connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink is closed or cannot accept more frames.
    fn deliver(&self, text: &str) -> Result<(), DeliveryError>;

    /// Release the sink. Later deliveries fail with `Closed`. Idempotent.
    fn close(&self);
}

// =============================================================================
// CHANNEL SINK
// =============================================================================

pub struct ChannelSink {
    tx: Mutex<Option<mpsc::Sender<String>>>,
    ready: AtomicBool,
}

impl ChannelSink {
    /// Create a sink and the receiver its writer task drains.
    /// The sink starts not ready; the writer calls `mark_ready` once running.
    #[must_use]
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sink = Arc::new(Self { tx: Mutex::new(Some(tx)), ready: AtomicBool::new(false) });
        (sink, rx)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }
}

impl Outbound for ChannelSink {
    fn is_ready(&self) -> bool {
        if !self.ready.load(Ordering::Acquire) {
            return false;
        }
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    fn deliver(&self, text: &str) -> Result<(), DeliveryError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(DeliveryError::Closed);
        };
        tx.try_send(text.to_owned()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    fn close(&self) {
        // Dropping the sender lets the writer task drain and exit.
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

#[cfg(test)]
#[path = "sink_test.rs"]
mod tests;
