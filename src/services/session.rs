//! Connection session — per-client protocol state machine.
//!
//! LIFECYCLE
//! =========
//! ```text
//! Connecting ──identity──▶ Identified ──/join──▶ Joined ──/leave──▶ Identified
//!      └────────────── any ──────────────▶ Closed
//! ```
//! `AwaitingReady` is entered from any live state while the outbound sink
//! is not yet writable. Identity and joins wait there for a bounded number of
//! backoff steps on the injected clock, then fail with `HandshakeTimeout`.
//!
//! DESIGN
//! ======
//! A session is owned by exactly one task that feeds it transport events in
//! order (`run`), so frames from one client are never processed concurrently.
//! The current board lives on the registry `Member`, not here, so the registry
//! stays the single source of truth even when a broadcast prunes this session
//! from another task.
//!
//! ERROR HANDLING
//! ==============
//! Every error is reported to this client only. `MalformedCommand` is
//! recoverable; everything else closes the session. `close` runs on every
//! exit path, including `Drop`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::command::{self, Command, ParseError};
use crate::config::HandshakePolicy;
use crate::error::ErrorCode;
use crate::services::broadcast;
use crate::services::registry::{BoardRegistry, JoinOutcome, Member, SessionId};
use crate::services::sink::Outbound;
use crate::state::AppState;

pub const PROMPT: &str = "Enter your username:";
pub const NOT_IN_BOARD: &str = "You are not in any board";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting,
    AwaitingReady,
    Identified,
    Joined,
    Closed,
}

/// Ordered input from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Frame(String),
    Closed,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("not identified: {0}")]
    NotIdentified(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error(transparent)]
    MalformedCommand(#[from] ParseError),
    #[error("connection not writable after {attempts} attempts")]
    HandshakeTimeout { attempts: u32 },
}

impl SessionError {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MalformedCommand(_))
    }
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotIdentified(_) => "E_NOT_IDENTIFIED",
            Self::ProtocolViolation(_) => "E_PROTOCOL_VIOLATION",
            Self::MalformedCommand(_) => "E_MALFORMED_COMMAND",
            Self::HandshakeTimeout { .. } => "E_HANDSHAKE_TIMEOUT",
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

pub struct Session {
    id: SessionId,
    /// Stored phase. `Joined` is never stored; `state()` derives it.
    state: HandshakeState,
    member: Option<Arc<Member>>,
    sink: Arc<dyn Outbound>,
    registry: BoardRegistry,
    clock: Arc<dyn Clock>,
    policy: HandshakePolicy,
    auto_join: Option<String>,
}

impl Session {
    #[must_use]
    pub fn new(state: &AppState, sink: Arc<dyn Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: HandshakeState::Connecting,
            member: None,
            sink,
            registry: state.registry.clone(),
            clock: Arc::clone(&state.clock),
            policy: state.config.handshake,
            auto_join: state.config.auto_join_board.clone(),
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> HandshakeState {
        if self.state == HandshakeState::Identified && self.current_board().is_some() {
            HandshakeState::Joined
        } else {
            self.state
        }
    }

    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.member.as_deref().map(Member::name)
    }

    #[must_use]
    pub fn current_board(&self) -> Option<String> {
        self.member.as_deref().and_then(Member::current_board)
    }

    // -------------------------------------------------------------------------
    // EVENT LOOP
    // -------------------------------------------------------------------------

    /// Consume transport events in order until the connection ends or the
    /// session closes itself.
    pub async fn run(mut self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            let flow = match event {
                TransportEvent::Open => match self.greet().await {
                    Ok(()) => Flow::Continue,
                    Err(e) => self.fail(&e),
                },
                TransportEvent::Frame(text) => self.dispatch(&text).await,
                TransportEvent::Closed => Flow::Close,
                TransportEvent::Error(reason) => {
                    warn!(session_id = %self.id, %reason, "session: transport error");
                    Flow::Close
                }
            };
            if flow == Flow::Close {
                break;
            }
        }
        debug!(session_id = %self.id, identity = ?self.identity(), state = ?self.state(), "session: event loop ended");
        self.close();
    }

    /// Send the username prompt once the sink accepts writes.
    ///
    /// # Errors
    ///
    /// Returns `HandshakeTimeout` if the sink never becomes writable.
    pub async fn greet(&mut self) -> Result<(), SessionError> {
        if self.state != HandshakeState::Connecting {
            return Ok(());
        }
        self.await_ready().await?;
        self.reply(PROMPT);
        Ok(())
    }

    /// Handle one frame and apply the error policy: report to this client,
    /// then close on fatal errors.
    pub async fn dispatch(&mut self, text: &str) -> Flow {
        match self.handle_frame(text).await {
            Ok(()) => Flow::Continue,
            Err(e) => self.fail(&e),
        }
    }

    fn fail(&mut self, err: &SessionError) -> Flow {
        self.reply(&format!("error [{}]: {err}", err.error_code()));
        if err.is_fatal() {
            warn!(session_id = %self.id, code = err.error_code(), error = %err, "session: fatal error");
            self.close();
            Flow::Close
        } else {
            info!(session_id = %self.id, code = err.error_code(), error = %err, "session: rejected frame");
            Flow::Continue
        }
    }

    // -------------------------------------------------------------------------
    // PROTOCOL
    // -------------------------------------------------------------------------

    /// Process one inbound frame. The first frame is the display name.
    ///
    /// # Errors
    ///
    /// Returns the protocol error for this frame; the caller decides whether
    /// it is fatal.
    pub async fn handle_frame(&mut self, text: &str) -> Result<(), SessionError> {
        if self.state == HandshakeState::Closed {
            return Err(SessionError::ProtocolViolation("session is closed".into()));
        }
        if self.member.is_none() {
            return self.identify(text).await;
        }

        let Some(command) = command::parse(text)? else {
            debug!(session_id = %self.id, "session: dropped empty frame");
            return Ok(());
        };

        match command {
            Command::Join(board) => self.join(&board).await,
            Command::Leave => {
                self.leave();
                Ok(())
            }
            Command::List => {
                let boards = self.registry.board_names();
                self.reply(&format!("Available boards: {}", boards.join(", ")));
                Ok(())
            }
            Command::PlainMessage(body) => {
                self.say(&body);
                Ok(())
            }
            Command::Identify(_) => Err(SessionError::ProtocolViolation("identity already set".into())),
        }
    }

    /// Bind the display name. Allowed once, before any other activity.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if an identity is already bound or the session is
    /// closed, `NotIdentified` if the name is unusable, `HandshakeTimeout` if
    /// the sink never becomes writable.
    pub async fn identify(&mut self, raw: &str) -> Result<(), SessionError> {
        if self.state == HandshakeState::Closed {
            return Err(SessionError::ProtocolViolation("session is closed".into()));
        }
        if self.member.is_some() {
            return Err(SessionError::ProtocolViolation("identity already set".into()));
        }

        let name = match command::parse_identity(raw) {
            Ok(Command::Identify(name)) => name,
            Ok(other) => {
                return Err(SessionError::ProtocolViolation(format!("expected identity, got {other:?}")));
            }
            Err(e) => return Err(SessionError::NotIdentified(e.to_string())),
        };

        self.await_ready().await?;

        info!(session_id = %self.id, %name, "session: identified");
        self.member = Some(Arc::new(Member::new(self.id, name, Arc::clone(&self.sink))));
        self.state = HandshakeState::Identified;

        if let Some(board) = self.auto_join.clone() {
            self.join(&board).await?;
        }
        Ok(())
    }

    async fn join(&mut self, board_name: &str) -> Result<(), SessionError> {
        let member = self.identified()?;
        self.await_ready().await?;

        match self.registry.join(&member, board_name) {
            JoinOutcome::AlreadyMember => {
                self.reply(&format!("Already in board: {board_name}"));
            }
            JoinOutcome::Joined { previous } => {
                if let Some(previous) = previous {
                    broadcast::notify(&self.registry, &previous, &left_notice(member.name()));
                }
                self.reply(&format!("Joined board: {board_name}"));
                broadcast::notify(&self.registry, board_name, &joined_notice(member.name()));
            }
        }
        Ok(())
    }

    fn leave(&self) {
        let Some(member) = self.member.as_deref() else {
            return;
        };
        match self.registry.leave(member) {
            Some(board) => {
                self.reply(&format!("Left board: {board}"));
                broadcast::notify(&self.registry, &board, &left_notice(member.name()));
            }
            None => self.reply(NOT_IN_BOARD),
        }
    }

    fn say(&self, body: &str) {
        let Some(member) = self.member.as_deref() else {
            return;
        };
        match member.current_board() {
            Some(board) => {
                broadcast::broadcast(&self.registry, &board, member.name(), body);
            }
            None => self.reply(NOT_IN_BOARD),
        }
    }

    // -------------------------------------------------------------------------
    // TEARDOWN
    // -------------------------------------------------------------------------

    /// Leave the current board and release the sink. Idempotent.
    pub fn close(&mut self) {
        if self.state == HandshakeState::Closed {
            return;
        }
        self.state = HandshakeState::Closed;

        if let Some(member) = self.member.as_deref() {
            if let Some(board) = self.registry.remove_session(member) {
                broadcast::notify(&self.registry, &board, &left_notice(member.name()));
            }
        }
        self.sink.close();
        info!(session_id = %self.id, "session: closed");
    }

    // -------------------------------------------------------------------------
    // HELPERS
    // -------------------------------------------------------------------------

    /// Wait for the sink to accept writes: one immediate check, then up to
    /// `max_attempts` checks each preceded by one backoff step.
    async fn await_ready(&mut self) -> Result<(), SessionError> {
        if self.sink.is_ready() {
            return Ok(());
        }

        let resume = self.state;
        self.state = HandshakeState::AwaitingReady;
        for attempt in 1..=self.policy.max_attempts {
            self.clock.sleep(self.policy.backoff).await;
            if self.sink.is_ready() {
                debug!(session_id = %self.id, attempt, "session: sink ready after retry");
                self.state = resume;
                return Ok(());
            }
        }

        self.state = resume;
        Err(SessionError::HandshakeTimeout { attempts: self.policy.max_attempts })
    }

    fn identified(&self) -> Result<Arc<Member>, SessionError> {
        self.member
            .clone()
            .ok_or_else(|| SessionError::NotIdentified("send a display name first".into()))
    }

    fn reply(&self, line: &str) {
        if let Err(e) = self.sink.deliver(line) {
            debug!(session_id = %self.id, error = %e, "session: reply dropped");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn joined_notice(name: &str) -> String {
    format!("{name} joined the board")
}

fn left_notice(name: &str) -> String {
    format!("{name} left the board")
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
