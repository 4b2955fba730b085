//! Board registry — membership and presence authority.
//!
//! DESIGN
//! ======
//! Boards are keyed by case-sensitive name and created lazily on first join.
//! Empty boards are kept; nothing deletes a board.
//!
//! LOCKING
//! =======
//! Three lock levels, always taken in this order:
//! 1. `Member::board`: serializes every membership change for one session,
//!    so a join racing a delivery-failure removal cannot interleave.
//! 2. the registry map: held only long enough to find or create a board.
//! 3. `Board::members`: per-board; readers never see a half-applied change.
//!
//! A member's `board` field and the member sets are only ever mutated while
//! holding (1), which keeps them in agreement. Cross-board work never holds
//! two board locks at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::info;
use uuid::Uuid;

use crate::services::sink::Outbound;

pub type SessionId = Uuid;

// =============================================================================
// MEMBER
// =============================================================================

/// The registry's view of one identified session.
pub struct Member {
    id: SessionId,
    name: String,
    sink: Arc<dyn Outbound>,
    board: Mutex<Option<String>>,
}

impl Member {
    #[must_use]
    pub fn new(id: SessionId, name: impl Into<String>, sink: Arc<dyn Outbound>) -> Self {
        Self { id, name: name.into(), sink, board: Mutex::new(None) }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn sink(&self) -> &dyn Outbound {
        self.sink.as_ref()
    }

    /// Board this member currently belongs to.
    #[must_use]
    pub fn current_board(&self) -> Option<String> {
        self.board
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// =============================================================================
// BOARD
// =============================================================================

#[derive(Default)]
struct Board {
    members: RwLock<HashMap<SessionId, Arc<Member>>>,
}

impl Board {
    fn insert(&self, member: Arc<Member>) {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(member.id, member);
    }

    fn remove(&self, id: SessionId) -> bool {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    fn snapshot(&self) -> Vec<Arc<Member>> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Member moved into the board; `previous` is the board it left, if any.
    Joined { previous: Option<String> },
    /// Member was already in the requested board. Nothing changed.
    AlreadyMember,
}

#[derive(Clone, Default)]
pub struct BoardRegistry {
    boards: Arc<RwLock<HashMap<String, Arc<Board>>>>,
}

impl BoardRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `member` into `board_name`, leaving its current board first.
    pub fn join(&self, member: &Arc<Member>, board_name: &str) -> JoinOutcome {
        let mut current = member.board.lock().unwrap_or_else(PoisonError::into_inner);

        if current.as_deref() == Some(board_name) {
            return JoinOutcome::AlreadyMember;
        }

        let previous = current.take();
        if let Some(old) = previous.as_deref() {
            if let Some(board) = self.board(old) {
                board.remove(member.id);
            }
        }

        self.board_or_create(board_name).insert(Arc::clone(member));
        *current = Some(board_name.to_owned());

        info!(session_id = %member.id, board = %board_name, previous = ?previous, "client joined board");
        JoinOutcome::Joined { previous }
    }

    /// Remove `member` from its current board. Returns the board it left.
    pub fn leave(&self, member: &Member) -> Option<String> {
        let mut current = member.board.lock().unwrap_or_else(PoisonError::into_inner);
        let board_name = current.take()?;

        if let Some(board) = self.board(&board_name) {
            board.remove(member.id);
        }

        info!(session_id = %member.id, board = %board_name, "client left board");
        Some(board_name)
    }

    /// Teardown removal. Same as `leave`; safe to call any number of times.
    pub fn remove_session(&self, member: &Member) -> Option<String> {
        self.leave(member)
    }

    /// Display names currently in `board_name`, sorted. Unknown boards are empty.
    #[must_use]
    pub fn members_of(&self, board_name: &str) -> Vec<String> {
        let Some(board) = self.board(board_name) else {
            return Vec::new();
        };
        let mut names: Vec<String> = board
            .members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|m| m.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Snapshot of the members of `board_name` for fan-out.
    #[must_use]
    pub fn recipients(&self, board_name: &str) -> Vec<Arc<Member>> {
        self.board(board_name)
            .map(|board| board.snapshot())
            .unwrap_or_default()
    }

    /// All known board names, including empty ones, sorted.
    #[must_use]
    pub fn board_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .boards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    #[cfg(test)]
    pub fn is_member(&self, board_name: &str, id: SessionId) -> bool {
        self.board(board_name).is_some_and(|board| {
            board
                .members
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(&id)
        })
    }

    fn board(&self, name: &str) -> Option<Arc<Board>> {
        self.boards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn board_or_create(&self, name: &str) -> Arc<Board> {
        if let Some(board) = self.board(name) {
            return board;
        }
        let mut boards = self.boards.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(boards.entry(name.to_owned()).or_insert_with(|| {
            info!(board = %name, "created board");
            Arc::new(Board::default())
        }))
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
