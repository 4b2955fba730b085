//! Presence queries for the HTTP collaborator. Read-only, never fails.

use crate::services::registry::BoardRegistry;

/// Display names on `board_name`. Unknown or empty boards yield an empty list.
#[must_use]
pub fn list_members(registry: &BoardRegistry, board_name: &str) -> Vec<String> {
    registry.members_of(board_name)
}

/// Every board created so far, empty ones included.
#[must_use]
pub fn list_boards(registry: &BoardRegistry) -> Vec<String> {
    registry.board_names()
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
