//! Board presence routes.

use axum::extract::{Path, State};
use axum::response::Json;

use crate::services::presence;
use crate::state::AppState;

/// `GET /boards` — every board created so far, sorted.
pub async fn list_boards(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(presence::list_boards(&state.registry))
}

/// `GET /boards/{name}/users` — display names currently on a board.
///
/// Unknown boards answer with an empty list rather than 404; a board with no
/// members and a board never created look the same to a client.
pub async fn list_users(State(state): State<AppState>, Path(name): Path<String>) -> Json<Vec<String>> {
    Json(presence::list_members(&state.registry, &name))
}

#[cfg(test)]
#[path = "boards_test.rs"]
mod tests;
