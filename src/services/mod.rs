//! Domain services used by the websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! `registry` owns board membership, `broadcast` fans lines out to a board,
//! and `session` drives one connection's protocol. Route handlers only
//! translate between the transport and these modules.

pub mod broadcast;
pub mod presence;
pub mod registry;
pub mod session;
pub mod sink;
