//! Broadcast engine — fan-out of chat lines and notices to a board.
//!
//! DESIGN
//! ======
//! A pass snapshots the board's members, releases every lock, and then
//! delivers to each member in turn. Delivery is a non-blocking queue push, so
//! one slow socket never stalls the pass.
//!
//! The sender is a member like any other and receives its own line; clients
//! do not echo locally.
//!
//! ERROR HANDLING
//! ==============
//! A failed delivery is logged and the member is collected. Collected members
//! are removed from the registry only after the pass has finished, never while
//! the snapshot is being walked.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::services::registry::{BoardRegistry, Member, SessionId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Members whose delivery failed and who were pruned from the board.
    pub failed: Vec<SessionId>,
}

/// Wire format for a chat line.
#[must_use]
pub fn format_chat(sender: &str, body: &str) -> String {
    format!("{sender}: {body}")
}

/// Deliver `sender: text` to every member of `board_name`, sender included.
pub fn broadcast(registry: &BoardRegistry, board_name: &str, sender: &str, text: &str) -> BroadcastReport {
    fan_out(registry, board_name, &format_chat(sender, text))
}

/// Deliver a server notice line verbatim to every member of `board_name`.
pub fn notify(registry: &BoardRegistry, board_name: &str, line: &str) -> BroadcastReport {
    fan_out(registry, board_name, line)
}

fn fan_out(registry: &BoardRegistry, board_name: &str, line: &str) -> BroadcastReport {
    let recipients = registry.recipients(board_name);
    let mut report = BroadcastReport::default();
    let mut dead: Vec<Arc<Member>> = Vec::new();

    for member in &recipients {
        match member.sink().deliver(line) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(
                    session_id = %member.id(),
                    board = %board_name,
                    code = e.error_code(),
                    error = %e,
                    "broadcast: delivery failed"
                );
                dead.push(Arc::clone(member));
            }
        }
    }

    // PHASE: PRUNE AFTER THE PASS
    for member in dead {
        registry.remove_session(&member);
        report.failed.push(member.id());
    }

    debug!(board = %board_name, delivered = report.delivered, failed = report.failed.len(), "broadcast: pass complete");
    report
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
