//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! handed to every session. It holds the board registry, the parsed config,
//! and the clock used by the handshake retry loop.

use std::sync::Arc;

use crate::clock::{Clock, TokioClock};
use crate::config::Config;
use crate::services::registry::BoardRegistry;

/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub registry: BoardRegistry,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    #[must_use]
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        Self { registry: BoardRegistry::new(), config: Arc::new(config), clock }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
