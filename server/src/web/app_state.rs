use std::sync::Arc;

use crate::engine::relay_engine::RelayEngine;

/// Shared state handed to every axum handler.
pub struct AppState {
    pub engine: Arc<RelayEngine>,
    /// Expected `x-relay-secret` value. `None` leaves protected routes open.
    pub inbound_secret: Option<String>,
}
