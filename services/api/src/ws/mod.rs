//! WebSocket Relay
//!
//! This module bridges browser connections to the upstream realtime AI
//! service. It is structured into submodules for clarity:
//!
//! - `protocol`: the opaque, typed event relayed verbatim in both directions.
//! - `queue`: the bounded FIFO holding client frames that arrive before the
//!   upstream session is ready.
//! - `upstream`: the realtime session adapter and its OpenAI implementation.
//! - `bridge`: the per-connection relay state machine.

pub mod bridge;
pub mod protocol;
pub mod queue;
pub mod upstream;

use crate::state::AppState;
use axum::{Router, routing::get};
use std::sync::Arc;

pub use bridge::relay_handler;

/// Builds the relay-side router.
///
/// A catch-all handler upgrades every path and leaves path validation to the
/// bridge, so a client on a wrong path sees an accepted-then-closed socket
/// rather than an HTTP 404, matching plain WebSocket-server behavior.
pub fn relay_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(get(relay_handler))
        .with_state(state)
}
