//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared
//! resources: the collaborator clients, the relay connector, and the
//! configuration loaded once at startup.

use crate::config::Config;
use crate::ws::upstream::RealtimeConnector;
use acmevoice_core::{index::DocumentIndex, llm_client::LLMClient};
use std::sync::{Arc, atomic::AtomicUsize};

/// The shared application state, created once at startup and passed to all
/// handlers and relay bridges.
pub struct AppState {
    pub llm_client: Arc<dyn LLMClient>,
    /// Absent when no index service is configured; `/api/context` then
    /// answers without retrieval.
    pub index: Option<Arc<dyn DocumentIndex>>,
    pub connector: Arc<dyn RealtimeConnector>,
    /// Number of relay connections currently open, for `/api/status`.
    pub active_sessions: AtomicUsize,
    pub config: Arc<Config>,
}
