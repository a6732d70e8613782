//! Acme Voice API Library Crate
//!
//! This library contains the logic for the Acme voice backend: the REST API
//! that answers queries from the document index, and the WebSocket relay
//! that bridges browser sessions to the upstream realtime AI service. The
//! `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
