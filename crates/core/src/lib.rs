//! Collaborator seams for the Acme voice backend.
//!
//! The HTTP context endpoint leans on two external services: a document
//! index for retrieval and an OpenAI-compatible chat-completion API. Both
//! are modelled as trait objects here so the service crate can be wired up
//! with fakes in tests.

pub mod index;
pub mod llm_client;
