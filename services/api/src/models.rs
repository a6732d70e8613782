//! Request and response payloads for the REST API.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Serialize, Debug, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

/// Query parameters for `/api/context`.
#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ContextParams {
    /// The user's question.
    pub query: String,
    /// When true, the retrieved context is refined through the chat model
    /// instead of being returned directly.
    #[serde(default)]
    pub chat_mode: bool,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ContextResponse {
    pub message: String,
    /// Optional illustration to show alongside the answer.
    pub image_url: Option<String>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct StatusResponse {
    pub relay_connected: bool,
    pub active_sessions: usize,
}
