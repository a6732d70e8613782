//! Axum Handlers for the REST API
//!
//! The context endpoint is a linear chain: validate the query, retrieve
//! chunks from the document index, and optionally refine the answer through
//! the chat model. `utoipa` doc comments generate the OpenAPI documentation.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::{Arc, atomic::Ordering};
use tracing::{error, info};

use acmevoice_core::index::RetrievedChunk;

use crate::{
    models::{ContextParams, ContextResponse, ErrorResponse, StatusResponse},
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    ServiceUnavailable(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::ServiceUnavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse { message }),
            )
                .into_response(),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/api/ping",
    responses(
        (status = 200, description = "Service is up", body = String)
    )
)]
pub async fn ping() -> &'static str {
    "pong"
}

/// Report relay availability and the number of open relay sessions.
#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Relay status", body = StatusResponse)
    )
)]
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        relay_connected: true,
        active_sessions: state.active_sessions.load(Ordering::Relaxed),
    })
}

/// Answer a query from the document index, optionally refined by the chat model.
#[utoipa::path(
    get,
    path = "/api/context",
    params(ContextParams),
    responses(
        (status = 200, description = "Generated answer", body = ContextResponse),
        (status = 400, description = "Missing or empty query", body = ErrorResponse),
        (status = 503, description = "No document index configured", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn context(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ContextParams>,
) -> Result<Json<ContextResponse>, ApiError> {
    let query = params.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest(
            "A valid 'query' string parameter is required in the URL".to_string(),
        ));
    }
    info!(%query, chat_mode = params.chat_mode, "Processing context query.");

    let rendered_context = match &state.index {
        Some(index) => {
            let chunks = index.retrieve(query).await?;
            info!(count = chunks.len(), "Retrieved context chunks.");
            Some(render_context_prompt(&chunks))
        }
        None => None,
    };

    let message = if params.chat_mode {
        state
            .llm_client
            .answer(
                "You are a helpful assistant.",
                query,
                rendered_context.as_deref(),
            )
            .await?
    } else {
        match rendered_context {
            Some(rendered) => rendered,
            None => {
                return Err(ApiError::ServiceUnavailable(
                    "No document index is configured; retry with chat_mode=true".to_string(),
                ));
            }
        }
    };

    Ok(Json(ContextResponse {
        message,
        image_url: sign_in_image(query),
    }))
}

/// Renders retrieved chunks into the customer-service context prompt.
fn render_context_prompt(chunks: &[RetrievedChunk]) -> String {
    let context = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "You are a customer service agent for Acme Bank, giving friendly, \
conversational, to-the-point answers to users' questions about the product. \
Use the following context to improve your answer:\n\
---------------------\n\
{context}\n\
---------------------"
    )
}

/// Questions about signing up or in get a pointer to the sign-in screenshot.
fn sign_in_image(query: &str) -> Option<String> {
    let query = query.to_lowercase();
    (query.contains("sign up") || query.contains("sign in")).then(|| "/sign-in.png".to_string())
}
