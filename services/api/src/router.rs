//! Axum Router Configuration
//!
//! This module defines the HTTP routing for the API side of the service:
//! the REST endpoints and the OpenAPI documentation. The relay has its own
//! router (see `ws::relay_router`) bound to a separate port.

use crate::{
    handlers,
    models::{ContextResponse, ErrorResponse, StatusResponse},
    state::AppState,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::ping, handlers::context, handlers::status),
    components(schemas(ContextResponse, StatusResponse, ErrorResponse)),
    tags(
        (name = "Acme Voice API", description = "Context retrieval and relay status for the Acme voice assistant")
    )
)]
pub struct ApiDoc;

/// Creates the API-side Axum router.
pub fn create_api_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/api/ping", get(handlers::ping))
        .route("/api/context", get(handlers::context))
        .route("/api/status", get(handlers::status))
        .with_state(app_state);

    // Merge the stateful routes with the stateless Swagger UI.
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
