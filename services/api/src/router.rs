//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the page, the config API, the WebSocket endpoint and the
//! OpenAPI documentation.

use crate::{
    handlers,
    models::{ConfigPayload, ConfigResponse, ErrorResponse},
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::update_config),
    components(schemas(ConfigPayload, ConfigResponse, ErrorResponse)),
    tags(
        (name = "Voice Agent API", description = "Credential configuration for the voice agent")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/", get(handlers::index))
        .route("/static/main.js", get(handlers::main_js))
        .route("/api/config", post(handlers::update_config))
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
