//! Axum Handlers for the HTTP API
//!
//! Serves the single-page client and the credential configuration endpoint.
//! It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::{State, rejection::JsonRejection},
    http::header,
    response::{Html, IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    models::{ConfigPayload, ConfigResponse, ErrorResponse},
    state::AppState,
};

const INDEX_HTML: &str = include_str!("../static/index.html");
const MAIN_JS: &str = include_str!("../static/main.js");

pub enum ApiError {
    InvalidBody(JsonRejection),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidBody(rejection) => {
                warn!(error = %rejection.body_text(), "Rejected request body");
                let message = rejection.body_text();
                (rejection.status(), Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

/// Serves the voice agent page.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Serves the page's client script.
pub async fn main_js() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], MAIN_JS)
}

/// Update the server's API keys.
///
/// Every provided key overwrites the process-wide value; new WebSocket
/// connections pick it up. Keys are not validated.
#[utoipa::path(
    post,
    path = "/api/config",
    request_body = ConfigPayload,
    responses(
        (status = 200, description = "Keys updated", body = ConfigResponse),
        (status = 400, description = "Malformed JSON body", body = ErrorResponse),
        (status = 415, description = "Missing JSON content type", body = ErrorResponse)
    )
)]
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConfigPayload>, JsonRejection>,
) -> Result<Json<ConfigResponse>, ApiError> {
    let Json(payload) = payload.map_err(ApiError::InvalidBody)?;
    let updated = state.update_credentials(payload.into_updates()).await;
    let names: Vec<String> = updated.iter().map(ToString::to_string).collect();
    info!(providers = ?names, "API keys updated.");
    Ok(Json(ConfigResponse::success()))
}
