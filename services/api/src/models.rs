//! API Models
//!
//! Request and response bodies for the HTTP endpoints, also used to generate
//! the OpenAPI document with `utoipa`.

use crate::credentials::Provider;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `POST /api/config`. Every field is optional; absent or empty
/// fields leave the current key in place.
#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct ConfigPayload {
    #[schema(example = "AIza...")]
    pub gemini_api_key: Option<String>,
    pub murf_api_key: Option<String>,
    pub assembly_api_key: Option<String>,
    pub news_api_key: Option<String>,
    pub openweather_api_key: Option<String>,
}

impl ConfigPayload {
    /// The provided keys, paired with their provider.
    pub fn into_updates(self) -> Vec<(Provider, String)> {
        [
            (Provider::Gemini, self.gemini_api_key),
            (Provider::Murf, self.murf_api_key),
            (Provider::Assembly, self.assembly_api_key),
            (Provider::News, self.news_api_key),
            (Provider::OpenWeather, self.openweather_api_key),
        ]
        .into_iter()
        .filter_map(|(provider, value)| value.map(|v| (provider, v)))
        .collect()
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct ConfigResponse {
    #[schema(example = "success")]
    pub status: String,
    #[schema(example = "API keys updated.")]
    pub message: String,
}

impl ConfigResponse {
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
            message: "API keys updated.".to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
