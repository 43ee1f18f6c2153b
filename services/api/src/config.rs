use crate::credentials::{Credentials, Provider};
use std::net::SocketAddr;
use tracing::Level;
use voice_agent_core::{
    gemini::{DEFAULT_API_BASE, DEFAULT_CHAT_MODEL, DEFAULT_TTS_MODEL},
    persona::DEFAULT_VOICE,
};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Initial credential set; `/api/config` may replace entries at runtime.
    pub credentials: Credentials,
    pub api_base: String,
    pub chat_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    /// Per-session history cap. `0` means unbounded.
    pub max_history_turns: usize,
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 5003)),
            credentials: Credentials::default(),
            api_base: DEFAULT_API_BASE.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            tts_voice: DEFAULT_VOICE.to_string(),
            max_history_turns: 100,
            log_level: Level::INFO,
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// A missing Gemini key is not an error here: it can be supplied later
    /// through the config endpoint.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let defaults = Config::default();

        let bind_address_str = var_or("BIND_ADDRESS", &defaults.bind_address.to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let mut credentials = Credentials::default();
        for provider in Provider::ALL {
            if let Ok(value) = std::env::var(provider.env_var()) {
                credentials.set(provider, value);
            }
        }

        let max_history_str = var_or("MAX_HISTORY_TURNS", &defaults.max_history_turns.to_string());
        let max_history_turns = max_history_str.parse::<usize>().map_err(|_| {
            ConfigError::InvalidValue(
                "MAX_HISTORY_TURNS".to_string(),
                format!("'{}' is not a non-negative integer", max_history_str),
            )
        })?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            credentials,
            api_base: var_or("GEMINI_API_BASE", &defaults.api_base),
            chat_model: var_or("CHAT_MODEL", &defaults.chat_model),
            tts_model: var_or("TTS_MODEL", &defaults.tts_model),
            tts_voice: var_or("TTS_VOICE", &defaults.tts_voice),
            max_history_turns,
            log_level,
        })
    }
}
