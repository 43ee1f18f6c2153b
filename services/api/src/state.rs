//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the session store,
//! the mutable credential set and the model clients built from it.

use crate::{
    config::Config,
    credentials::{Credentials, Provider},
    sessions::SessionStore,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use voice_agent_core::{
    gemini::GeminiClient,
    llm_client::{LlmClient, SpeechSynthesizer},
};

/// The model clients a connection talks to.
#[derive(Clone)]
pub struct Backend {
    pub llm: Arc<dyn LlmClient>,
    pub tts: Arc<dyn SpeechSynthesizer>,
}

/// Builds a [`Backend`] for a given Gemini key.
pub trait BackendConnector: Send + Sync {
    fn connect(&self, api_key: &str) -> Backend;
}

/// Connects to the Gemini REST API with the configured models.
pub struct GeminiConnector {
    api_base: String,
    chat_model: String,
    tts_model: String,
}

impl GeminiConnector {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_base: config.api_base.clone(),
            chat_model: config.chat_model.clone(),
            tts_model: config.tts_model.clone(),
        }
    }
}

impl BackendConnector for GeminiConnector {
    fn connect(&self, api_key: &str) -> Backend {
        let client = Arc::new(
            GeminiClient::new(api_key)
                .with_base_url(&self.api_base)
                .with_chat_model(&self.chat_model)
                .with_tts_model(&self.tts_model),
        );
        Backend {
            llm: client.clone(),
            tts: client,
        }
    }
}

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionStore,
    credentials: RwLock<Credentials>,
    backend: RwLock<Option<Backend>>,
    connector: Arc<dyn BackendConnector>,
}

impl AppState {
    pub fn new(config: Config, connector: Arc<dyn BackendConnector>) -> Self {
        let credentials = config.credentials.clone();
        let backend = credentials
            .get(Provider::Gemini)
            .map(|key| connector.connect(key));
        Self {
            sessions: SessionStore::new(config.max_history_turns),
            config: Arc::new(config),
            credentials: RwLock::new(credentials),
            backend: RwLock::new(backend),
            connector,
        }
    }

    /// A snapshot of the current credential set.
    pub async fn credentials(&self) -> Credentials {
        self.credentials.read().await.clone()
    }

    /// The current model clients, or `None` while no Gemini key is configured.
    pub async fn backend(&self) -> Option<Backend> {
        self.backend.read().await.clone()
    }

    /// The credential set together with the backend built from it.
    ///
    /// Both are read while holding the credentials lock, which
    /// `update_credentials` also holds while swapping the backend, so the two
    /// always agree.
    pub async fn connection_snapshot(&self) -> (Credentials, Option<Backend>) {
        let credentials = self.credentials.read().await;
        let backend = self.backend.read().await.clone();
        (credentials.clone(), backend)
    }

    /// Overwrites the given credentials and returns the providers that were
    /// actually updated. A new Gemini key rebuilds the model clients.
    pub async fn update_credentials(
        &self,
        updates: impl IntoIterator<Item = (Provider, String)>,
    ) -> Vec<Provider> {
        let mut credentials = self.credentials.write().await;
        let updated: Vec<Provider> = updates
            .into_iter()
            .filter_map(|(provider, value)| credentials.set(provider, value).then_some(provider))
            .collect();

        if updated.contains(&Provider::Gemini) {
            if let Some(key) = credentials.get(Provider::Gemini) {
                *self.backend.write().await = Some(self.connector.connect(key));
            }
        }
        updated
    }
}
