//! Process-wide API credentials.
//!
//! The set starts from the environment and is overwritten by `POST /api/config`.
//! Every new WebSocket connection reads the current values; the last writer wins.

use std::collections::HashMap;
use std::fmt;

/// Third-party services the agent holds a key for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Provider {
    /// LLM generation and speech synthesis.
    Gemini,
    /// Text-to-speech.
    Murf,
    /// Transcription.
    Assembly,
    News,
    OpenWeather,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Gemini,
        Provider::Murf,
        Provider::Assembly,
        Provider::News,
        Provider::OpenWeather,
    ];

    /// The environment variable the initial key is read from.
    pub fn env_var(self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Murf => "MURF_API_KEY",
            Provider::Assembly => "ASSEMBLY_API_KEY",
            Provider::News => "NEWS_API_KEY",
            Provider::OpenWeather => "OPENWEATHER_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Gemini => write!(f, "gemini"),
            Provider::Murf => write!(f, "murf"),
            Provider::Assembly => write!(f, "assembly"),
            Provider::News => write!(f, "news"),
            Provider::OpenWeather => write!(f, "openweather"),
        }
    }
}

/// A mapping from provider to secret. Empty strings are never stored.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    keys: HashMap<Provider, String>,
}

impl Credentials {
    pub fn get(&self, provider: Provider) -> Option<&str> {
        self.keys.get(&provider).map(String::as_str)
    }

    pub fn is_set(&self, provider: Provider) -> bool {
        self.keys.contains_key(&provider)
    }

    /// Stores `value` for `provider`, returning `false` (and changing nothing)
    /// if the value is empty.
    pub fn set(&mut self, provider: Provider, value: impl Into<String>) -> bool {
        let value = value.into();
        if value.is_empty() {
            return false;
        }
        self.keys.insert(provider, value);
        true
    }

    /// Providers without a key, in declaration order.
    pub fn missing(&self) -> impl Iterator<Item = Provider> + '_ {
        Provider::ALL.into_iter().filter(|p| !self.is_set(*p))
    }
}

// Keys must never reach the logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for provider in Provider::ALL {
            if self.is_set(provider) {
                map.entry(&provider, &"<redacted>");
            }
        }
        map.finish()
    }
}
