//! In-memory chat history, keyed by session id.
//!
//! Sessions are created on first reference and live until the process exits,
//! so a client can reconnect with the same id and continue the conversation.

use dashmap::DashMap;
use voice_agent_core::turn::{Role, Turn};

/// Concurrent map from session id to its ordered turns.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Vec<Turn>>,
    max_turns: usize,
}

impl SessionStore {
    /// Creates a store that keeps at most `max_turns` turns per session
    /// (`0` keeps everything).
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_turns,
        }
    }

    /// Makes sure a session exists, leaving any existing history untouched.
    pub fn ensure(&self, session_id: &str) {
        self.sessions.entry(session_id.to_string()).or_default();
    }

    /// Appends a turn and returns a snapshot of the session's history.
    pub fn append(&self, session_id: &str, turn: Turn) -> Vec<Turn> {
        let mut turns = self.sessions.entry(session_id.to_string()).or_default();
        turns.push(turn);
        if self.max_turns > 0 && turns.len() > self.max_turns {
            let excess = turns.len() - self.max_turns;
            turns.drain(..excess);
            // A conversation sent to the model must open with the user.
            if turns.first().is_some_and(|t| t.role == Role::Model) {
                turns.remove(0);
            }
        }
        turns.clone()
    }

    /// Returns a copy of the session's history (empty if unknown).
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .get(session_id)
            .map(|turns| turns.clone())
            .unwrap_or_default()
    }

    /// Empties one session's history. Other sessions are not touched.
    pub fn clear(&self, session_id: &str) {
        if let Some(mut turns) = self.sessions.get_mut(session_id) {
            turns.clear();
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
