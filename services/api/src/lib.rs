//! Voice Agent API Library Crate
//!
//! This library contains all the server logic for the voice agent: the
//! configuration, the credential and session stores, the HTTP handlers, the
//! WebSocket conversation loop and the routing. The `api` binary is a thin
//! wrapper around this library.

pub mod config;
pub mod credentials;
pub mod handlers;
pub mod models;
pub mod router;
pub mod sessions;
pub mod state;
pub mod ws;
