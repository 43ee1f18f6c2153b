//! Core types and model adapters for the voice agent.
//!
//! The service crate depends only on the traits in [`llm_client`]; the
//! concrete Gemini implementation lives in [`gemini`].

pub mod gemini;
pub mod llm_client;
pub mod persona;
pub mod turn;
