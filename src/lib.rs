//! Voicenote - live dictation with article generation
//!
//! This library exports the core modules: microphone acquisition, the live
//! transcription session, the speech engine backends, and the LLM article
//! collaborator.

/// Microphone acquisition negotiator and its strategy table
pub mod acquire;
/// Article generation and transcript Q&A backend
pub mod article;
/// Configuration management
pub mod config;
/// Speech engine backends
pub mod engine;
/// Platform audio layer
pub mod media;
/// Live transcription session
pub mod session;
/// Logging setup
pub mod telemetry;
