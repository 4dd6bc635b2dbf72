//! ============================================================================
//! AVATAR-CORE: Token-gated avatar streaming client
//! ============================================================================
//! This crate holds all client logic behind the avatar UI:
//! - Access gate: wallet sign-in + SPL token balance check via solana-client
//! - Streaming orchestrator: session negotiation, FIFO speech, time budget
//! - Voice input: microphone capture and OpenAI transcription
//! - Backend API client with stale-while-revalidate caching
//! - redb-backed credential persistence
//! ============================================================================

pub mod access;
pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod retry;
pub mod streaming;
pub mod types;
pub mod voice;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use types::*;
pub use access::{AccessGate, AccessState, BalanceChecker, TokenBalanceCache};
pub use api::{BackendApi, ChatBackend};
pub use auth::{AuthClient, CredentialStore};
pub use config::ClientConfig;
pub use db::ClientDb;
pub use streaming::{StreamingOrchestrator, StreamEvent};
pub use voice::VoiceCapture;
