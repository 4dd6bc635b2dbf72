//! ============================================================================
//! Core Types for the Avatar Stream Client
//! ============================================================================
//! Shared chat payloads, voice capture states and the error taxonomy used at
//! every orchestration boundary (start / stop / speak / record).
//! These types serialize to JSON so hosts can forward them to a UI layer.
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Role of a chat message sent to the backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// Single chat message for the backend chat endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Which system prompt the backend should answer with.
/// The avatar always speaks `Video` responses (shorter, spoken style).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptType {
    #[default]
    Text,
    Video,
}

/// Microphone capture states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    #[default]
    Idle,
    AwaitingPermission,
    Recording,
    Transcribing,
}

/// Voice pipeline errors. All of these are recoverable by retrying the action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
pub enum VoiceError {
    #[error("Microphone access denied. Please enable microphone access to use voice chat.")]
    PermissionDenied,

    #[error("Failed to start recording: {0}")]
    RecordingFailed(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("No transcription received. Please try speaking more clearly.")]
    EmptyTranscription,

    #[error("Voice capture busy ({0:?})")]
    Busy(VoiceState),

    #[error("Not recording")]
    NotRecording,

    #[error("Voice input is not configured")]
    Unavailable,
}

/// Errors surfaced by the streaming orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
pub enum AvatarError {
    #[error("A streaming session is already active")]
    SessionActive,

    #[error("No active session")]
    NoActiveSession,

    #[error("Failed to start streaming: {0}")]
    Negotiation(String),

    #[error("Connection lost. Please try reconnecting.")]
    ConnectionLost,

    #[error("Failed to send text: {0}")]
    Speak(String),

    #[error("Failed to close session: {0}")]
    Close(String),

    #[error("Failed to process chat message: {0}")]
    Chat(String),

    #[error(transparent)]
    Voice(#[from] VoiceError),
}
