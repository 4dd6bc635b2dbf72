//! ============================================================================
//! Streaming Types - Session data, peer events and host-facing events
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Wall-clock budget of one streaming session (3 minutes)
pub const SESSION_DURATION_SECS: u32 = 180;

/// Remaining seconds at which the countdown is shown as "low"
pub const LOW_TIME_THRESHOLD_SECS: u32 = 30;

/// Message shown when the peer connection drops mid-session
pub const CONNECTION_LOST_MESSAGE: &str = "Connection lost. Please try reconnecting.";

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Uninitialized,
    Negotiating,
    Streaming,
    Closing,
    Closed,
    Failed,
}

impl SessionStatus {
    /// Negotiating or Streaming: a second `start` is refused
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Negotiating | SessionStatus::Streaming)
    }
}

/// SDP offer or answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// ICE server URLs may be a single string or a list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Local ICE candidate in its JSON form
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// What the avatar service returns for a new session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub session_id: String,
    #[serde(rename = "sdp")]
    pub remote_description: SessionDescription,
    #[serde(rename = "ice_servers2", default)]
    pub ice_servers: Vec<IceServer>,
}

/// Fixed avatar and voice for every session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvatarProfile {
    pub avatar_name: String,
    pub video_encoding: String,
    pub quality: String,
    pub voice: VoiceSettings,
    pub disable_idle_timeout: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceSettings {
    pub emotion: String,
    pub rate: f32,
}

impl Default for AvatarProfile {
    fn default() -> Self {
        Self {
            avatar_name: "8f0ece2d4b44403e89f63f9b2fb68782".to_string(),
            video_encoding: "H264".to_string(),
            quality: "low".to_string(),
            voice: VoiceSettings {
                emotion: "Friendly".to_string(),
                rate: 1.0,
            },
            disable_idle_timeout: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Remote media track handed to the video sink
#[derive(Debug, Clone, PartialEq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    /// Stream the track belongs to; audio and video share one stream
    pub stream_id: String,
}

/// ICE connection states reported by the peer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// States that end a streaming session
    pub fn is_lost(&self) -> bool {
        matches!(
            self,
            PeerConnectionState::Disconnected
                | PeerConnectionState::Failed
                | PeerConnectionState::Closed
        )
    }
}

/// Callbacks from the peer connection, delivered as a channel
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Track(MediaTrack),
    IceCandidate(IceCandidate),
    ConnectionState(PeerConnectionState),
}

/// Events broadcast to hosts (UI bindings, CLIs, tests)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    StatusChanged { status: SessionStatus },
    TimeRemaining { seconds: u32 },
    TrackReceived { kind: TrackKind },
    Transcription { text: String },
    Error { message: String },
}

/// Countdown display, `m:ss`
pub fn format_time(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Whether the countdown is in its last 30 seconds
pub fn is_low_time(seconds: u32) -> bool {
    seconds <= LOW_TIME_THRESHOLD_SECS
}
