//! ============================================================================
//! Streaming Module - Live avatar sessions
//! ============================================================================
//! - `StreamingOrchestrator`: negotiate / speak / count down / tear down
//! - `HttpAvatarService`: the avatar provider's streaming REST API
//! - `SpeakQueue`: one speech request in flight at a time
//! - `SessionTimer`: per-session time budget
//! - `WebRtcConnector`: webrtc-rs peer connections (feature "webrtc-peer")
//!
//! ## Usage
//! ```rust,ignore
//! use avatar_core::streaming::{HttpAvatarService, NullVideoSink, StreamingOrchestrator};
//!
//! let avatar = Arc::new(HttpAvatarService::new(DEFAULT_AVATAR_API_URL, &api_key));
//! let orchestrator = StreamingOrchestrator::builder(avatar, connector, Arc::new(NullVideoSink))
//!     .chat_backend(Arc::new(backend))
//!     .build();
//! orchestrator.start().await?;
//! orchestrator.queue_speak("Hello!").await?;
//! ```
//! ============================================================================

mod avatar_api;
mod orchestrator;
mod peer;
mod speak_queue;
mod timer;
mod types;
#[cfg(feature = "webrtc-peer")]
mod webrtc_peer;

pub use avatar_api::{AvatarService, HttpAvatarService, DEFAULT_AVATAR_API_URL};
pub use orchestrator::{OrchestratorBuilder, StreamingOrchestrator};
pub use peer::{NullVideoSink, PeerConnection, PeerConnector, PeerSession, VideoSink};
pub use speak_queue::{SpeakQueue, SpeechSink};
pub use timer::SessionTimer;
pub use types::*;
#[cfg(feature = "webrtc-peer")]
pub use webrtc_peer::{WebRtcConnector, WebRtcPeer};
