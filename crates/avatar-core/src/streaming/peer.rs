//! ============================================================================
//! Peer Connection Seams - Media transport and video output
//! ============================================================================
//! The orchestrator drives negotiation through these traits; hosts bind them
//! to a concrete WebRTC stack and renderer.
//! ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::types::{IceServer, MediaTrack, PeerEvent, SessionDescription};

/// A freshly created peer connection plus its event stream
pub struct PeerSession {
    pub connection: Arc<dyn PeerConnection>,
    /// Track, ICE candidate and connection-state callbacks, in order
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

/// Creates peer connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, ice_servers: &[IceServer]) -> Result<PeerSession>;
}

/// One peer connection to the avatar service
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, description: &SessionDescription) -> Result<()>;
    /// Close the connection and stop its tracks. Must be idempotent.
    async fn close(&self);
}

/// Where remote media is rendered
pub trait VideoSink: Send + Sync {
    fn attach(&self, track: &MediaTrack);
    fn clear(&self);
}

/// Sink that drops media (headless hosts)
#[derive(Debug, Default)]
pub struct NullVideoSink;

impl VideoSink for NullVideoSink {
    fn attach(&self, _track: &MediaTrack) {}
    fn clear(&self) {}
}
