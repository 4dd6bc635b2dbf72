//! ============================================================================
//! WebRTC Peer - `PeerConnector` on webrtc-rs (feature "webrtc-peer")
//! ============================================================================
//! One RTCPeerConnection per session. Track, ICE candidate and ICE state
//! callbacks are forwarded, in order, onto the session's event channel.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::peer::{PeerConnection, PeerConnector, PeerSession};
use super::types::{
    IceCandidate, IceServer, IceUrls, MediaTrack, PeerConnectionState, PeerEvent,
    SessionDescription, TrackKind,
};

/// Creates webrtc-rs peer connections with the default codecs and interceptors
#[derive(Debug, Default)]
pub struct WebRtcConnector;

impl WebRtcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, ice_servers: &[IceServer]) -> Result<PeerSession> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| anyhow!("Failed to register codecs: {}", e))?;

        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| anyhow!("Failed to register interceptors: {}", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: rtc_ice_servers(ice_servers),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| anyhow!("Failed to create peer connection: {}", e))?,
        );

        let (tx, events) = mpsc::unbounded_channel();
        install_handlers(&pc, tx);
        debug!("Peer connection created with {} ICE servers", ice_servers.len());

        Ok(PeerSession {
            connection: Arc::new(WebRtcPeer { pc }),
            events,
        })
    }
}

fn install_handlers(pc: &RTCPeerConnection, tx: mpsc::UnboundedSender<PeerEvent>) {
    let track_tx = tx.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            if let Some(kind) = track_kind(track.kind()) {
                let _ = track_tx.send(PeerEvent::Track(MediaTrack {
                    id: track.id(),
                    kind,
                    stream_id: track.stream_id(),
                }));
            }
            Box::pin(async {})
        },
    ));

    let candidate_tx = tx.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        // None marks the end of gathering
        if let Some(candidate) = candidate {
            match candidate.to_json() {
                Ok(init) => {
                    let _ = candidate_tx.send(PeerEvent::IceCandidate(ice_candidate(init)));
                }
                Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
            }
        }
        Box::pin(async {})
    }));

    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        if let Some(state) = connection_state(state) {
            let _ = tx.send(PeerEvent::ConnectionState(state));
        }
        Box::pin(async {})
    }));
}

/// Live webrtc-rs connection
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(|e| anyhow!("{}", e))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| anyhow!("{}", e))?;
        Ok(from_rtc_description(&answer))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(|e| anyhow!("{}", e))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Peer connection close failed: {}", e);
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

fn rtc_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: match &server.urls {
                IceUrls::One(url) => vec![url.clone()],
                IceUrls::Many(urls) => urls.clone(),
            },
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn to_rtc_description(description: &SessionDescription) -> Result<RTCSessionDescription> {
    let sdp = description.sdp.clone();
    let parsed = match description.sdp_type.as_str() {
        "offer" => RTCSessionDescription::offer(sdp),
        "answer" => RTCSessionDescription::answer(sdp),
        "pranswer" => RTCSessionDescription::pranswer(sdp),
        other => return Err(anyhow!("Unsupported SDP type: {}", other)),
    };
    parsed.map_err(|e| anyhow!("Invalid SDP: {}", e))
}

fn from_rtc_description(description: &RTCSessionDescription) -> SessionDescription {
    SessionDescription {
        sdp_type: description.sdp_type.to_string(),
        sdp: description.sdp.clone(),
    }
}

fn ice_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn track_kind(kind: RTPCodecType) -> Option<TrackKind> {
    match kind {
        RTPCodecType::Audio => Some(TrackKind::Audio),
        RTPCodecType::Video => Some(TrackKind::Video),
        _ => None,
    }
}

fn connection_state(state: RTCIceConnectionState) -> Option<PeerConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(PeerConnectionState::New),
        RTCIceConnectionState::Checking => Some(PeerConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(PeerConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(PeerConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(PeerConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(PeerConnectionState::Closed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_servers_from_provider_payload() {
        let servers = vec![
            IceServer {
                urls: IceUrls::One("stun:stun.l.google.com:19302".into()),
                username: None,
                credential: None,
            },
            IceServer {
                urls: IceUrls::Many(vec![
                    "turn:turn.example.com:3478?transport=udp".into(),
                    "turn:turn.example.com:443?transport=tcp".into(),
                ]),
                username: Some("user".into()),
                credential: Some("secret".into()),
            },
        ];

        let rtc = rtc_ice_servers(&servers);
        assert_eq!(rtc[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(rtc[0].username, "");
        assert_eq!(rtc[1].urls.len(), 2);
        assert_eq!(rtc[1].username, "user");
        assert_eq!(rtc[1].credential, "secret");
    }

    #[test]
    fn test_unknown_sdp_type_rejected() {
        let err = to_rtc_description(&SessionDescription {
            sdp_type: "rollback".into(),
            sdp: String::new(),
        })
        .unwrap_err();
        assert!(err.to_string().contains("Unsupported SDP type"));
    }

    #[test]
    fn test_malformed_offer_rejected() {
        let err = to_rtc_description(&SessionDescription {
            sdp_type: "offer".into(),
            sdp: "not an sdp".into(),
        })
        .unwrap_err();
        assert!(err.to_string().starts_with("Invalid SDP"));
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            connection_state(RTCIceConnectionState::Disconnected),
            Some(PeerConnectionState::Disconnected)
        );
        assert_eq!(
            connection_state(RTCIceConnectionState::Connected),
            Some(PeerConnectionState::Connected)
        );
        assert_eq!(connection_state(RTCIceConnectionState::Unspecified), None);
        assert_eq!(track_kind(RTPCodecType::Video), Some(TrackKind::Video));
        assert_eq!(track_kind(RTPCodecType::Unspecified), None);
    }

    #[test]
    fn test_candidate_keeps_fields() {
        let candidate = ice_candidate(RTCIceCandidateInit {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        });
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_m_line_index, Some(0));
    }

    #[tokio::test]
    async fn test_connect_and_close_offline() {
        let session = WebRtcConnector::new().connect(&[]).await.unwrap();
        session.connection.close().await;
        // Closing twice is harmless
        session.connection.close().await;
    }
}
