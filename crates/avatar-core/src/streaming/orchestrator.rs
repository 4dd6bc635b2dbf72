//! ============================================================================
//! Streaming Orchestrator - Session negotiation, speech, budget and teardown
//! ============================================================================
//! Lifecycle:
//!   Uninitialized -> Negotiating -> Streaming -> Closing -> Closed
//!                         |              |
//!                         +--> Failed <--+  (negotiation error / link lost)
//!
//! All mutable session state sits in one `SessionState` behind a std mutex
//! that is never held across an await. Each `start` bumps a generation
//! counter; negotiation steps, peer events and timer expiry only act while
//! their generation is current, so a close during negotiation aborts it at
//! the next suspension point.
//! ============================================================================

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::avatar_api::AvatarService;
use super::peer::{PeerConnection, PeerConnector, PeerSession, VideoSink};
use super::speak_queue::{SpeakQueue, SpeechSink};
use super::timer::SessionTimer;
use super::types::{
    AvatarProfile, PeerEvent, SessionInfo, SessionStatus, StreamEvent, CONNECTION_LOST_MESSAGE,
    SESSION_DURATION_SECS,
};
use crate::api::ChatBackend;
use crate::types::{AvatarError, ChatMessage, PromptType, VoiceError, VoiceState};
use crate::voice::VoiceCapture;

const EVENT_CAPACITY: usize = 64;

// ============================================================================
// Session State
// ============================================================================

#[derive(Default)]
struct SessionState {
    status: SessionStatus,
    generation: u64,
    session: Option<SessionInfo>,
    peer: Option<Arc<dyn PeerConnection>>,
    pump: Option<JoinHandle<()>>,
    timer: Option<SessionTimer>,
    last_error: Option<String>,
}

/// Everything a session holds that must be released on teardown
#[derive(Default)]
struct SessionResources {
    session: Option<SessionInfo>,
    peer: Option<Arc<dyn PeerConnection>>,
    pump: Option<JoinHandle<()>>,
    timer: Option<SessionTimer>,
}

impl SessionResources {
    fn is_empty(&self) -> bool {
        self.session.is_none() && self.peer.is_none() && self.pump.is_none() && self.timer.is_none()
    }
}

impl SessionState {
    fn take_resources(&mut self) -> SessionResources {
        SessionResources {
            session: self.session.take(),
            peer: self.peer.take(),
            pump: self.pump.take(),
            timer: self.timer.take(),
        }
    }
}

/// Why a negotiation stopped early
enum Interrupted {
    /// Session closed or replaced while negotiating
    Superseded,
    Failed(String),
}

// ============================================================================
// Orchestrator
// ============================================================================

struct Inner {
    avatar: Arc<dyn AvatarService>,
    connector: Arc<dyn PeerConnector>,
    video: Arc<dyn VideoSink>,
    chat: Option<Arc<dyn ChatBackend>>,
    profile: AvatarProfile,
    session_budget_secs: u32,
    state: Mutex<SessionState>,
    events: broadcast::Sender<StreamEvent>,
    speak_queue: SpeakQueue,
    voice: tokio::sync::Mutex<VoiceCapture>,
    voice_state: watch::Receiver<VoiceState>,
}

/// Drives one avatar streaming session at a time
pub struct StreamingOrchestrator {
    inner: Arc<Inner>,
}

/// Builder for [`StreamingOrchestrator`]
pub struct OrchestratorBuilder {
    avatar: Arc<dyn AvatarService>,
    connector: Arc<dyn PeerConnector>,
    video: Arc<dyn VideoSink>,
    chat: Option<Arc<dyn ChatBackend>>,
    voice: Option<VoiceCapture>,
    profile: AvatarProfile,
    session_budget_secs: u32,
}

impl OrchestratorBuilder {
    pub fn chat_backend(mut self, chat: Arc<dyn ChatBackend>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn voice(mut self, voice: VoiceCapture) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn profile(mut self, profile: AvatarProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn session_budget_secs(mut self, secs: u32) -> Self {
        self.session_budget_secs = secs;
        self
    }

    pub fn build(self) -> StreamingOrchestrator {
        let voice = self.voice.unwrap_or_else(VoiceCapture::disabled);
        let voice_state = voice.subscribe();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            avatar: self.avatar,
            connector: self.connector,
            video: self.video,
            chat: self.chat,
            profile: self.profile,
            session_budget_secs: self.session_budget_secs,
            state: Mutex::new(SessionState::default()),
            events,
            speak_queue: SpeakQueue::new(Arc::new(SessionSpeech {
                inner: weak.clone(),
            })),
            voice: tokio::sync::Mutex::new(voice),
            voice_state,
        });

        StreamingOrchestrator { inner }
    }
}

impl StreamingOrchestrator {
    pub fn builder(
        avatar: Arc<dyn AvatarService>,
        connector: Arc<dyn PeerConnector>,
        video: Arc<dyn VideoSink>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            avatar,
            connector,
            video,
            chat: None,
            voice: None,
            profile: AvatarProfile::default(),
            session_budget_secs: SESSION_DURATION_SECS,
        }
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// Current lifecycle status. A `Failed` session still holds its remote
    /// session and peer; call `close_session` (or `start` again) to release them.
    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session.as_ref().map(|s| s.session_id.clone())
    }

    /// Latest user-facing error, cleared by the next `start`
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// Seconds left in the running session
    pub fn time_remaining(&self) -> Option<u32> {
        self.inner.lock().timer.as_ref().map(|t| t.remaining())
    }

    pub fn voice_state(&self) -> VoiceState {
        *self.inner.voice_state.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------------

    /// Negotiate a new streaming session
    pub async fn start(&self) -> Result<(), AvatarError> {
        let (generation, leftovers) = {
            let mut state = self.inner.lock();
            if state.status.is_active() {
                return Err(AvatarError::SessionActive);
            }
            let leftovers = state.take_resources();
            state.generation += 1;
            state.status = SessionStatus::Negotiating;
            state.last_error = None;
            (state.generation, leftovers)
        };
        self.inner.emit(StreamEvent::StatusChanged {
            status: SessionStatus::Negotiating,
        });

        if !leftovers.is_empty() {
            debug!("Releasing resources of the previous session");
            if let Err(e) = self.inner.release(leftovers).await {
                warn!("Cleanup of previous session failed: {}", e);
            }
        }

        match Arc::clone(&self.inner).negotiate(generation).await {
            Ok(()) => Ok(()),
            Err(Interrupted::Superseded) => {
                info!("Negotiation {} aborted", generation);
                Err(AvatarError::Negotiation(
                    "Session closed during negotiation".to_string(),
                ))
            }
            Err(Interrupted::Failed(message)) => {
                self.inner.fail_negotiation(generation, &message).await;
                Err(AvatarError::Negotiation(message))
            }
        }
    }

    /// End the current session. Safe to call at any time.
    pub async fn close_session(&self) -> Result<(), AvatarError> {
        self.inner.close(None).await
    }

    /// Component teardown: close the session and give back the microphone
    pub async fn shutdown(&self) -> Result<(), AvatarError> {
        let closed = self.close_session().await;
        self.inner.voice.lock().await.release();
        closed
    }

    // ------------------------------------------------------------------------
    // Speech and chat
    // ------------------------------------------------------------------------

    /// Queue text for the avatar to speak; resolves when it has been sent
    pub async fn queue_speak(&self, text: impl Into<String>) -> Result<(), AvatarError> {
        self.inner.speak_queue.enqueue(text).await
    }

    /// Turn user input into avatar speech, through the chat backend if any
    pub async fn handle_chat_message(&self, text: &str) -> Result<(), AvatarError> {
        if self.inner.lock().session.is_none() {
            self.inner.record_error(&AvatarError::NoActiveSession);
            return Err(AvatarError::NoActiveSession);
        }

        let speech = match &self.inner.chat {
            Some(chat) => {
                debug!("Processing chat message: {}", text);
                match chat
                    .send_chat_message(&[ChatMessage::user(text)], PromptType::Video)
                    .await
                {
                    Ok(reply) => reply,
                    Err(e) => {
                        let err = AvatarError::Chat(e.to_string());
                        self.inner.record_error(&err);
                        return Err(err);
                    }
                }
            }
            None => text.to_string(),
        };

        debug!("Queueing speech");
        self.queue_speak(speech).await
    }

    /// Typed input. Blank input is ignored.
    pub async fn submit_text(&self, text: &str) -> Result<(), AvatarError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        self.handle_chat_message(text).await
    }

    // ------------------------------------------------------------------------
    // Voice
    // ------------------------------------------------------------------------

    pub async fn start_recording(&self) -> Result<(), AvatarError> {
        let mut voice = self
            .inner
            .voice
            .try_lock()
            .map_err(|_| VoiceError::Busy(self.voice_state()))?;

        voice.start_recording().await.map_err(|e| {
            let err = AvatarError::from(e);
            self.inner.record_error(&err);
            err
        })
    }

    /// Stop recording, transcribe, and hand the text to `handle_chat_message`
    pub async fn stop_recording(&self) -> Result<String, AvatarError> {
        let text = {
            let mut voice = self
                .inner
                .voice
                .try_lock()
                .map_err(|_| VoiceError::Busy(self.voice_state()))?;
            voice.stop_recording().await
        };

        let text = match text {
            Ok(text) => text,
            Err(VoiceError::NotRecording) => return Err(VoiceError::NotRecording.into()),
            Err(e) => {
                let err = AvatarError::from(e);
                self.inner.record_error(&err);
                return Err(err);
            }
        };

        self.inner.emit(StreamEvent::Transcription { text: text.clone() });
        self.handle_chat_message(&text).await?;
        Ok(text)
    }
}

impl Drop for StreamingOrchestrator {
    fn drop(&mut self) {
        let inner = Arc::clone(&self.inner);
        let has_session = {
            let state = inner.lock();
            state.session.is_some() || state.peer.is_some() || state.timer.is_some()
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if has_session {
                        if let Err(e) = inner.close(None).await {
                            warn!("Teardown close failed: {}", e);
                        }
                    }
                    inner.voice.lock().await.release();
                });
            }
            Err(_) if has_session => {
                warn!("Orchestrator dropped outside a runtime; remote session left open");
            }
            Err(_) => {}
        }
    }
}

// ============================================================================
// Internals
// ============================================================================

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: StreamEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn record_error(&self, err: &AvatarError) {
        let message = err.to_string();
        error!("{}", message);
        self.lock().last_error = Some(message.clone());
        self.emit(StreamEvent::Error { message });
    }

    /// Whether negotiation `generation` may keep going
    fn is_current(&self, generation: u64) -> bool {
        let state = self.lock();
        state.generation == generation && state.status == SessionStatus::Negotiating
    }

    fn checkpoint(&self, generation: u64) -> Result<(), Interrupted> {
        if self.is_current(generation) {
            Ok(())
        } else {
            Err(Interrupted::Superseded)
        }
    }

    async fn negotiate(self: Arc<Self>, generation: u64) -> Result<(), Interrupted> {
        debug!("Creating new session...");
        let info = self
            .avatar
            .create_session(&self.profile)
            .await
            .map_err(|e| Interrupted::Failed(e.to_string()))?;
        debug!("Session data received: {}", info.session_id);

        let stored = {
            let mut state = self.lock();
            let current = state.generation == generation && state.status == SessionStatus::Negotiating;
            if current {
                state.session = Some(info.clone());
            }
            current
        };
        if !stored {
            // Nobody else knows about this session; end it here
            if let Err(e) = self.avatar.end_session(&info.session_id).await {
                warn!("Failed to end abandoned session {}: {}", info.session_id, e);
            }
            return Err(Interrupted::Superseded);
        }

        debug!("Creating peer connection...");
        let PeerSession { connection, events } = self
            .connector
            .connect(&info.ice_servers)
            .await
            .map_err(|e| Interrupted::Failed(format!("Failed to create peer connection: {}", e)))?;

        let attached = {
            let mut state = self.lock();
            let current = state.generation == generation && state.status == SessionStatus::Negotiating;
            if current {
                state.peer = Some(Arc::clone(&connection));
                state.pump = Some(tokio::spawn(pump_peer_events(
                    Arc::downgrade(&self),
                    generation,
                    info.session_id.clone(),
                    events,
                )));
            }
            current
        };
        if !attached {
            connection.close().await;
            return Err(Interrupted::Superseded);
        }

        debug!("Setting remote description...");
        connection
            .set_remote_description(&info.remote_description)
            .await
            .map_err(|e| Interrupted::Failed(format!("Failed to set remote description: {}", e)))?;
        self.checkpoint(generation)?;

        debug!("Creating answer...");
        let answer = connection
            .create_answer()
            .await
            .map_err(|e| Interrupted::Failed(format!("Failed to create answer: {}", e)))?;
        self.checkpoint(generation)?;

        debug!("Setting local description...");
        connection
            .set_local_description(&answer)
            .await
            .map_err(|e| Interrupted::Failed(format!("Failed to set local description: {}", e)))?;
        self.checkpoint(generation)?;

        debug!("Starting stream...");
        self.avatar
            .start_session(&info.session_id, &answer)
            .await
            .map_err(|e| Interrupted::Failed(e.to_string()))?;

        let ticks = {
            let mut state = self.lock();
            if state.generation != generation || state.status != SessionStatus::Negotiating {
                return Err(Interrupted::Superseded);
            }
            let weak = Arc::downgrade(&self);
            let timer = SessionTimer::start(self.session_budget_secs, move || {
                tokio::spawn(async move {
                    if let Some(inner) = weak.upgrade() {
                        info!("Session time is up");
                        if let Err(e) = inner.close(Some(generation)).await {
                            warn!("Close on expiry failed: {}", e);
                        }
                    }
                });
            });
            let ticks = timer.subscribe();
            state.timer = Some(timer);
            state.status = SessionStatus::Streaming;
            ticks
        };

        self.emit(StreamEvent::StatusChanged {
            status: SessionStatus::Streaming,
        });
        self.emit(StreamEvent::TimeRemaining {
            seconds: self.session_budget_secs,
        });
        tokio::spawn(forward_ticks(Arc::downgrade(&self), ticks));

        info!("Streaming started for session {}", info.session_id);
        Ok(())
    }

    async fn fail_negotiation(&self, generation: u64, message: &str) {
        let resources = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.status = SessionStatus::Failed;
            state.last_error = Some(format!("Failed to start streaming: {}", message));
            state.take_resources()
        };

        error!("Streaming start failed: {}", message);
        self.emit(StreamEvent::StatusChanged {
            status: SessionStatus::Failed,
        });
        self.emit(StreamEvent::Error {
            message: format!("Failed to start streaming: {}", message),
        });

        if let Err(e) = self.release(resources).await {
            warn!("Cleanup after failed negotiation: {}", e);
        }
    }

    /// Release resources in teardown order. Local steps always run; the
    /// remote end failure is returned afterwards.
    async fn release(&self, resources: SessionResources) -> anyhow::Result<()> {
        let SessionResources {
            session,
            peer,
            pump,
            timer,
        } = resources;

        if let Some(timer) = timer {
            timer.cancel();
        }

        let remote = match &session {
            Some(info) => self.avatar.end_session(&info.session_id).await,
            None => Ok(()),
        };

        if let Some(peer) = peer {
            peer.close().await;
        }
        if let Some(pump) = pump {
            pump.abort();
        }
        self.video.clear();

        remote
    }

    /// Close the session. With `only_generation`, close only if that
    /// negotiation is still the current one (timer expiry).
    async fn close(&self, only_generation: Option<u64>) -> Result<(), AvatarError> {
        let (resources, generation) = {
            let mut state = self.lock();
            if let Some(generation) = only_generation {
                if state.generation != generation {
                    return Ok(());
                }
            }
            let nothing_to_close = state.session.is_none()
                && state.peer.is_none()
                && state.status != SessionStatus::Negotiating;
            if state.status == SessionStatus::Closing || nothing_to_close {
                return Ok(());
            }
            state.generation += 1;
            state.status = SessionStatus::Closing;
            (state.take_resources(), state.generation)
        };

        info!("Closing session...");
        self.emit(StreamEvent::StatusChanged {
            status: SessionStatus::Closing,
        });

        let remote = self.release(resources).await;

        {
            let mut state = self.lock();
            if state.generation == generation {
                state.status = SessionStatus::Closed;
            }
        }
        self.emit(StreamEvent::StatusChanged {
            status: SessionStatus::Closed,
        });

        match remote {
            Ok(()) => {
                info!("Session closed successfully");
                Ok(())
            }
            Err(e) => {
                let err = AvatarError::Close(e.to_string());
                self.record_error(&err);
                Err(err)
            }
        }
    }

    fn connection_lost(&self, generation: u64) {
        let timer = {
            let mut state = self.lock();
            if state.generation != generation || state.status != SessionStatus::Streaming {
                return;
            }
            state.status = SessionStatus::Failed;
            state.last_error = Some(CONNECTION_LOST_MESSAGE.to_string());
            state.timer.take()
        };
        if let Some(timer) = timer {
            timer.cancel();
        }

        warn!("Peer connection lost");
        self.emit(StreamEvent::StatusChanged {
            status: SessionStatus::Failed,
        });
        self.emit(StreamEvent::Error {
            message: CONNECTION_LOST_MESSAGE.to_string(),
        });
    }

    async fn deliver_speech(&self, text: &str) -> Result<(), AvatarError> {
        let session_id = {
            let state = self.lock();
            match (&state.session, state.status) {
                (Some(info), SessionStatus::Streaming) => info.session_id.clone(),
                _ => return Err(AvatarError::NoActiveSession),
            }
        };

        debug!("Sending text to avatar: {}", text);
        self.avatar.speak(&session_id, text).await.map_err(|e| {
            let err = AvatarError::Speak(e.to_string());
            self.record_error(&err);
            err
        })
    }
}

/// Speak queue sink bound to the orchestrator's current session
struct SessionSpeech {
    inner: Weak<Inner>,
}

#[async_trait]
impl SpeechSink for SessionSpeech {
    async fn deliver(&self, text: &str) -> Result<(), AvatarError> {
        match self.inner.upgrade() {
            Some(inner) => inner.deliver_speech(text).await,
            None => Err(AvatarError::NoActiveSession),
        }
    }
}

/// Routes peer callbacks for one negotiation generation
async fn pump_peer_events(
    weak: Weak<Inner>,
    generation: u64,
    session_id: String,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };

        match event {
            PeerEvent::Track(track) => {
                debug!("Received {:?} track", track.kind);
                inner.video.attach(&track);
                inner.emit(StreamEvent::TrackReceived { kind: track.kind });
            }
            PeerEvent::IceCandidate(candidate) => {
                let avatar = Arc::clone(&inner.avatar);
                let session_id = session_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = avatar.submit_ice_candidate(&session_id, &candidate).await {
                        warn!("ICE error for session {}: {}", session_id, e);
                    }
                });
            }
            PeerEvent::ConnectionState(state) => {
                debug!("ICE Connection State: {:?}", state);
                if state.is_lost() {
                    inner.connection_lost(generation);
                }
            }
        }
    }
}

/// Mirrors countdown ticks onto the event channel until the timer ends
async fn forward_ticks(inner: Weak<Inner>, mut ticks: watch::Receiver<u32>) {
    while ticks.changed().await.is_ok() {
        let seconds = *ticks.borrow_and_update();
        match inner.upgrade() {
            Some(inner) => inner.emit(StreamEvent::TimeRemaining { seconds }),
            None => break,
        }
    }
}
