//! ============================================================================
//! Voice Capture - Microphone permission, recording and transcription
//! ============================================================================
//! Idle -> AwaitingPermission -> Recording -> Transcribing -> Idle
//!
//! Microphone access is requested once and the device is kept for later
//! recordings until `release`. Any failure returns the machine to Idle.
//! ============================================================================

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::types::{VoiceError, VoiceState};

/// Pause between acquiring the device and starting the recorder
pub const RECORDER_SETTLE_DELAY: Duration = Duration::from_millis(300);

/// One finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAudio {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl RecordedAudio {
    /// File name sent to the transcription service
    pub fn file_name(&self) -> &'static str {
        if self.mime_type.contains("wav") {
            "recording.wav"
        } else if self.mime_type.contains("mp4") {
            "recording.mp4"
        } else {
            "recording.webm"
        }
    }
}

/// Grants access to an input device
#[async_trait]
pub trait Microphone: Send + Sync {
    async fn request_access(&self) -> Result<Box<dyn CaptureDevice>, VoiceError>;
}

/// An acquired input device
#[async_trait]
pub trait CaptureDevice: Send {
    async fn start(&mut self) -> Result<(), VoiceError>;
    async fn stop(&mut self) -> Result<RecordedAudio, VoiceError>;
    /// Stop every track and give the device back
    fn release(&mut self);
}

/// Speech-to-text
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: RecordedAudio) -> Result<String, VoiceError>;
}

/// Voice capture state machine
pub struct VoiceCapture {
    microphone: Option<Arc<dyn Microphone>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    device: Option<Box<dyn CaptureDevice>>,
    state: watch::Sender<VoiceState>,
}

impl VoiceCapture {
    pub fn new(microphone: Arc<dyn Microphone>, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            microphone: Some(microphone),
            transcriber: Some(transcriber),
            device: None,
            state: watch::channel(VoiceState::Idle).0,
        }
    }

    /// Capture without a microphone; every recording attempt is `Unavailable`
    pub fn disabled() -> Self {
        Self {
            microphone: None,
            transcriber: None,
            device: None,
            state: watch::channel(VoiceState::Idle).0,
        }
    }

    pub fn state(&self) -> VoiceState {
        *self.state.borrow()
    }

    /// Observe state changes without holding the capture
    pub fn subscribe(&self) -> watch::Receiver<VoiceState> {
        self.state.subscribe()
    }

    pub fn has_permission(&self) -> bool {
        self.device.is_some()
    }

    fn set_state(&self, state: VoiceState) {
        self.state.send_replace(state);
    }

    pub async fn start_recording(&mut self) -> Result<(), VoiceError> {
        let current = self.state();
        if current != VoiceState::Idle {
            return Err(VoiceError::Busy(current));
        }
        let microphone = self.microphone.clone().ok_or(VoiceError::Unavailable)?;

        if self.device.is_none() {
            self.set_state(VoiceState::AwaitingPermission);
            match microphone.request_access().await {
                Ok(device) => self.device = Some(device),
                Err(e) => {
                    warn!("Microphone access failed: {}", e);
                    self.set_state(VoiceState::Idle);
                    return Err(e);
                }
            }
        }

        tokio::time::sleep(RECORDER_SETTLE_DELAY).await;

        let started = match self.device.as_mut() {
            Some(device) => device.start().await,
            None => Err(VoiceError::Unavailable),
        };
        if let Err(e) = started {
            warn!("Failed to start recording: {}", e);
            self.set_state(VoiceState::Idle);
            return Err(match e {
                VoiceError::RecordingFailed(_) => e,
                other => VoiceError::RecordingFailed(other.to_string()),
            });
        }

        debug!("Recording started");
        self.set_state(VoiceState::Recording);
        Ok(())
    }

    /// Stop recording and transcribe. Returns the trimmed, non-empty text.
    pub async fn stop_recording(&mut self) -> Result<String, VoiceError> {
        if self.state() != VoiceState::Recording {
            return Err(VoiceError::NotRecording);
        }
        let transcriber = match (&self.transcriber, self.device.is_some()) {
            (Some(transcriber), true) => Arc::clone(transcriber),
            _ => {
                self.set_state(VoiceState::Idle);
                return Err(VoiceError::Unavailable);
            }
        };

        let stopped = match self.device.as_mut() {
            Some(device) => device.stop().await,
            None => Err(VoiceError::Unavailable),
        };
        let audio = match stopped {
            Ok(audio) => audio,
            Err(e) => {
                self.set_state(VoiceState::Idle);
                return Err(e);
            }
        };

        self.set_state(VoiceState::Transcribing);
        debug!("Transcribing {} bytes of {}", audio.bytes.len(), audio.mime_type);
        let result = transcriber.transcribe(audio).await;
        self.set_state(VoiceState::Idle);

        let text = result?;
        let text = text.trim();
        if text.is_empty() {
            return Err(VoiceError::EmptyTranscription);
        }
        Ok(text.to_string())
    }

    /// Give the microphone back
    pub fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            info!("Releasing microphone");
            device.release();
        }
        self.set_state(VoiceState::Idle);
    }
}

impl Drop for VoiceCapture {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted microphone shared between a test and the capture under test
    #[derive(Default)]
    pub struct FakeMicrophone {
        pub deny: bool,
        pub fail_start: bool,
        pub grants: AtomicUsize,
        pub releases: Arc<AtomicUsize>,
    }

    struct FakeDevice {
        fail_start: bool,
        recording: bool,
        releases: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Microphone for FakeMicrophone {
        async fn request_access(&self) -> Result<Box<dyn CaptureDevice>, VoiceError> {
            if self.deny {
                return Err(VoiceError::PermissionDenied);
            }
            self.grants.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeDevice {
                fail_start: self.fail_start,
                recording: false,
                releases: Arc::clone(&self.releases),
            }))
        }
    }

    #[async_trait]
    impl CaptureDevice for FakeDevice {
        async fn start(&mut self) -> Result<(), VoiceError> {
            if self.fail_start {
                return Err(VoiceError::RecordingFailed("device busy".into()));
            }
            self.recording = true;
            Ok(())
        }

        async fn stop(&mut self) -> Result<RecordedAudio, VoiceError> {
            self.recording = false;
            Ok(RecordedAudio {
                bytes: vec![1, 2, 3],
                mime_type: "audio/webm".into(),
            })
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Transcriber returning scripted results
    pub struct FakeTranscriber {
        script: Mutex<VecDeque<Result<String, VoiceError>>>,
    }

    impl FakeTranscriber {
        pub fn new(script: Vec<Result<String, VoiceError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
            })
        }
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(&self, _audio: RecordedAudio) -> Result<String, VoiceError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn capture(mic: Arc<FakeMicrophone>, script: Vec<Result<String, VoiceError>>) -> VoiceCapture {
        VoiceCapture::new(mic, FakeTranscriber::new(script))
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_and_transcribe() {
        let mic = Arc::new(FakeMicrophone::default());
        let mut voice = capture(mic.clone(), vec![Ok("  hello avatar \n".into())]);

        voice.start_recording().await.unwrap();
        assert_eq!(voice.state(), VoiceState::Recording);

        let text = voice.stop_recording().await.unwrap();
        assert_eq!(text, "hello avatar");
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_requested_once() {
        let mic = Arc::new(FakeMicrophone::default());
        let mut voice = capture(mic.clone(), vec![Ok("a".into()), Ok("b".into())]);

        for _ in 0..2 {
            voice.start_recording().await.unwrap();
            voice.stop_recording().await.unwrap();
        }
        assert_eq!(mic.grants.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_returns_to_idle() {
        let mic = Arc::new(FakeMicrophone {
            deny: true,
            ..Default::default()
        });
        let mut voice = capture(mic, vec![]);

        assert_eq!(voice.start_recording().await, Err(VoiceError::PermissionDenied));
        assert_eq!(voice.state(), VoiceState::Idle);
        assert!(!voice.has_permission());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_returns_to_idle() {
        let mic = Arc::new(FakeMicrophone {
            fail_start: true,
            ..Default::default()
        });
        let mut voice = capture(mic, vec![]);

        assert!(matches!(
            voice.start_recording().await,
            Err(VoiceError::RecordingFailed(_))
        ));
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_transcription_rejected() {
        let mic = Arc::new(FakeMicrophone::default());
        let mut voice = capture(mic, vec![Ok("   ".into())]);

        voice.start_recording().await.unwrap();
        assert_eq!(voice.stop_recording().await, Err(VoiceError::EmptyTranscription));
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcription_failure_surfaces() {
        let mic = Arc::new(FakeMicrophone::default());
        let mut voice = capture(mic, vec![Err(VoiceError::Transcription("500".into()))]);

        voice.start_recording().await.unwrap();
        assert_eq!(
            voice.stop_recording().await,
            Err(VoiceError::Transcription("500".into()))
        );
        assert_eq!(voice.state(), VoiceState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_is_busy() {
        let mic = Arc::new(FakeMicrophone::default());
        let mut voice = capture(mic, vec![]);

        voice.start_recording().await.unwrap();
        assert_eq!(
            voice.start_recording().await,
            Err(VoiceError::Busy(VoiceState::Recording))
        );
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let mut voice = capture(Arc::new(FakeMicrophone::default()), vec![]);
        assert_eq!(voice.stop_recording().await, Err(VoiceError::NotRecording));
    }

    #[tokio::test]
    async fn test_disabled_capture_unavailable() {
        let mut voice = VoiceCapture::disabled();
        assert_eq!(voice.start_recording().await, Err(VoiceError::Unavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_returns_device() {
        let mic = Arc::new(FakeMicrophone::default());
        let mut voice = capture(mic.clone(), vec![]);

        voice.start_recording().await.unwrap();
        voice.release();
        assert_eq!(mic.releases.load(Ordering::SeqCst), 1);
        assert_eq!(voice.state(), VoiceState::Idle);

        // Released twice, device returned once
        voice.release();
        drop(voice);
        assert_eq!(mic.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_file_name_from_mime() {
        let audio = |mime: &str| RecordedAudio {
            bytes: vec![],
            mime_type: mime.into(),
        };
        assert_eq!(audio("audio/webm;codecs=opus").file_name(), "recording.webm");
        assert_eq!(audio("audio/wav").file_name(), "recording.wav");
        assert_eq!(audio("audio/mp4").file_name(), "recording.mp4");
    }
}
