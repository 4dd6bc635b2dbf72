//! ============================================================================
//! Voice Module - Push-to-talk input for the avatar
//! ============================================================================
//! - `VoiceCapture`: permission / record / transcribe state machine
//! - `WhisperTranscriber`: OpenAI speech-to-text
//! - `CpalMicrophone`: native input device (feature "native-audio")
//! ============================================================================

mod capture;
#[cfg(feature = "native-audio")]
mod cpal_input;
mod whisper;

pub use capture::{
    CaptureDevice, Microphone, RecordedAudio, Transcriber, VoiceCapture, RECORDER_SETTLE_DELAY,
};
#[cfg(feature = "native-audio")]
pub use cpal_input::{encode_wav, CpalDevice, CpalMicrophone};
pub use whisper::{WhisperTranscriber, OPENAI_TRANSCRIPTION_URL};

#[cfg(test)]
pub(crate) use capture::tests::{FakeMicrophone, FakeTranscriber};
