//! ============================================================================
//! Native Microphone - cpal input capture (feature "native-audio")
//! ============================================================================
//! The cpal stream is not Send, so each recording owns a capture thread that
//! builds the stream and appends samples until the stop flag drops.
//! Recordings are returned as 16-bit PCM mono WAV.
//! ============================================================================

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info};

use super::capture::{CaptureDevice, Microphone, RecordedAudio};
use crate::types::VoiceError;

/// Default system input device
#[derive(Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }

    /// Names of available input devices
    pub fn list_input_devices() -> Vec<String> {
        let host = cpal::default_host();
        match host.input_devices() {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(e) => {
                error!("Failed to enumerate input devices: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn request_access(&self) -> Result<Box<dyn CaptureDevice>, VoiceError> {
        let name = tokio::task::spawn_blocking(|| {
            let host = cpal::default_host();
            host.default_input_device().map(|d| d.name().unwrap_or_default())
        })
        .await
        .map_err(|e| VoiceError::RecordingFailed(e.to_string()))?
        .ok_or(VoiceError::PermissionDenied)?;

        info!("Using audio device: {}", name);
        Ok(Box::new(CpalDevice::default()))
    }
}

struct Capture {
    is_recording: Arc<AtomicBool>,
    samples: Arc<Mutex<Vec<f32>>>,
    thread: JoinHandle<()>,
    sample_rate: u32,
}

/// One acquired input device
#[derive(Default)]
pub struct CpalDevice {
    capture: Option<Capture>,
}

#[async_trait]
impl CaptureDevice for CpalDevice {
    async fn start(&mut self) -> Result<(), VoiceError> {
        if self.capture.is_some() {
            return Err(VoiceError::RecordingFailed("Already recording".into()));
        }

        let is_recording = Arc::new(AtomicBool::new(true));
        let samples = Arc::new(Mutex::new(Vec::new()));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, String>>();

        let flag = Arc::clone(&is_recording);
        let buffer = Arc::clone(&samples);
        let thread = std::thread::spawn(move || {
            if let Err(e) = capture_loop(flag, buffer, &ready_tx) {
                error!("Audio capture error: {}", e);
                let _ = ready_tx.send(Err(e));
            }
        });

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| VoiceError::RecordingFailed(e.to_string()))?
            .map_err(|_| VoiceError::RecordingFailed("Capture thread exited".into()))?;

        let sample_rate = ready.map_err(VoiceError::RecordingFailed)?;
        self.capture = Some(Capture {
            is_recording,
            samples,
            thread,
            sample_rate,
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<RecordedAudio, VoiceError> {
        let capture = self
            .capture
            .take()
            .ok_or_else(|| VoiceError::RecordingFailed("Not recording".into()))?;

        capture.is_recording.store(false, Ordering::SeqCst);
        tokio::task::spawn_blocking(move || capture.thread.join())
            .await
            .map_err(|e| VoiceError::RecordingFailed(e.to_string()))?
            .map_err(|_| VoiceError::RecordingFailed("Capture thread panicked".into()))?;

        let samples = std::mem::take(&mut *capture.samples.lock().unwrap_or_else(|e| e.into_inner()));
        debug!("Captured {} samples at {} Hz", samples.len(), capture.sample_rate);

        Ok(RecordedAudio {
            bytes: encode_wav(&samples, capture.sample_rate),
            mime_type: "audio/wav".to_string(),
        })
    }

    fn release(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.is_recording.store(false, Ordering::SeqCst);
        }
    }
}

/// Runs on the capture thread. Sends the sample rate once the stream plays.
fn capture_loop(
    is_recording: Arc<AtomicBool>,
    samples: Arc<Mutex<Vec<f32>>>,
    ready: &mpsc::Sender<Result<u32, String>>,
) -> Result<(), String> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| "No input device found".to_string())?;
    let supported = device
        .default_input_config()
        .map_err(|e| format!("No input config: {}", e))?;

    let channels = supported.channels() as usize;
    let sample_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.config();
    let on_error = |err: cpal::StreamError| error!("Audio stream error: {}", err);

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => {
            let buffer = Arc::clone(&samples);
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    push_mono(&buffer, data.iter().copied(), channels)
                },
                on_error,
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            let buffer = Arc::clone(&samples);
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    push_mono(&buffer, data.iter().map(|s| *s as f32 / 32768.0), channels)
                },
                on_error,
                None,
            )
        }
        cpal::SampleFormat::U16 => {
            let buffer = Arc::clone(&samples);
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    push_mono(
                        &buffer,
                        data.iter().map(|s| (*s as f32 - 32768.0) / 32768.0),
                        channels,
                    )
                },
                on_error,
                None,
            )
        }
        other => return Err(format!("Unsupported sample format: {:?}", other)),
    }
    .map_err(|e| format!("Failed to build input stream: {}", e))?;

    stream.play().map_err(|e| format!("Failed to start stream: {}", e))?;
    let _ = ready.send(Ok(sample_rate));

    while is_recording.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    drop(stream);
    info!("Audio stream stopped");
    Ok(())
}

/// Average interleaved frames down to mono
fn push_mono(buffer: &Mutex<Vec<f32>>, data: impl Iterator<Item = f32>, channels: usize) {
    let channels = channels.max(1);
    if let Ok(mut buffer) = buffer.lock() {
        let mut frame_sum = 0.0;
        for (i, sample) in data.enumerate() {
            frame_sum += sample;
            if (i + 1) % channels == 0 {
                buffer.push(frame_sum / channels as f32);
                frame_sum = 0.0;
            }
        }
    }
}

/// 16-bit PCM mono WAV
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_header() {
        let wav = encode_wav(&[0.0, 1.0, -1.0], 16000);
        assert_eq!(wav.len(), 44 + 6);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 16000);
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 6);
        assert_eq!(i16::from_le_bytes([wav[46], wav[47]]), i16::MAX);
    }

    #[test]
    fn test_stereo_downmix() {
        let buffer = Mutex::new(Vec::new());
        push_mono(&buffer, [0.5, 0.5, 1.0, 0.0].into_iter(), 2);
        assert_eq!(*buffer.lock().unwrap(), vec![0.5, 0.5]);
    }
}
