//! ============================================================================
//! Whisper Transcriber - OpenAI audio transcription API
//! ============================================================================

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error};

use super::capture::{RecordedAudio, Transcriber};
use crate::types::VoiceError;

pub const OPENAI_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const WHISPER_MODEL: &str = "whisper-1";
const LANGUAGE: &str = "en";

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiErrorBody {
    error: Option<OpenAiErrorDetail>,
}

#[derive(Deserialize)]
struct OpenAiErrorDetail {
    message: Option<String>,
}

/// Speech-to-text through the OpenAI whisper endpoint
pub struct WhisperTranscriber {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl WhisperTranscriber {
    pub fn new(api_key: &str) -> Self {
        Self::with_endpoint(api_key, OPENAI_TRANSCRIPTION_URL)
    }

    pub fn with_endpoint(api_key: &str, endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: RecordedAudio) -> Result<String, VoiceError> {
        debug!("Uploading {} bytes for transcription", audio.bytes.len());

        let file_name = audio.file_name();
        let file = Part::bytes(audio.bytes)
            .file_name(file_name)
            .mime_str(&audio.mime_type)
            .map_err(|e| VoiceError::Transcription(format!("Invalid audio type: {}", e)))?;

        let form = Form::new()
            .part("file", file)
            .text("model", WHISPER_MODEL)
            .text("language", LANGUAGE);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<OpenAiErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .and_then(|e| e.message)
                .map(|m| format!(" - {}", m))
                .unwrap_or_default();
            error!("Transcription failed: {}{}", status, detail);
            return Err(VoiceError::Transcription(format!("{}{}", status, detail)));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Transcription(format!("Invalid response: {}", e)))?;

        Ok(body.text.unwrap_or_default().trim().to_string())
    }
}
