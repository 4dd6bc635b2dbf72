//! ============================================================================
//! Avatar Service - Remote avatar rendering provider (HTTP)
//! ============================================================================
//! Session lifecycle on the provider side:
//!   streaming.new -> streaming.start -> streaming.ice* / streaming.task*
//!   -> streaming.stop
//! Every request carries the `X-Api-Key` header. Responses are wrapped in
//! `{ "data": ... }`.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use super::types::{AvatarProfile, IceCandidate, SessionDescription, SessionInfo};

/// Default avatar provider base URL
pub const DEFAULT_AVATAR_API_URL: &str = "https://api.heygen.com";

/// Remote avatar provider operations used by the orchestrator
#[async_trait]
pub trait AvatarService: Send + Sync {
    /// Create a provider session, returning its offer and ICE servers
    async fn create_session(&self, profile: &AvatarProfile) -> Result<SessionInfo>;

    /// Submit the local answer; the avatar starts streaming
    async fn start_session(&self, session_id: &str, answer: &SessionDescription) -> Result<()>;

    /// Relay one local ICE candidate
    async fn submit_ice_candidate(&self, session_id: &str, candidate: &IceCandidate) -> Result<()>;

    /// Make the avatar speak `text`
    async fn speak(&self, session_id: &str, text: &str) -> Result<()>;

    /// Terminate the provider session
    async fn end_session(&self, session_id: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Serialize)]
struct StartRequest<'a> {
    session_id: &'a str,
    sdp: &'a SessionDescription,
}

#[derive(Serialize)]
struct IceRequest<'a> {
    session_id: &'a str,
    candidate: &'a IceCandidate,
}

/// HTTP client for the avatar provider
pub struct HttpAvatarService {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpAvatarService {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// POST a JSON body to `streaming.{action}`, returning the raw response
    /// or `"{context}: {status} {body}"` on a non-2xx status
    async fn post<B: Serialize + ?Sized>(
        &self,
        action: &str,
        body: &B,
        context: &str,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/v1/streaming.{}", self.base_url, action);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| anyhow!("{}: {}", context, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            error!("{}: {} {}", context, status, error_text);
            return Err(anyhow!("{}: {} {}", context, status, error_text));
        }

        Ok(response)
    }

    async fn data<T: DeserializeOwned>(response: reqwest::Response, context: &str) -> Result<T> {
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| anyhow!("{}: invalid response: {}", context, e))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl AvatarService for HttpAvatarService {
    async fn create_session(&self, profile: &AvatarProfile) -> Result<SessionInfo> {
        let context = "Failed to create session";
        let response = self.post("new", profile, context).await?;
        let info: SessionInfo = Self::data(response, context).await?;
        debug!("Session {} created with {} ICE servers", info.session_id, info.ice_servers.len());
        Ok(info)
    }

    async fn start_session(&self, session_id: &str, answer: &SessionDescription) -> Result<()> {
        self.post(
            "start",
            &StartRequest {
                session_id,
                sdp: answer,
            },
            "Failed to start stream",
        )
        .await?;
        Ok(())
    }

    async fn submit_ice_candidate(&self, session_id: &str, candidate: &IceCandidate) -> Result<()> {
        self.post(
            "ice",
            &IceRequest {
                session_id,
                candidate,
            },
            "ICE candidate error",
        )
        .await?;
        Ok(())
    }

    async fn speak(&self, session_id: &str, text: &str) -> Result<()> {
        self.post(
            "task",
            &json!({ "session_id": session_id, "text": text }),
            "Failed to send text",
        )
        .await?;
        Ok(())
    }

    async fn end_session(&self, session_id: &str) -> Result<()> {
        self.post("stop", &json!({ "session_id": session_id }), "Failed to close session")
            .await?;
        Ok(())
    }
}
