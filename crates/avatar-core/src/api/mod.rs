//! ============================================================================
//! Backend API Client - Chat completions and agent telemetry
//! ============================================================================
//! All requests carry the `X-API-Key` header. Telemetry reads are cached
//! per instance with stale-while-revalidate; chat is never cached.
//! ============================================================================

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::cache::{get_or_revalidate, TtlCache};
use crate::types::{ChatMessage, PromptType};

/// Agent stats cache lifetime (2 minutes)
pub const AGENT_STATS_TTL: Duration = Duration::from_secs(120);
/// System messages cache lifetime (5 minutes)
pub const SYSTEM_MESSAGES_TTL: Duration = Duration::from_secs(300);
/// Consciousness log cache lifetime (5 minutes)
pub const CONSCIOUSNESS_LOG_TTL: Duration = Duration::from_secs(300);
/// Fraction of the TTL after which a background refresh starts
pub const REFRESH_THRESHOLD: f64 = 0.8;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum ApiError {
    #[error("API key not configured")]
    MissingApiKey,

    /// Non-2xx response, body kept verbatim
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API request failed: {0}")]
    Request(String),

    #[error("Invalid API response: {0}")]
    Decode(String),
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub token: String,
    pub amount: String,
    pub wallet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentStats {
    pub followers: u64,
    pub tools: Vec<String>,
    pub holdings: Vec<Holding>,
}

/// Entries are passed through as-is; the backend owns their shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SystemMessagesPage {
    pub messages: Vec<Value>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConsciousnessLogPage {
    pub thoughts: Vec<Value>,
    pub total: u64,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
    prompt_type: PromptType,
}

#[derive(Deserialize)]
struct ChatResponse {
    response: String,
}

#[derive(Deserialize)]
struct StreamingTokenResponse {
    token: String,
}

// ============================================================================
// Chat seam
// ============================================================================

/// Source of chat replies for the avatar
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send_chat_message(
        &self,
        messages: &[ChatMessage],
        prompt_type: PromptType,
    ) -> Result<String, ApiError>;
}

// ============================================================================
// Client
// ============================================================================

/// Backend API client with its own response cache
#[derive(Clone)]
pub struct BackendApi {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    cache: Arc<TtlCache<Value>>,
}

impl BackendApi {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            cache: Arc::new(TtlCache::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Drop one cached response
    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(key);
    }

    async fn request_json(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let api_key = self.api_key.as_deref().ok_or(ApiError::MissingApiKey)?;
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method, &url)
            .header("X-API-Key", api_key)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!("API error {} from {}: {}", status, url, body);
            return Err(ApiError::Status { status, body });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn cached_get<T: DeserializeOwned>(
        &self,
        key: &str,
        endpoint: String,
        ttl: Duration,
    ) -> Result<T, ApiError> {
        let api = self.clone();
        let value = get_or_revalidate(&self.cache, key, ttl, REFRESH_THRESHOLD, move || {
            let api = api.clone();
            let endpoint = endpoint.clone();
            async move { api.request_json(Method::GET, &endpoint, None).await }
        })
        .await?;

        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Chat completion, never cached
    pub async fn send_chat_message(
        &self,
        messages: &[ChatMessage],
        prompt_type: PromptType,
    ) -> Result<String, ApiError> {
        let body = serde_json::to_value(ChatRequest {
            messages,
            prompt_type,
        })
        .map_err(|e| ApiError::Decode(e.to_string()))?;

        let value = self.request_json(Method::POST, "/api/chat", Some(body)).await?;
        let reply: ChatResponse =
            serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(reply.response)
    }

    /// Short-lived token for the streaming provider
    pub async fn get_streaming_token(&self) -> Result<String, ApiError> {
        let value = self
            .request_json(Method::POST, "/api/streaming/token", None)
            .await?;
        let token: StreamingTokenResponse =
            serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(token.token)
    }

    pub async fn get_agent_stats(&self) -> Result<AgentStats, ApiError> {
        self.cached_get("agent-stats", "/api/agent-stats".to_string(), AGENT_STATS_TTL)
            .await
    }

    pub async fn get_system_messages(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<SystemMessagesPage, ApiError> {
        self.cached_get(
            &format!("system-messages-{}-{}", page, per_page),
            format!("/api/system-messages?page={}&per_page={}", page, per_page),
            SYSTEM_MESSAGES_TTL,
        )
        .await
    }

    pub async fn get_consciousness_log(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<ConsciousnessLogPage, ApiError> {
        self.cached_get(
            &format!("consciousness-log-{}-{}", page, per_page),
            format!("/api/consciousness-log?page={}&per_page={}", page, per_page),
            CONSCIOUSNESS_LOG_TTL,
        )
        .await
    }
}

#[async_trait]
impl ChatBackend for BackendApi {
    async fn send_chat_message(
        &self,
        messages: &[ChatMessage],
        prompt_type: PromptType,
    ) -> Result<String, ApiError> {
        BackendApi::send_chat_message(self, messages, prompt_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{has_header, request_body, FakeHttp};

    #[tokio::test]
    async fn test_missing_api_key() {
        let api = BackendApi::new("http://127.0.0.1:9", None);
        let err = api.get_agent_stats().await.unwrap_err();
        assert_eq!(err, ApiError::MissingApiKey);
    }

    #[tokio::test]
    async fn test_chat_request_shape() {
        let backend = FakeHttp::start(200, r#"{"response":"hi there"}"#).await;
        let api = BackendApi::new(&backend.url, Some("secret".into()));

        let reply = api
            .send_chat_message(&[ChatMessage::user("hello")], PromptType::Video)
            .await
            .unwrap();
        assert_eq!(reply, "hi there");

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert!(request.starts_with("POST /api/chat "));
        assert!(has_header(request, "X-API-Key", "secret"));

        assert_eq!(
            request_body(request),
            serde_json::json!({
                "messages": [{"role": "user", "content": "hello"}],
                "prompt_type": "video"
            })
        );
    }

    #[tokio::test]
    async fn test_chat_is_not_cached() {
        let backend = FakeHttp::start(200, r#"{"response":"ok"}"#).await;
        let api = BackendApi::new(&backend.url, Some("k".into()));

        for _ in 0..2 {
            api.send_chat_message(&[ChatMessage::user("x")], PromptType::Text)
                .await
                .unwrap();
        }
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_non_success_status_keeps_body() {
        let backend = FakeHttp::start(503, r#"{"detail":"overloaded"}"#).await;
        let api = BackendApi::new(&backend.url, Some("k".into()));

        let err = api.get_streaming_token().await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Status {
                status: 503,
                body: r#"{"detail":"overloaded"}"#.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_agent_stats_cached_within_ttl() {
        let backend = FakeHttp::start(
            200,
            r#"{"followers":3,"tools":["X.exe"],"holdings":[{"token":"SOL","amount":"1.3","wallet":"DxR7"}]}"#,
        )
        .await;
        let api = BackendApi::new(&backend.url, Some("k".into()));

        let stats = api.get_agent_stats().await.unwrap();
        assert_eq!(stats.followers, 3);
        assert_eq!(stats.holdings[0].token, "SOL");

        let again = api.get_agent_stats().await.unwrap();
        assert_eq!(again, stats);
        assert_eq!(backend.requests().len(), 1);
        assert!(backend.requests()[0].starts_with("GET /api/agent-stats "));
    }

    #[tokio::test]
    async fn test_paged_reads_keyed_by_page() {
        let backend = FakeHttp::start(200, r#"{"messages":[{"id":1}],"total":1}"#).await;
        let api = BackendApi::new(&backend.url, Some("k".into()));

        api.get_system_messages(1, 10).await.unwrap();
        api.get_system_messages(1, 10).await.unwrap();
        let page = api.get_system_messages(2, 10).await.unwrap();
        assert_eq!(page.total, 1);

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].starts_with("GET /api/system-messages?page=2&per_page=10 "));

        api.invalidate("system-messages-1-10");
        api.get_system_messages(1, 10).await.unwrap();
        assert_eq!(backend.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_consciousness_log_decodes_thoughts() {
        let backend = FakeHttp::start(200, r#"{"thoughts":["a","b"],"total":2}"#).await;
        let api = BackendApi::new(&backend.url, Some("k".into()));

        let log = api.get_consciousness_log(1, 20).await.unwrap();
        assert_eq!(log.thoughts.len(), 2);
        assert!(backend.requests()[0].starts_with("GET /api/consciousness-log?page=1&per_page=20 "));
    }
}
