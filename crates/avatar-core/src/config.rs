//! ============================================================================
//! Client Configuration - Endpoints and API keys from the environment
//! ============================================================================
//! Binaries call `dotenvy::dotenv()` first so a local `.env` is honoured.
//! ============================================================================

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::auth::DEFAULT_AUTH_API_URL;
use crate::streaming::DEFAULT_AVATAR_API_URL;

pub const DEFAULT_BACKEND_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_SOLANA_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Avatar streaming provider
    pub avatar_api_url: String,
    pub avatar_api_key: Option<String>,
    /// Chat + telemetry backend
    pub backend_api_url: String,
    pub backend_api_key: Option<String>,
    /// Wallet sign-in service
    pub auth_api_url: String,
    /// Speech-to-text
    pub openai_api_key: Option<String>,
    pub rpc_url: String,
    pub db_path: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            avatar_api_url: DEFAULT_AVATAR_API_URL.to_string(),
            avatar_api_key: None,
            backend_api_url: DEFAULT_BACKEND_API_URL.to_string(),
            backend_api_key: None,
            auth_api_url: DEFAULT_AUTH_API_URL.to_string(),
            openai_api_key: None,
            rpc_url: DEFAULT_SOLANA_RPC_URL.to_string(),
            db_path: None,
        }
    }
}

impl ClientConfig {
    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let rpc_url = match (get("SOLANA_RPC_URL"), get("ALCHEMY_API_KEY")) {
            (Some(url), _) => url,
            (None, Some(key)) => format!("https://solana-mainnet.g.alchemy.com/v2/{}", key),
            (None, None) => defaults.rpc_url,
        };

        let config = Self {
            avatar_api_url: get("AVATAR_API_URL").unwrap_or(defaults.avatar_api_url),
            avatar_api_key: get("AVATAR_API_KEY"),
            backend_api_url: get("BACKEND_API_URL").unwrap_or(defaults.backend_api_url),
            backend_api_key: get("BACKEND_API_KEY"),
            auth_api_url: get("AUTH_API_URL").unwrap_or(defaults.auth_api_url),
            openai_api_key: get("OPENAI_API_KEY"),
            rpc_url,
            db_path: get("AVATAR_DB_PATH"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check every endpoint parses as an http(s) URL
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("AVATAR_API_URL", &self.avatar_api_url),
            ("BACKEND_API_URL", &self.backend_api_url),
            ("AUTH_API_URL", &self.auth_api_url),
            ("SOLANA_RPC_URL", &self.rpc_url),
        ] {
            let parsed = url::Url::parse(value)
                .map_err(|e| anyhow!("Invalid {} '{}': {}", name, value, e))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(anyhow!("Invalid {} '{}': expected http(s)", name, value));
            }
        }
        Ok(())
    }

    /// API key for the avatar provider, required before streaming
    pub fn require_avatar_api_key(&self) -> Result<&str> {
        self.avatar_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("AVATAR_API_KEY is not set"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.avatar_api_url, "https://api.heygen.com");
        assert_eq!(config.backend_api_url, "http://localhost:8000");
        assert_eq!(config.auth_api_url, "https://api.singularry.xyz");
        assert_eq!(config.rpc_url, DEFAULT_SOLANA_RPC_URL);
        assert!(config.avatar_api_key.is_none());
        assert!(config.require_avatar_api_key().is_err());
    }

    #[test]
    fn test_alchemy_key_builds_rpc_url() {
        let config = ClientConfig::from_lookup(lookup(&[("ALCHEMY_API_KEY", "k123")])).unwrap();
        assert_eq!(config.rpc_url, "https://solana-mainnet.g.alchemy.com/v2/k123");
    }

    #[test]
    fn test_explicit_rpc_url_wins() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("ALCHEMY_API_KEY", "k123"),
            ("SOLANA_RPC_URL", "https://rpc.example.com"),
        ]))
        .unwrap();
        assert_eq!(config.rpc_url, "https://rpc.example.com");
    }

    #[test]
    fn test_blank_values_ignored() {
        let config = ClientConfig::from_lookup(lookup(&[("AVATAR_API_KEY", "  ")])).unwrap();
        assert!(config.avatar_api_key.is_none());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[("BACKEND_API_URL", "not a url")])).unwrap_err();
        assert!(err.to_string().contains("BACKEND_API_URL"));

        let err = ClientConfig::from_lookup(lookup(&[("AUTH_API_URL", "ftp://auth.example.com")])).unwrap_err();
        assert!(err.to_string().contains("expected http(s)"));
    }
}
