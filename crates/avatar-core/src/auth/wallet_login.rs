//! ============================================================================
//! Wallet Login - Sign-in-with-wallet challenge exchange
//! ============================================================================
//! 1. Request an auth message for the wallet address
//! 2. Sign the message bytes with the wallet
//! 3. Redeem the base58 signature for an access token
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use solana_sdk::signature::{Keypair, Signer};
use tracing::{debug, error, info};

/// Default auth service base URL
pub const DEFAULT_AUTH_API_URL: &str = "https://api.singularry.xyz";

const CHAIN_TYPE: &str = "solana";
const CHAIN_ID: &str = "mainnet";

/// Something that can sign an arbitrary message on behalf of a wallet
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Base58 wallet address
    fn address(&self) -> String;

    /// Raw signature bytes over `message`
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Signer backed by a local Solana keypair
pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Load a keypair from a Solana CLI JSON file (array of 64 bytes)
    pub fn from_file(keypair_path: &str) -> Result<Self> {
        info!("Loading keypair from: {}", keypair_path);

        let keypair_data = std::fs::read_to_string(keypair_path)
            .map_err(|e| anyhow!("Failed to read keypair: {}", e))?;

        let bytes: Vec<u8> = serde_json::from_str(&keypair_data)
            .map_err(|e| anyhow!("Failed to parse keypair: {}", e))?;

        let keypair = Keypair::try_from(bytes.as_slice())
            .map_err(|e| anyhow!("Invalid keypair bytes: {}", e))?;

        info!("Loaded wallet: {}", keypair.pubkey());
        Ok(Self { keypair })
    }
}

#[async_trait]
impl WalletSigner for KeypairSigner {
    fn address(&self) -> String {
        self.keypair.pubkey().to_string()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.keypair.sign_message(message).as_ref().to_vec())
    }
}

#[derive(Serialize)]
struct AuthMessageRequest<'a> {
    wallet_address: &'a str,
    chain_type: &'a str,
    chain_id: &'a str,
}

#[derive(Deserialize)]
struct AuthMessageResponse {
    message: String,
}

#[derive(Serialize)]
struct RedeemRequest<'a> {
    wallet_address: &'a str,
    signature: &'a str,
}

#[derive(Deserialize)]
struct RedeemResponse {
    access_token: String,
}

/// Client for the wallet auth service
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Ask the auth service for a message to sign
    pub async fn request_auth_message(&self, wallet_address: &str) -> Result<String> {
        let url = format!("{}/auth/request_auth_message", self.base_url);
        debug!("Requesting auth message for {}", wallet_address);

        let response = self
            .client
            .post(&url)
            .json(&AuthMessageRequest {
                wallet_address,
                chain_type: CHAIN_TYPE,
                chain_id: CHAIN_ID,
            })
            .send()
            .await
            .map_err(|e| anyhow!("Auth message request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Failed to request auth message: {} - {}", status, error_text);
            return Err(anyhow!("Failed to request auth message ({}): {}", status, error_text));
        }

        let body: AuthMessageResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse auth message: {}", e))?;

        Ok(body.message)
    }

    /// Exchange a base58 signature for an access token
    pub async fn redeem_auth_message(&self, wallet_address: &str, signature: &str) -> Result<String> {
        let url = format!("{}/auth/redeem_auth_message", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&RedeemRequest {
                wallet_address,
                signature,
            })
            .send()
            .await
            .map_err(|e| anyhow!("Redeem request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Failed to redeem signed message: {} - {}", status, error_text);
            return Err(anyhow!("Failed to redeem signed message ({}): {}", status, error_text));
        }

        let body: RedeemResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse redeem response: {}", e))?;

        Ok(body.access_token)
    }

    /// Full challenge / sign / redeem exchange, returns the access token
    pub async fn sign_in(&self, signer: &dyn WalletSigner) -> Result<String> {
        let address = signer.address();
        let message = self.request_auth_message(&address).await?;

        let signature = signer
            .sign_message(message.as_bytes())
            .await
            .map_err(|e| anyhow!("Failed to sign message: {}", e))?;
        let signature = bs58::encode(signature).into_string();

        let token = self.redeem_auth_message(&address, &signature).await?;
        info!("Wallet {} signed in", address);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{request_body, FakeHttp};
    use solana_sdk::signature::Signature;

    #[tokio::test]
    async fn test_keypair_signer_produces_verifiable_signature() {
        let keypair = Keypair::new();
        let pubkey = keypair.pubkey();
        let signer = KeypairSigner::new(keypair);

        assert_eq!(signer.address(), pubkey.to_string());

        let message = b"Sign in to the avatar stream";
        let bytes = signer.sign_message(message).await.unwrap();
        assert_eq!(bytes.len(), 64);

        let signature = Signature::try_from(bytes.as_slice()).unwrap();
        assert!(signature.verify(pubkey.as_ref(), message));
    }

    #[test]
    fn test_keypair_from_file() {
        let keypair = Keypair::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id.json");
        std::fs::write(&path, serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap()).unwrap();

        let signer = KeypairSigner::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(signer.address(), keypair.pubkey().to_string());
    }

    #[test]
    fn test_keypair_from_missing_file() {
        let err = KeypairSigner::from_file("/nonexistent/id.json").err().unwrap();
        assert!(err.to_string().contains("Failed to read keypair"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = AuthClient::new("https://auth.example.com/");
        assert_eq!(client.base_url, "https://auth.example.com");
    }

    #[tokio::test]
    async fn test_sign_in_exchange() {
        let server = FakeHttp::start(
            200,
            r#"{"message":"Sign in to the avatar stream","access_token":"tok-1"}"#,
        )
        .await;
        let keypair = Keypair::new();
        let pubkey = keypair.pubkey();
        let signer = KeypairSigner::new(keypair);

        let token = AuthClient::new(&server.url).sign_in(&signer).await.unwrap();
        assert_eq!(token, "tok-1");

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("POST /auth/request_auth_message "));
        assert_eq!(
            request_body(&requests[0]),
            serde_json::json!({
                "wallet_address": pubkey.to_string(),
                "chain_type": "solana",
                "chain_id": "mainnet",
            })
        );

        assert!(requests[1].starts_with("POST /auth/redeem_auth_message "));
        let redeem = request_body(&requests[1]);
        assert_eq!(redeem["wallet_address"], pubkey.to_string());
        let signature = bs58::decode(redeem["signature"].as_str().unwrap())
            .into_vec()
            .unwrap();
        let signature = Signature::try_from(signature.as_slice()).unwrap();
        assert!(signature.verify(pubkey.as_ref(), b"Sign in to the avatar stream"));
    }

    #[tokio::test]
    async fn test_auth_failure_keeps_body() {
        let server = FakeHttp::start(401, r#"{"error":"unknown wallet"}"#).await;
        let err = AuthClient::new(&server.url)
            .request_auth_message("4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("unknown wallet"));
    }
}
