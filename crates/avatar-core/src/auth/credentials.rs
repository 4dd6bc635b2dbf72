//! ============================================================================
//! Credential Store - Signed access token keyed by wallet address
//! ============================================================================
//! Holds one record: the access token redeemed for a signed challenge and
//! the wallet address that signed it. No logic beyond presence/match checks.
//! ============================================================================

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Fixed name of the persisted credential record
pub const CREDENTIAL_RECORD: &str = "wallet_data";

/// Access token plus the wallet it was issued to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub token: String,
    pub wallet_address: String,
    /// Unix seconds when the credential was stored
    pub saved_at: i64,
}

impl StoredCredential {
    pub fn new(token: impl Into<String>, wallet_address: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            wallet_address: wallet_address.into(),
            saved_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Exact string match against the connected wallet
    pub fn matches(&self, wallet_address: &str) -> bool {
        self.wallet_address == wallet_address
    }
}

/// Persistence for the single credential record
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredCredential>>;
    fn save(&self, credential: &StoredCredential) -> Result<()>;
    fn clear(&self) -> Result<()>;

    /// Stored credential only if it belongs to `wallet_address`
    fn load_for(&self, wallet_address: &str) -> Result<Option<StoredCredential>> {
        Ok(self.load()?.filter(|c| c.matches(wallet_address)))
    }
}

/// Process-local store (tests, ephemeral hosts)
#[derive(Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<StoredCredential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<StoredCredential>> {
        Ok(self.record.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, credential: &StoredCredential) -> Result<()> {
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_is_exact() {
        let cred = StoredCredential::new("abc", "WalletA");
        assert!(cred.matches("WalletA"));
        assert!(!cred.matches("walleta"));
        assert!(!cred.matches("WalletA "));
    }

    #[test]
    fn test_memory_store_roundtrip_and_clear() {
        let store = MemoryCredentialStore::new();
        assert!(store.load().unwrap().is_none());

        store.save(&StoredCredential::new("abc", "WalletA")).unwrap();
        assert_eq!(store.load().unwrap().unwrap().token, "abc");
        assert!(store.load_for("WalletA").unwrap().is_some());
        assert!(store.load_for("WalletB").unwrap().is_none());

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
