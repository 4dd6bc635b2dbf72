//! ============================================================================
//! Auth Module - Wallet sign-in and credential persistence
//! ============================================================================
//! - Challenge/sign/redeem login against the auth service
//! - Stored access token keyed by wallet address
//! ============================================================================

mod credentials;
mod wallet_login;

pub use credentials::{CredentialStore, MemoryCredentialStore, StoredCredential, CREDENTIAL_RECORD};
pub use wallet_login::{AuthClient, KeypairSigner, WalletSigner, DEFAULT_AUTH_API_URL};
