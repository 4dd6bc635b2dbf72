//! ============================================================================
//! Access Gate - Wallet + credential + balance state machine
//! ============================================================================
//! Disconnected -> AwaitingAuthentication -> CheckingBalance -> Granted/Denied
//!
//! Every wallet address change resets authentication and the balance latch.
//! The balance latch makes `check_balance` one-shot per authentication.
//! ============================================================================

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::checker::BalanceSource;
use super::types::{decide, AccessState, DenyReason, REQUIRED_TOKEN_AMOUNT};
use crate::auth::{AuthClient, CredentialStore, StoredCredential, WalletSigner};

/// Decides whether the connected wallet may enter the stream
pub struct AccessGate {
    balances: Arc<dyn BalanceSource>,
    credentials: Arc<dyn CredentialStore>,
    required_amount: f64,
    wallet: Option<String>,
    authenticated: bool,
    balance_checked: bool,
    state: AccessState,
}

impl AccessGate {
    pub fn new(balances: Arc<dyn BalanceSource>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            balances,
            credentials,
            required_amount: REQUIRED_TOKEN_AMOUNT,
            wallet: None,
            authenticated: false,
            balance_checked: false,
            state: AccessState::Disconnected,
        }
    }

    pub fn with_required_amount(mut self, required_amount: f64) -> Self {
        self.required_amount = required_amount;
        self
    }

    pub fn state(&self) -> &AccessState {
        &self.state
    }

    pub fn wallet(&self) -> Option<&str> {
        self.wallet.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn set_state(&mut self, state: AccessState) {
        if self.state != state {
            debug!("Access state: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// A wallet connected (or switched accounts)
    pub fn wallet_connected(&mut self, address: &str) -> Result<&AccessState> {
        if self.wallet.as_deref() != Some(address) {
            self.authenticated = false;
            self.balance_checked = false;
            self.wallet = Some(address.to_string());
        }

        match self.credentials.load()? {
            Some(credential) if credential.matches(address) => {
                // Latch re-arms only when authentication flips on
                if !self.authenticated {
                    debug!("Found stored credential for {}", address);
                    self.authenticated = true;
                    self.balance_checked = false;
                    self.set_state(AccessState::CheckingBalance);
                }
            }
            Some(credential) => {
                info!(
                    "Stored credential belongs to {}, purging for {}",
                    credential.wallet_address, address
                );
                self.credentials.clear()?;
                self.authenticated = false;
                self.set_state(AccessState::AwaitingAuthentication);
            }
            None => {
                self.authenticated = false;
                self.set_state(AccessState::AwaitingAuthentication);
            }
        }

        Ok(&self.state)
    }

    /// The wallet disconnected: forget everything, including the stored token
    pub fn wallet_disconnected(&mut self) -> Result<()> {
        if let Some(wallet) = self.wallet.take() {
            info!("Wallet {} disconnected", wallet);
        }
        self.authenticated = false;
        self.balance_checked = false;
        self.set_state(AccessState::Disconnected);
        self.credentials.clear()
    }

    /// Record a redeemed access token for the connected wallet
    pub fn complete_login(&mut self, access_token: &str) -> Result<()> {
        let wallet = self
            .wallet
            .clone()
            .ok_or_else(|| anyhow!("Cannot complete login without a connected wallet"))?;

        self.credentials
            .save(&StoredCredential::new(access_token, wallet.as_str()))?;

        info!("Wallet {} authenticated", wallet);
        self.authenticated = true;
        self.balance_checked = false;
        self.set_state(AccessState::CheckingBalance);
        Ok(())
    }

    /// Run the wallet signature exchange, then `complete_login`
    pub async fn login(&mut self, auth: &AuthClient, signer: &dyn WalletSigner) -> Result<()> {
        let wallet = self
            .wallet
            .clone()
            .ok_or_else(|| anyhow!("Connect a wallet before signing in"))?;

        if signer.address() != wallet {
            return Err(anyhow!(
                "Signer {} does not match connected wallet {}",
                signer.address(),
                wallet
            ));
        }

        let token = auth.sign_in(signer).await?;
        self.complete_login(&token)
    }

    /// One balance check per authentication. Repeated calls return the
    /// current state without querying again.
    pub async fn check_balance(&mut self) -> &AccessState {
        let wallet = match (&self.wallet, self.authenticated) {
            (Some(wallet), true) => wallet.clone(),
            _ => return &self.state,
        };
        if self.balance_checked {
            return &self.state;
        }

        self.balance_checked = true;
        self.set_state(AccessState::CheckingBalance);

        let result = self.balances.token_balance(&wallet).await;

        // The wallet may have changed while the lookup was in flight
        if self.wallet.as_deref() != Some(wallet.as_str()) || !self.authenticated {
            return &self.state;
        }

        let next = match result {
            Ok(balance) => match decide(&balance, self.required_amount) {
                Ok(balance) => {
                    info!("Access granted for {} (balance {})", wallet, balance);
                    AccessState::Granted { balance }
                }
                Err(reason) => {
                    info!("Access denied for {}: {}", wallet, reason.message());
                    AccessState::Denied { reason }
                }
            },
            Err(e) => {
                warn!("Balance check failed for {}: {}", wallet, e);
                AccessState::Denied {
                    reason: DenyReason::CheckFailed {
                        message: e.to_string(),
                    },
                }
            }
        };

        self.set_state(next);
        &self.state
    }

    /// Re-arm the balance latch and check again (user-initiated retry)
    pub async fn recheck_balance(&mut self) -> &AccessState {
        self.balance_checked = false;
        self.check_balance().await
    }

    /// Recompute the decision from the current inputs
    pub async fn evaluate(&mut self) -> &AccessState {
        if self.wallet.is_none() {
            self.set_state(AccessState::Disconnected);
        } else if !self.authenticated {
            self.set_state(AccessState::AwaitingAuthentication);
        } else {
            return self.check_balance().await;
        }
        &self.state
    }
}
