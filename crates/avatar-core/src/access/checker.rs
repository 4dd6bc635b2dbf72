//! ============================================================================
//! Balance Checker - Gated token balance lookup
//! ============================================================================
//! Derives the wallet's associated token account for the gated mint and
//! queries its balance from Solana RPC, retrying transient failures.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{BalanceError, TokenBalance, TOKEN_MINT};
use crate::retry::{retry_with_backoff, RetryConfig};

/// Read-only ledger queries needed for token gating
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// UI amount held by a token account
    async fn token_account_balance(&self, token_account: &Pubkey) -> Result<f64>;
}

/// Anything that can answer "what does this wallet hold?"
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn token_balance(&self, address: &str) -> Result<TokenBalance, BalanceError>;
}

/// Solana JSON-RPC ledger
pub struct RpcLedger {
    rpc_client: RpcClient,
}

impl RpcLedger {
    pub fn new(rpc_url: &str) -> Self {
        Self {
            rpc_client: RpcClient::new_with_commitment(
                rpc_url.to_string(),
                CommitmentConfig::confirmed(),
            ),
        }
    }
}

#[async_trait]
impl TokenLedger for RpcLedger {
    async fn token_account_balance(&self, token_account: &Pubkey) -> Result<f64> {
        let balance = self
            .rpc_client
            .get_token_account_balance(token_account)
            .await
            .map_err(|e| anyhow!("{}", e))?;

        let raw = balance
            .amount
            .parse::<u64>()
            .map_err(|e| anyhow!("Malformed token amount '{}': {}", balance.amount, e))?;

        Ok(spl_token::amount_to_ui_amount(raw, balance.decimals))
    }
}

/// Ledger errors that mean "this wallet holds nothing", not "the check failed"
fn is_empty_account_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    lower.contains("could not find account") || lower.contains("failed to get token account balance")
}

/// Checks the gated token balance of a wallet
pub struct BalanceChecker {
    ledger: Arc<dyn TokenLedger>,
    token_mint: Pubkey,
    retry: RetryConfig,
}

impl BalanceChecker {
    /// Checker against a Solana RPC endpoint
    pub fn new(rpc_url: &str) -> Result<Self> {
        Self::with_ledger(Arc::new(RpcLedger::new(rpc_url)))
    }

    /// Checker against any ledger implementation
    pub fn with_ledger(ledger: Arc<dyn TokenLedger>) -> Result<Self> {
        let token_mint = Pubkey::from_str(TOKEN_MINT)
            .map_err(|e| anyhow!("Invalid token mint address: {}", e))?;

        Ok(Self {
            ledger,
            token_mint,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn token_mint(&self) -> &Pubkey {
        &self.token_mint
    }

    /// Associated token account of `wallet` for the gated mint
    pub fn token_account(&self, wallet: &Pubkey) -> Pubkey {
        get_associated_token_address(wallet, &self.token_mint)
    }

    /// Get the gated token balance for a wallet address.
    /// A missing token account is a valid zero balance.
    pub async fn check_token_balance(&self, address: &str) -> Result<TokenBalance, BalanceError> {
        let wallet = Pubkey::from_str(address)
            .map_err(|e| BalanceError::InvalidAddress(format!("{}: {}", address, e)))?;
        let ata = self.token_account(&wallet);

        debug!("Checking token balance for wallet {} at ATA {}", wallet, ata);

        let ledger = Arc::clone(&self.ledger);
        let result = retry_with_backoff(&self.retry, "Token balance lookup", || {
            let ledger = Arc::clone(&ledger);
            async move {
                match ledger.token_account_balance(&ata).await {
                    Ok(amount) => Ok(TokenBalance::from_amount(amount)),
                    Err(e) if is_empty_account_error(&e.to_string()) => {
                        debug!("No token account for {} - assuming 0: {}", ata, e);
                        Ok(TokenBalance::zero())
                    }
                    Err(e) => Err(e),
                }
            }
        })
        .await;

        match result {
            Ok(balance) => {
                debug!("Token balance for {}: {}", wallet, balance.balance);
                Ok(balance)
            }
            Err(e) => {
                warn!("Failed to check token balance for {}: {}", wallet, e);
                Err(BalanceError::CheckFailed(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl BalanceSource for BalanceChecker {
    async fn token_balance(&self, address: &str) -> Result<TokenBalance, BalanceError> {
        self.check_token_balance(address).await
    }
}
