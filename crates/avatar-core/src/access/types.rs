//! ============================================================================
//! Access Types - Token balances, denial reasons and gate states
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Token mint whose holders may enter the avatar stream
pub const TOKEN_MINT: &str = "HwKE9CPg9Z9WzAeQSj6jeLBizK7LJs5m6LTVx6pLpump";

/// Minimum UI amount of the gated token required for access
pub const REQUIRED_TOKEN_AMOUNT: f64 = 1.0;

/// Balance of the gated token held by one wallet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TokenBalance {
    pub has_token: bool,
    /// UI amount (raw amount scaled by the mint decimals)
    pub balance: f64,
}

impl TokenBalance {
    pub fn from_amount(balance: f64) -> Self {
        Self {
            has_token: balance > 0.0,
            balance,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// Errors from the balance oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum BalanceError {
    /// Malformed wallet address, never retried
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    /// Network / infrastructure failure after retries
    #[error("Token balance check failed: {0}")]
    CheckFailed(String),
}

/// Why the gate refused access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenyReason {
    NoToken,
    InsufficientBalance { required: f64, balance: f64 },
    CheckFailed { message: String },
}

impl DenyReason {
    /// User-facing explanation
    pub fn message(&self) -> String {
        match self {
            DenyReason::NoToken => "You don't have the required token in your wallet.".to_string(),
            DenyReason::InsufficientBalance { required, balance } => format!(
                "You need at least {} tokens to access this feature. Current balance: {}",
                required, balance
            ),
            DenyReason::CheckFailed { .. } => {
                "Failed to verify token balance. Please try again.".to_string()
            }
        }
    }
}

/// Decide access from a balance result
pub fn decide(balance: &TokenBalance, required: f64) -> Result<f64, DenyReason> {
    if !balance.has_token {
        Err(DenyReason::NoToken)
    } else if balance.balance < required {
        Err(DenyReason::InsufficientBalance {
            required,
            balance: balance.balance,
        })
    } else {
        Ok(balance.balance)
    }
}

/// States of the access gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AccessState {
    #[default]
    Disconnected,
    AwaitingAuthentication,
    CheckingBalance,
    Denied { reason: DenyReason },
    Granted { balance: f64 },
}

impl AccessState {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessState::Granted { .. })
    }
}
