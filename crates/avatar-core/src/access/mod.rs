//! ============================================================================
//! Access Module - Token-gated entry to the avatar stream
//! ============================================================================
//! A connected, signed-in wallet holding at least REQUIRED_TOKEN_AMOUNT of
//! the gated mint is granted access.
//!
//! ## Usage
//! ```rust,ignore
//! use avatar_core::access::{AccessGate, BalanceChecker, TokenBalanceCache};
//!
//! let cache = Arc::new(TokenBalanceCache::new(BalanceChecker::new(rpc_url)?));
//! let mut gate = AccessGate::new(cache, credentials);
//! gate.wallet_connected(&address)?;
//! let state = gate.evaluate().await;
//! ```
//! ============================================================================

mod balance_cache;
mod checker;
mod gate;
mod types;

pub use balance_cache::{TokenBalanceCache, BALANCE_CACHE_TTL, MAX_ERROR_ATTEMPTS, SWEEP_INTERVAL};
pub use checker::{BalanceChecker, BalanceSource, RpcLedger, TokenLedger};
pub use gate::AccessGate;
pub use types::{
    decide, AccessState, BalanceError, DenyReason, TokenBalance, REQUIRED_TOKEN_AMOUNT, TOKEN_MINT,
};
