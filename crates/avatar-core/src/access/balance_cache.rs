//! ============================================================================
//! Token Balance Cache - Short-TTL cache in front of the balance checker
//! ============================================================================
//! Keyed by wallet address. Failed lookups are cached too and retried on
//! access until MAX_ERROR_ATTEMPTS, after which the cached error is served
//! until the entry expires. A sweeper task evicts expired entries.
//! ============================================================================

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::checker::{BalanceChecker, BalanceSource};
use super::types::{BalanceError, TokenBalance};
use crate::cache::TtlCache;

/// Balance cache lifetime (30 seconds)
pub const BALANCE_CACHE_TTL: Duration = Duration::from_secs(30);

/// Failed lookups per entry before the error is served from cache
pub const MAX_ERROR_ATTEMPTS: u32 = 3;

/// Sweep interval for expired entries
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct BalanceRecord {
    result: Result<TokenBalance, BalanceError>,
    attempts: u32,
}

/// Cached balance lookups
pub struct TokenBalanceCache {
    checker: Arc<dyn BalanceSource>,
    entries: TtlCache<BalanceRecord>,
    ttl: Duration,
}

impl TokenBalanceCache {
    pub fn new(checker: BalanceChecker) -> Self {
        Self::with_source(Arc::new(checker), BALANCE_CACHE_TTL)
    }

    pub fn with_source(checker: Arc<dyn BalanceSource>, ttl: Duration) -> Self {
        Self {
            checker,
            entries: TtlCache::new(),
            ttl,
        }
    }

    /// Cached balance for `address`
    pub async fn get(&self, address: &str) -> Result<TokenBalance, BalanceError> {
        if let Some(cached) = self.entries.get(address) {
            match &cached.result {
                Ok(balance) => {
                    debug!("Balance cache hit for {}", address);
                    return Ok(*balance);
                }
                Err(e) if cached.attempts >= MAX_ERROR_ATTEMPTS => {
                    debug!(
                        "Serving cached balance error for {} ({} attempts)",
                        address, cached.attempts
                    );
                    return Err(e.clone());
                }
                Err(_) => return self.refresh(address, cached.attempts).await,
            }
        }

        self.refresh(address, 0).await
    }

    async fn refresh(&self, address: &str, prior_attempts: u32) -> Result<TokenBalance, BalanceError> {
        let result = self.checker.token_balance(address).await;
        let attempts = if result.is_ok() { 0 } else { prior_attempts + 1 };

        self.entries.set(
            address,
            BalanceRecord {
                result: result.clone(),
                attempts,
            },
            self.ttl,
        );

        result
    }

    /// Forget one wallet (e.g. after a transfer)
    pub fn invalidate(&self, address: &str) {
        self.entries.invalidate(address);
    }

    /// Evict entries older than the TTL
    pub fn sweep(&self) -> usize {
        let evicted = self.entries.evict_expired();
        if evicted > 0 {
            debug!("Evicted {} expired balance entries", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodically sweep expired entries until the cache is dropped
    /// or the returned handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        info!("Starting balance cache sweeper (every {:?})", every);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => {
                        cache.sweep();
                    }
                    None => break,
                }
            }
        })
    }
}

#[async_trait]
impl BalanceSource for TokenBalanceCache {
    async fn token_balance(&self, address: &str) -> Result<TokenBalance, BalanceError> {
        self.get(address).await
    }
}
