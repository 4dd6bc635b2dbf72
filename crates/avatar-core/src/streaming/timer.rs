//! ============================================================================
//! Session Timer - One-second countdown with a single expiry callback
//! ============================================================================

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::debug;

const TICK: Duration = Duration::from_secs(1);

/// Countdown task. Cancelled on `cancel` or drop; `on_expire` runs at most
/// once, only when the countdown reaches zero.
pub struct SessionTimer {
    remaining: watch::Receiver<u32>,
    handle: JoinHandle<()>,
}

impl SessionTimer {
    pub fn start<F>(budget_secs: u32, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, remaining) = watch::channel(budget_secs);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            let mut left = budget_secs;
            while left > 0 {
                ticker.tick().await;
                left -= 1;
                let _ = tx.send(left);
            }
            debug!("Session timer expired after {}s", budget_secs);
            on_expire();
        });

        Self { remaining, handle }
    }

    /// Seconds left
    pub fn remaining(&self) -> u32 {
        *self.remaining.borrow()
    }

    /// Receiver updated every tick; closes when the timer ends or is cancelled
    pub fn subscribe(&self) -> watch::Receiver<u32> {
        self.remaining.clone()
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
