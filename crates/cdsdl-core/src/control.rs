//! Run cancellation: a shared abort token checked by the driver and by every
//! transfer's write loop.
//!
//! The CLI flips the token from its Ctrl-C handler; in-flight transfers stop
//! at their next chunk, the driver releases every lease it holds and returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Error reported when a run or transfer is stopped by the user.
#[derive(Debug)]
pub struct RunAborted;

impl std::fmt::Display for RunAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run interrupted by user")
    }
}

impl std::error::Error for RunAborted {}

/// Cloneable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Err(RunAborted)` once cancelled; for use with `?` in blocking code.
    pub fn check(&self) -> Result<(), RunAborted> {
        if self.is_cancelled() {
            Err(RunAborted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early on cancellation.
    /// Returns false if the token was cancelled.
    pub async fn sleep(&self, duration: Duration) -> bool {
        const TICK: Duration = Duration::from_millis(100);
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(TICK)).await;
        }
    }
}
