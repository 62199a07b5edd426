// =============================================================================
// Rate Limiter — one external call at a time, spaced by a minimum interval
// =============================================================================
//
// The turn is an owned async mutex guard over the start instant of the
// previous call.  It is held for the whole request, so requests never
// overlap and consecutive starts are at least `min_interval` apart.  Being
// owned, it can move into the task that performs the request and outlive
// the caller that acquired it.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

pub struct RateLimiter {
    min_interval: Duration,
    last_start: Arc<Mutex<Option<Instant>>>,
}

/// Exclusive right to issue one request.  Dropping it hands the turn on.
pub struct Turn {
    _guard: OwnedMutexGuard<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_start: Arc::new(Mutex::new(None)),
        }
    }

    /// Wait for the previous holder to finish and for the interval to pass.
    pub async fn acquire(&self) -> Turn {
        let mut last = self.last_start.clone().lock_owned().await;
        if let Some(prev) = *last {
            let ready = prev + self.min_interval;
            if ready > Instant::now() {
                debug!(wait_ms = (ready - Instant::now()).as_millis() as u64, "validator throttled");
                tokio::time::sleep_until(ready).await;
            }
        }
        *last = Some(Instant::now());
        Turn { _guard: last }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .finish()
    }
}
