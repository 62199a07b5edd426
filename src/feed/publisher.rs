// =============================================================================
// Publisher — ordered observer list with per-handler fault isolation
// =============================================================================

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::error;

/// Observer of events of type `E`.
#[async_trait]
pub trait Subscriber<E: Sync>: Send + Sync {
    async fn notify(&self, event: &E) -> Result<()>;
}

/// Adapts a plain synchronous closure into a [`Subscriber`].
pub struct FnSubscriber<F>(pub F);

#[async_trait]
impl<E, F> Subscriber<E> for FnSubscriber<F>
where
    E: Sync,
    F: Fn(&E) -> Result<()> + Send + Sync,
{
    async fn notify(&self, event: &E) -> Result<()> {
        (self.0)(event)
    }
}

/// Ordered list of subscribers for one event kind.
pub struct Publisher<E> {
    name: &'static str,
    subscribers: Vec<Arc<dyn Subscriber<E>>>,
}

impl<E: Sync> Publisher<E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: Vec::new(),
        }
    }

    pub fn add(&mut self, subscriber: Arc<dyn Subscriber<E>>) {
        self.subscribers.push(subscriber);
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Invoke every subscriber in registration order.
    ///
    /// A subscriber that errors or panics is logged and skipped; the rest
    /// still run.  Returns the number of failed subscribers.
    pub async fn publish(&self, event: &E) -> usize {
        let mut failures = 0;
        for (index, subscriber) in self.subscribers.iter().enumerate() {
            match AssertUnwindSafe(subscriber.notify(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    error!(publisher = self.name, index, error = %e, "subscriber failed");
                }
                Err(_) => {
                    failures += 1;
                    error!(publisher = self.name, index, "subscriber panicked");
                }
            }
        }
        failures
    }
}
