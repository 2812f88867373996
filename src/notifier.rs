//! Cross-context change notification.
//!
//! Every committed cache write publishes a [`SessionChange`]. Delivery is
//! best-effort: a receiver that falls behind is told how many notices it
//! missed instead of getting them. Consumers treat any notice as "re-read
//! the cache", never as the new state itself.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::session::ChangeReason;

const DEFAULT_CAPACITY: usize = 64;

/// A change committed to the session cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    /// Context that performed the write
    pub origin: String,
    pub reason: ChangeReason,
    /// Cache revision produced by the write
    pub revision: u64,
}

/// What a subscriber callback receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Change(SessionChange),
    /// Notices were dropped; the cache changed at least `skipped` times.
    Lagged { skipped: u64 },
}

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<SessionChange>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, change: SessionChange) {
        // No receivers is fine: nobody is listening yet.
        match self.tx.send(change) {
            Ok(receivers) => debug!(receivers, "Published session change"),
            Err(broadcast::error::SendError(change)) => {
                debug!(revision = change.revision, "Session change published with no subscribers")
            }
        }
    }

    /// Raw receiver for callers that want to drive their own loop.
    pub fn receiver(&self) -> broadcast::Receiver<SessionChange> {
        self.tx.subscribe()
    }

    /// Invoke `callback` for every notice until the returned
    /// [`Subscription`] is unsubscribed or dropped. Must be called from
    /// within a tokio runtime.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Notice) + Send + Sync + 'static,
    {
        let mut rx = self.tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => callback(Notice::Change(change)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Subscriber lagged behind session changes");
                        callback(Notice::Lagged { skipped });
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription {
            handle: Some(handle),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Handle returned by [`Notifier::subscribe`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
