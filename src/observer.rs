//! Read-side handle on a context's session.
//!
//! Observers never write the cache themselves; every mutation goes through
//! the shared [`Coordinator`]. Each observer owns its own broadcast receiver,
//! so observers created at any time converge on the cached state.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::coordinator::{Coordinator, CoordinatorError};
use crate::notifier::{Notice, SessionChange, Subscription};
use crate::session::{Session, User};

pub struct SessionObserver {
    changes: broadcast::Receiver<SessionChange>,
    coordinator: Coordinator,
}

impl SessionObserver {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            changes: coordinator.cache().notifier().receiver(),
            coordinator,
        }
    }

    pub fn current(&self) -> Result<Session, CoordinatorError> {
        self.coordinator.current()
    }

    pub async fn verify(&self, force: bool) -> Result<Session, CoordinatorError> {
        self.coordinator.verify(force).await
    }

    pub fn login(&self, user: User, credential: &str) -> Result<Session, CoordinatorError> {
        self.coordinator.login(user, credential)
    }

    pub fn logout(&self) -> Result<Session, CoordinatorError> {
        self.coordinator.logout()
    }

    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(Notice) + Send + Sync + 'static,
    {
        self.coordinator.subscribe(on_change)
    }

    /// A fresh receiver of raw change notices
    pub fn changes(&self) -> broadcast::Receiver<SessionChange> {
        self.coordinator.cache().notifier().receiver()
    }

    /// True once the session has settled as signed out.
    pub fn requires_login(&self) -> Result<bool, CoordinatorError> {
        Ok(self.current()?.requires_login())
    }

    /// Wait for the next change in any context, then re-read the cache.
    ///
    /// A lagged receiver still returns the current state: the notice only
    /// says that something changed.
    pub async fn changed(&mut self) -> Result<Session, CoordinatorError> {
        if let Err(RecvError::Lagged(skipped)) = self.changes.recv().await {
            debug!(skipped, "Observer lagged behind session changes");
        }
        self.current()
    }
}

impl Clone for SessionObserver {
    fn clone(&self) -> Self {
        Self::new(self.coordinator.clone())
    }
}

impl std::fmt::Debug for SessionObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionObserver")
            .field("context_id", &self.coordinator.context_id())
            .finish()
    }
}
