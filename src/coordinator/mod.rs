//! Verification coordinator: the only writer of the session cache.
//!
//! One `Coordinator` per execution context. Within a context, concurrent
//! `verify()` calls share a single in-flight verification. Across contexts
//! the persisted [`VerificationLock`] keeps episodes from overlapping, and
//! its staleness timeout bounds how long a crashed context can block the
//! others.

pub mod refresh;
pub mod transition;

pub use refresh::start_refresh_task;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::SessionCache;
use crate::clock::{Clock, SystemClock};
use crate::config::PolicyConfig;
use crate::notifier::{Notice, Subscription};
use crate::observer::SessionObserver;
use crate::session::{ChangeReason, Session, SessionStatus, User, VerificationFailure};
use crate::storage::{CacheSnapshot, DatabaseError, LockAcquisition, VerificationLock};
use crate::verifier::VerificationClient;

#[derive(Debug, Clone, Error)]
pub enum CoordinatorError {
    #[error("Session cache error: {0}")]
    Cache(Arc<DatabaseError>),
    #[error("Credential must not be empty")]
    EmptyCredential,
    #[error("User record is missing an id or email")]
    InvalidUser,
}

impl From<DatabaseError> for CoordinatorError {
    fn from(e: DatabaseError) -> Self {
        CoordinatorError::Cache(Arc::new(e))
    }
}

/// Where this context's coordinator currently stands. `Idle` means
/// nothing has settled yet: the cache status is still `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Verifying,
    Authenticated,
    Degraded,
    Unauthenticated,
}

impl Phase {
    fn settled(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Authenticated => Phase::Authenticated,
            SessionStatus::Degraded => Phase::Degraded,
            SessionStatus::Unauthenticated => Phase::Unauthenticated,
            SessionStatus::Unknown => Phase::Idle,
        }
    }
}

type PendingVerification = Shared<BoxFuture<'static, Result<Session, CoordinatorError>>>;

struct InFlight {
    epoch: u64,
    future: PendingVerification,
    id: u64,
    started_at: DateTime<Utc>,
}

struct ContextState {
    /// Bumped by login/logout; results from an older epoch carry no authority
    epoch: u64,
    in_flight: Option<InFlight>,
    next_attempt: u64,
    phase: Phase,
}

struct Inner {
    cache: SessionCache,
    client: Arc<dyn VerificationClient>,
    clock: Arc<dyn Clock>,
    context_id: String,
    policy: PolicyConfig,
    state: Mutex<ContextState>,
}

/// Outcome of waiting on another context's verification
enum ForeignAttempt {
    Released,
    Stale,
}

#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(
        cache: SessionCache,
        client: Arc<dyn VerificationClient>,
        policy: PolicyConfig,
        context_id: impl Into<String>,
    ) -> Self {
        Self::with_clock(cache, client, policy, context_id, Arc::new(SystemClock))
    }

    pub fn with_clock(
        cache: SessionCache,
        client: Arc<dyn VerificationClient>,
        policy: PolicyConfig,
        context_id: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let context_id = context_id.into();
        // Start from whatever the cache already settled on
        let phase = match cache.read() {
            Ok(session) => Phase::settled(session.status),
            Err(e) => {
                warn!(context = %context_id, error = %e, "Failed to read cached session");
                Phase::Idle
            }
        };

        Self {
            inner: Arc::new(Inner {
                cache,
                client,
                clock,
                context_id,
                policy,
                state: Mutex::new(ContextState {
                    epoch: 0,
                    in_flight: None,
                    next_attempt: 0,
                    phase,
                }),
            }),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.inner.context_id
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.inner.policy
    }

    pub fn cache(&self) -> &SessionCache {
        &self.inner.cache
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    /// Non-blocking read of the cached session.
    pub fn current(&self) -> Result<Session, CoordinatorError> {
        Ok(self.inner.cache.read()?)
    }

    /// A new observer handle on this context.
    pub fn observer(&self) -> SessionObserver {
        SessionObserver::new(self.clone())
    }

    /// Call `on_change` for every cache change from any context sharing the cache.
    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(Notice) + Send + Sync + 'static,
    {
        self.inner.cache.notifier().subscribe(on_change)
    }

    /// Establish or refresh the session.
    ///
    /// Attaches to a verification already in flight in this context when
    /// there is one. `force` skips the re-check cooldown.
    pub async fn verify(&self, force: bool) -> Result<Session, CoordinatorError> {
        let pending = {
            let now = self.inner.clock.now();
            let stale_after = self.inner.policy.lock_stale_after();
            let mut state = self.inner.state.lock();

            let attachable = state
                .in_flight
                .as_ref()
                .filter(|f| f.epoch == state.epoch && now - f.started_at <= stale_after)
                .map(|f| f.future.clone());

            match attachable {
                Some(future) => {
                    debug!(context = %self.inner.context_id, "Attaching to in-flight verification");
                    future
                }
                None => {
                    state.next_attempt += 1;
                    let id = state.next_attempt;
                    let epoch = state.epoch;
                    let future = Arc::clone(&self.inner)
                        .run_verification(id, epoch, force)
                        .boxed()
                        .shared();
                    state.in_flight = Some(InFlight {
                        epoch,
                        future: future.clone(),
                        id,
                        started_at: now,
                    });
                    future
                }
            }
        };

        pending.await
    }

    /// Adopt a session handed over by a login flow. Valid from any phase;
    /// any verification still in flight is disowned.
    pub fn login(&self, user: User, credential: &str) -> Result<Session, CoordinatorError> {
        if !user.is_valid() {
            return Err(CoordinatorError::InvalidUser);
        }
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(CoordinatorError::EmptyCredential);
        }

        let session = Session::authenticated(user, credential, self.inner.clock.now());
        self.inner.start_epoch(Phase::Authenticated);
        self.inner
            .cache
            .write_login(&session, &self.inner.context_id)?;

        info!(
            context = %self.inner.context_id,
            user_id = %session.user.as_ref().map(|u| u.id.as_str()).unwrap_or_default(),
            "Logged in"
        );
        Ok(session)
    }

    /// Drop identity and credential everywhere. Valid from any phase.
    pub fn logout(&self) -> Result<Session, CoordinatorError> {
        self.inner.start_epoch(Phase::Unauthenticated);
        self.inner
            .cache
            .clear(&self.inner.context_id, ChangeReason::LoggedOut)?;

        info!(context = %self.inner.context_id, "Logged out");
        Ok(Session::signed_out())
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("context_id", &self.inner.context_id)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Inner {
    fn start_epoch(&self, phase: Phase) {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.in_flight = None;
        state.phase = phase;
    }

    fn set_phase(&self, epoch: u64, phase: Phase) {
        let mut state = self.state.lock();
        if state.epoch == epoch {
            state.phase = phase;
        }
    }

    async fn run_verification(
        self: Arc<Self>,
        id: u64,
        epoch: u64,
        force: bool,
    ) -> Result<Session, CoordinatorError> {
        let result = self.verify_once(epoch, force).await;

        let mut state = self.state.lock();
        if state.in_flight.as_ref().is_some_and(|f| f.id == id) {
            state.in_flight = None;
        }
        if state.epoch == epoch {
            state.phase = match &result {
                Ok(session) => Phase::settled(session.status),
                Err(_) => Phase::Idle,
            };
        }
        drop(state);

        result
    }

    async fn verify_once(&self, epoch: u64, force: bool) -> Result<Session, CoordinatorError> {
        let stale_after = self.policy.lock_stale_after();

        loop {
            let now = self.clock.now();
            let CacheSnapshot {
                revision, session, ..
            } = self.cache.snapshot()?;

            let Some(credential) = session.credential.clone().filter(|c| !c.trim().is_empty())
            else {
                match self.settle_without_credential(epoch, session, revision)? {
                    Some(settled) => return Ok(settled),
                    None => continue,
                }
            };

            if !force && self.is_fresh(&session, now) {
                debug!(context = %self.context_id, "Session verified recently; skipping");
                return Ok(session);
            }

            let attempt_id = uuid::Uuid::new_v4().to_string();
            let claim = VerificationLock::new(&attempt_id, &self.context_id, now);

            match self.cache.try_acquire_lock(&claim, now, stale_after)? {
                LockAcquisition::Acquired { overrode_stale } => {
                    if overrode_stale {
                        warn!(context = %self.context_id, "Overriding stale verification lock");
                    }
                    return self.verify_with_lock(epoch, &attempt_id, &credential).await;
                }
                LockAcquisition::Held(lock) => {
                    debug!(
                        context = %self.context_id,
                        holder = %lock.context_id,
                        "Verification running in another context; waiting"
                    );
                    match self.wait_for_foreign(&lock).await? {
                        ForeignAttempt::Released => return Ok(self.cache.read()?),
                        ForeignAttempt::Stale => continue,
                    }
                }
            }
        }
    }

    async fn verify_with_lock(
        &self,
        epoch: u64,
        attempt_id: &str,
        credential: &str,
    ) -> Result<Session, CoordinatorError> {
        self.set_phase(epoch, Phase::Verifying);
        debug!(context = %self.context_id, attempt = %attempt_id, "Verifying session");

        let outcome = self.client.verify(credential).await;
        let now = self.clock.now();

        if self.state.lock().epoch != epoch {
            debug!(context = %self.context_id, "Session changed during verification; discarding result");
            self.cache.release_lock(attempt_id)?;
            return Ok(self.cache.read()?);
        }

        let committed = self
            .cache
            .commit_verification(attempt_id, &self.context_id, |snapshot| {
                transition::decide(&outcome, credential, snapshot, now, &self.policy)
            })?;

        match committed {
            Some((revision, reason)) => log_transition(&self.context_id, revision, reason),
            None => {
                debug!(context = %self.context_id, "Verification lock lost; discarding result")
            }
        }

        Ok(self.cache.read()?)
    }

    /// Nothing to verify: settle on `Unauthenticated` without a network call.
    ///
    /// The write only lands if the cache is still at `revision`. `None` means
    /// another write (a login, usually) got there first and the caller must
    /// re-read.
    fn settle_without_credential(
        &self,
        epoch: u64,
        session: Session,
        revision: u64,
    ) -> Result<Option<Session>, CoordinatorError> {
        if session.status == SessionStatus::Unauthenticated {
            return Ok(Some(session));
        }
        if self.state.lock().epoch != epoch {
            return Ok(Some(self.cache.read()?));
        }

        let session = session.with_status(SessionStatus::Unauthenticated);
        let written = self.cache.write_if_unchanged(
            &session,
            revision,
            &self.context_id,
            ChangeReason::Failed(VerificationFailure::NoCredential),
        )?;

        match written {
            Some(_) => {
                debug!(context = %self.context_id, "No credential; session is unauthenticated");
                Ok(Some(session))
            }
            None => {
                debug!(context = %self.context_id, "Cache changed while settling; re-reading");
                Ok(None)
            }
        }
    }

    /// Confirmed recently enough that an unforced verify may skip the network.
    /// Degraded sessions never qualify.
    fn is_fresh(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.status == SessionStatus::Authenticated
            && session.has_usable_identity()
            && session
                .verified_at
                .is_some_and(|at| now - at < self.policy.recheck_interval())
    }

    /// Wait until another context's lock is released or goes stale.
    async fn wait_for_foreign(
        &self,
        lock: &VerificationLock,
    ) -> Result<ForeignAttempt, CoordinatorError> {
        let mut changes = self.cache.notifier().receiver();
        let stale_after = self.policy.lock_stale_after();
        let poll = self.policy.lock_poll_interval();
        let mut current = Some(lock.clone());

        loop {
            match current {
                Some(lock) if lock.is_held(self.clock.now(), stale_after) => {}
                Some(lock) if lock.active => return Ok(ForeignAttempt::Stale),
                _ => return Ok(ForeignAttempt::Released),
            }

            tokio::select! {
                _ = changes.recv() => {}
                _ = tokio::time::sleep(poll) => {}
            }
            current = self.cache.verification_lock()?;
        }
    }
}

fn log_transition(context: &str, revision: u64, reason: ChangeReason) {
    match reason {
        ChangeReason::Confirmed => debug!(context = %context, revision, "Session confirmed"),
        ChangeReason::Failed(failure) if failure.clears_identity() => {
            info!(context = %context, revision, "Credential rejected twice; session revoked")
        }
        ChangeReason::Failed(failure) => {
            warn!(context = %context, revision, failure = ?failure, "Verification did not confirm session")
        }
        other => debug!(context = %context, revision, reason = ?other, "Session changed"),
    }
}
