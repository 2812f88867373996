//! Helpers shared by the integration test binaries

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use session_coordinator::clock::ManualClock;
use session_coordinator::config::PolicyConfig;
use session_coordinator::{
    ChangeReason, Coordinator, Session, SessionCache, User, VerificationClient,
    VerificationOutcome,
};

/// Verification client that replays scripted outcomes and counts calls.
///
/// When gated, calls block until [`StubVerifier::release`] hands out a
/// permit, so tests can hold a verification in flight. Only the first
/// `gated_calls` calls wait; later ones answer immediately.
#[derive(Debug)]
pub struct StubVerifier {
    calls: AtomicUsize,
    fallback: Mutex<VerificationOutcome>,
    gate: Option<Semaphore>,
    gated_calls: usize,
    script: Mutex<VecDeque<VerificationOutcome>>,
}

impl StubVerifier {
    pub fn new(fallback: VerificationOutcome) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fallback: Mutex::new(fallback),
            gate: None,
            gated_calls: 0,
            script: Mutex::new(VecDeque::new()),
        })
    }

    pub fn gated(fallback: VerificationOutcome) -> Arc<Self> {
        Self::gated_first(usize::MAX, fallback)
    }

    /// Hold only the first `calls` verifications at the gate
    pub fn gated_first(calls: usize, fallback: VerificationOutcome) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fallback: Mutex::new(fallback),
            gate: Some(Semaphore::new(0)),
            gated_calls: calls,
            script: Mutex::new(VecDeque::new()),
        })
    }

    pub fn confirming(id: &str, email: &str) -> Arc<Self> {
        Self::new(VerificationOutcome::Confirmed(User::new(id, email)))
    }

    /// Queue an outcome ahead of the fallback
    pub fn push(&self, outcome: VerificationOutcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn set_fallback(&self, outcome: VerificationOutcome) {
        *self.fallback.lock() = outcome;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release(&self, responses: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(responses);
        }
    }

    /// Wait (bounded) until at least `n` calls have reached the client
    pub async fn wait_for_calls(&self, n: usize) {
        for _ in 0..500 {
            if self.calls() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("expected {n} verification calls, saw {}", self.calls());
    }
}

#[async_trait]
impl VerificationClient for StubVerifier {
    async fn verify(&self, _credential: &str) -> VerificationOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = self.gate.as_ref().filter(|_| call < self.gated_calls) {
            gate.acquire().await.unwrap().forget();
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.lock().clone())
    }
}

/// Shared cache in a temporary directory. Keep the `TempDir` alive.
pub fn setup_cache() -> (SessionCache, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let cache = SessionCache::open(temp_dir.path()).unwrap();
    (cache, temp_dir)
}

pub fn test_policy() -> PolicyConfig {
    PolicyConfig {
        lock_poll_interval_ms: 10,
        lock_stale_after_ms: 5_000,
        recheck_interval_ms: 60_000,
        refresh_interval_ms: 0,
        rejection_window_ms: 10_000,
    }
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc::now()))
}

pub fn context(
    cache: &SessionCache,
    client: Arc<StubVerifier>,
    clock: Arc<ManualClock>,
    context_id: &str,
) -> Coordinator {
    Coordinator::with_clock(cache.clone(), client, test_policy(), context_id, clock)
}

/// A stored credential that has never been verified
pub fn seed_credential(cache: &SessionCache, credential: &str) {
    let session = Session {
        credential: Some(credential.to_string()),
        ..Session::empty()
    };
    cache.write(&session, "seed", ChangeReason::LoggedIn).unwrap();
}

pub fn user(id: &str, email: &str) -> User {
    User::new(id, email)
}
