//! Single-context coordinator behavior

mod common;

use chrono::Duration;

use common::*;
use session_coordinator::clock::Clock;
use session_coordinator::storage::{FailureWindow, VerificationLock};
use session_coordinator::{
    CoordinatorError, Phase, Session, SessionStatus, VerificationOutcome,
};

#[tokio::test]
async fn test_no_credential_settles_without_network() {
    let (cache, _temp) = setup_cache();
    let stub = StubVerifier::confirming("u1", "a@x.com");
    let coordinator = context(&cache, stub.clone(), manual_clock(), "ctx-1");

    let session = coordinator.verify(false).await.unwrap();

    assert_eq!(session.status, SessionStatus::Unauthenticated);
    assert_eq!(stub.calls(), 0);
    assert_eq!(coordinator.phase(), Phase::Unauthenticated);
    assert!(coordinator.observer().requires_login().unwrap());
}

#[tokio::test]
async fn test_confirmed_credential_authenticates() {
    let (cache, _temp) = setup_cache();
    seed_credential(&cache, "tok");
    let stub = StubVerifier::confirming("u1", "a@x.com");
    let clock = manual_clock();
    let coordinator = context(&cache, stub.clone(), clock.clone(), "ctx-1");

    let session = coordinator.verify(false).await.unwrap();

    assert_eq!(session.status, SessionStatus::Authenticated);
    assert_eq!(session.user, Some(user("u1", "a@x.com")));
    assert_eq!(cache.read().unwrap(), session);
    assert_eq!(stub.calls(), 1);
    assert_eq!(coordinator.phase(), Phase::Authenticated);
    assert!(cache.verification_lock().unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_verifies_share_one_call() {
    let (cache, _temp) = setup_cache();
    seed_credential(&cache, "tok");
    let stub = StubVerifier::gated(VerificationOutcome::Confirmed(user("u1", "a@x.com")));
    let coordinator = context(&cache, stub.clone(), manual_clock(), "ctx-1");

    let (a, b, c, _) = tokio::join!(
        coordinator.verify(false),
        coordinator.verify(false),
        coordinator.verify(true),
        async {
            stub.wait_for_calls(1).await;
            assert_eq!(coordinator.phase(), Phase::Verifying);
            stub.release(1);
        }
    );

    let a = a.unwrap();
    assert_eq!(a.status, SessionStatus::Authenticated);
    assert_eq!(b.unwrap(), a);
    assert_eq!(c.unwrap(), a);
    assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn test_recent_confirmation_skips_network() {
    let (cache, _temp) = setup_cache();
    seed_credential(&cache, "tok");
    let stub = StubVerifier::confirming("u1", "a@x.com");
    let clock = manual_clock();
    let coordinator = context(&cache, stub.clone(), clock.clone(), "ctx-1");

    let first = coordinator.verify(false).await.unwrap();
    clock.advance(Duration::seconds(30));
    let second = coordinator.verify(false).await.unwrap();

    assert_eq!(stub.calls(), 1);
    assert_eq!(second, first);

    // Forced verification ignores the cooldown
    coordinator.verify(true).await.unwrap();
    assert_eq!(stub.calls(), 2);

    // And so does an expired one
    clock.advance(Duration::seconds(61));
    coordinator.verify(false).await.unwrap();
    assert_eq!(stub.calls(), 3);
}

#[tokio::test]
async fn test_unavailable_degrades_cached_session() {
    let (cache, _temp) = setup_cache();
    let stub = StubVerifier::new(VerificationOutcome::Unavailable);
    let clock = manual_clock();
    let coordinator = context(&cache, stub.clone(), clock.clone(), "ctx-1");
    coordinator.login(user("u1", "a@x.com"), "tok").unwrap();
    clock.advance(Duration::seconds(61));

    let session = coordinator.verify(false).await.unwrap();

    assert_eq!(session.status, SessionStatus::Degraded);
    assert_eq!(session.user, Some(user("u1", "a@x.com")));
    assert_eq!(session.credential.as_deref(), Some("tok"));
    assert_eq!(
        cache.database().get_failure_window().unwrap(),
        FailureWindow::default()
    );
    assert_eq!(coordinator.phase(), Phase::Degraded);

    // Degraded sessions are always re-checked, cooldown or not
    stub.set_fallback(VerificationOutcome::Confirmed(user("u1", "a@x.com")));
    let session = coordinator.verify(false).await.unwrap();
    assert_eq!(session.status, SessionStatus::Authenticated);
    assert_eq!(stub.calls(), 2);
}

#[tokio::test]
async fn test_malformed_payload_keeps_credential() {
    let (cache, _temp) = setup_cache();
    seed_credential(&cache, "tok");
    let stub = StubVerifier::new(VerificationOutcome::Malformed);
    let coordinator = context(&cache, stub.clone(), manual_clock(), "ctx-1");

    let session = coordinator.verify(false).await.unwrap();

    assert_eq!(session.status, SessionStatus::Unauthenticated);
    assert_eq!(session.credential.as_deref(), Some("tok"));
    assert!(session.user.is_none());
}

#[tokio::test]
async fn test_single_rejection_is_tolerated() {
    let (cache, _temp) = setup_cache();
    let stub = StubVerifier::new(VerificationOutcome::Rejected);
    let clock = manual_clock();
    let coordinator = context(&cache, stub.clone(), clock.clone(), "ctx-1");
    coordinator.login(user("u1", "a@x.com"), "tok").unwrap();
    clock.advance(Duration::seconds(61));

    let session = coordinator.verify(false).await.unwrap();

    assert_eq!(session.status, SessionStatus::Degraded);
    assert_eq!(session.user, Some(user("u1", "a@x.com")));
    assert_eq!(session.credential.as_deref(), Some("tok"));

    // A rejection after the window has passed starts a new window
    clock.advance(Duration::seconds(11));
    let session = coordinator.verify(false).await.unwrap();
    assert_eq!(session.status, SessionStatus::Degraded);
    assert_eq!(
        cache.database().get_failure_window().unwrap(),
        FailureWindow::rejected_at(clock.now())
    );
}

#[tokio::test]
async fn test_two_rejections_inside_window_sign_out() {
    let (cache, _temp) = setup_cache();
    let stub = StubVerifier::new(VerificationOutcome::Rejected);
    let clock = manual_clock();
    let coordinator = context(&cache, stub.clone(), clock.clone(), "ctx-1");
    coordinator.login(user("u1", "a@x.com"), "tok").unwrap();
    clock.advance(Duration::seconds(61));

    coordinator.verify(false).await.unwrap();
    clock.advance(Duration::seconds(5));
    let session = coordinator.verify(false).await.unwrap();

    assert_eq!(session.status, SessionStatus::Unauthenticated);
    assert!(session.user.is_none());
    assert!(session.credential.is_none());
    assert_eq!(cache.read().unwrap(), Session::signed_out());
    assert_eq!(
        cache.database().get_failure_window().unwrap(),
        FailureWindow::default()
    );
    assert_eq!(coordinator.phase(), Phase::Unauthenticated);
    assert_eq!(stub.calls(), 2);

    // Nothing left to verify
    coordinator.verify(true).await.unwrap();
    assert_eq!(stub.calls(), 2);
}

#[tokio::test]
async fn test_confirmation_resets_rejection_window() {
    let (cache, _temp) = setup_cache();
    let stub = StubVerifier::new(VerificationOutcome::Rejected);
    let clock = manual_clock();
    let coordinator = context(&cache, stub.clone(), clock.clone(), "ctx-1");
    coordinator.login(user("u1", "a@x.com"), "tok").unwrap();
    clock.advance(Duration::seconds(61));

    coordinator.verify(false).await.unwrap();

    clock.advance(Duration::seconds(3));
    stub.push(VerificationOutcome::Confirmed(user("u1", "a@x.com")));
    let session = coordinator.verify(false).await.unwrap();
    assert_eq!(session.status, SessionStatus::Authenticated);
    assert_eq!(
        cache.database().get_failure_window().unwrap(),
        FailureWindow::default()
    );

    clock.advance(Duration::seconds(8));
    let session = coordinator.verify(true).await.unwrap();
    assert_eq!(session.status, SessionStatus::Degraded);
    assert_eq!(session.user, Some(user("u1", "a@x.com")));
}

#[tokio::test]
async fn test_stale_lock_is_overridden() {
    let (cache, _temp) = setup_cache();
    seed_credential(&cache, "tok");
    let stub = StubVerifier::confirming("u1", "a@x.com");
    let clock = manual_clock();
    let coordinator = context(&cache, stub.clone(), clock.clone(), "ctx-1");

    let abandoned_at = clock.now() - Duration::seconds(30);
    let abandoned = VerificationLock::new("crashed-attempt", "ctx-crashed", abandoned_at);
    cache
        .try_acquire_lock(&abandoned, abandoned_at, Duration::seconds(5))
        .unwrap();

    let session = coordinator.verify(false).await.unwrap();

    assert_eq!(session.status, SessionStatus::Authenticated);
    assert_eq!(stub.calls(), 1);
    assert!(cache.verification_lock().unwrap().is_none());
}

#[tokio::test]
async fn test_logout_discards_in_flight_result() {
    let (cache, _temp) = setup_cache();
    seed_credential(&cache, "tok");
    let stub = StubVerifier::gated(VerificationOutcome::Confirmed(user("u1", "a@x.com")));
    let coordinator = context(&cache, stub.clone(), manual_clock(), "ctx-1");

    let pending = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.verify(false).await }
    });
    stub.wait_for_calls(1).await;

    let signed_out = coordinator.logout().unwrap();
    stub.release(1);
    let result = pending.await.unwrap().unwrap();

    assert_eq!(signed_out, Session::signed_out());
    assert_eq!(result, Session::signed_out());
    assert_eq!(cache.read().unwrap(), Session::signed_out());
    assert_eq!(coordinator.phase(), Phase::Unauthenticated);
}

#[tokio::test]
async fn test_login_rejects_invalid_input() {
    let (cache, _temp) = setup_cache();
    let stub = StubVerifier::confirming("u1", "a@x.com");
    let coordinator = context(&cache, stub, manual_clock(), "ctx-1");

    assert!(matches!(
        coordinator.login(user("u1", ""), "tok"),
        Err(CoordinatorError::InvalidUser)
    ));
    assert!(matches!(
        coordinator.login(user("u1", "a@x.com"), "  "),
        Err(CoordinatorError::EmptyCredential)
    ));
    assert_eq!(cache.database().revision().unwrap(), 0);
}

#[tokio::test]
async fn test_new_observer_reads_latest_state() {
    let (cache, _temp) = setup_cache();
    seed_credential(&cache, "tok");
    let stub = StubVerifier::confirming("u1", "a@x.com");
    let coordinator = context(&cache, stub, manual_clock(), "ctx-1");

    let verified = coordinator.verify(false).await.unwrap();
    assert_eq!(coordinator.observer().current().unwrap(), verified);

    let logged_in = coordinator.login(user("u2", "b@x.com"), "tok2").unwrap();
    assert_eq!(coordinator.observer().current().unwrap(), logged_in);

    coordinator.logout().unwrap();
    let observer = coordinator.observer();
    assert_eq!(observer.current().unwrap(), Session::signed_out());
    assert!(observer.requires_login().unwrap());
}

#[tokio::test]
async fn test_hung_attempt_is_replaced_once_stale() {
    let (cache, _temp) = setup_cache();
    seed_credential(&cache, "tok");
    let stub = StubVerifier::gated_first(1, VerificationOutcome::Unavailable);
    // The replacement answers first; the hung attempt resumes with a rejection
    stub.push(VerificationOutcome::Confirmed(user("u2", "b@x.com")));
    stub.push(VerificationOutcome::Rejected);
    let clock = manual_clock();
    let coordinator = context(&cache, stub.clone(), clock.clone(), "ctx-1");

    let hung = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.verify(false).await }
    });
    stub.wait_for_calls(1).await;

    clock.advance(Duration::seconds(6));
    let replacement = coordinator.verify(false).await.unwrap();
    assert_eq!(replacement.status, SessionStatus::Authenticated);
    assert_eq!(replacement.user, Some(user("u2", "b@x.com")));
    assert_eq!(stub.calls(), 2);

    // The hung attempt lost its lock, so its late rejection is dropped
    stub.release(1);
    let late = hung.await.unwrap().unwrap();
    assert_eq!(late, replacement);
    assert_eq!(cache.read().unwrap(), replacement);
    assert_eq!(
        cache.database().get_failure_window().unwrap(),
        FailureWindow::default()
    );
    assert!(cache.verification_lock().unwrap().is_none());
}

#[tokio::test]
async fn test_phase_starts_from_cached_session() {
    let (cache, _temp) = setup_cache();
    let clock = manual_clock();
    let fresh = context(&cache, StubVerifier::confirming("u1", "a@x.com"), clock.clone(), "ctx-1");
    assert_eq!(fresh.phase(), Phase::Idle);

    fresh.login(user("u1", "a@x.com"), "tok").unwrap();

    let hydrated = context(&cache, StubVerifier::confirming("u1", "a@x.com"), clock, "ctx-2");
    assert_eq!(hydrated.phase(), Phase::Authenticated);
}
