//! Outcome interpretation: what a verification result does to the cache.
//!
//! Pure with respect to the cache; `decide` is evaluated inside the commit
//! transaction against the snapshot current at that moment.

use chrono::{DateTime, Utc};

use crate::config::PolicyConfig;
use crate::session::{ChangeReason, Session, SessionStatus, VerificationFailure};
use crate::storage::{CacheSnapshot, CacheUpdate, FailureWindow};
use crate::verifier::VerificationOutcome;

pub fn decide(
    outcome: &VerificationOutcome,
    credential: &str,
    snapshot: &CacheSnapshot,
    now: DateTime<Utc>,
    policy: &PolicyConfig,
) -> (CacheUpdate, ChangeReason) {
    match outcome {
        VerificationOutcome::Confirmed(user) => (
            CacheUpdate {
                failure_window: FailureWindow::default(),
                session: Session::authenticated(user.clone(), credential, now),
            },
            ChangeReason::Confirmed,
        ),
        VerificationOutcome::Unavailable => {
            fall_back_to_cache(snapshot, VerificationFailure::TransientUnavailable)
        }
        VerificationOutcome::Malformed => {
            fall_back_to_cache(snapshot, VerificationFailure::MalformedPayload)
        }
        VerificationOutcome::Rejected => {
            if snapshot
                .failure_window
                .is_open(now, policy.rejection_window())
            {
                (
                    CacheUpdate {
                        failure_window: FailureWindow::default(),
                        session: Session::signed_out(),
                    },
                    ChangeReason::Failed(VerificationFailure::UnauthorizedPersistent),
                )
            } else {
                let (mut update, reason) =
                    fall_back_to_cache(snapshot, VerificationFailure::UnauthorizedTransient);
                update.failure_window = FailureWindow::rejected_at(now);
                (update, reason)
            }
        }
    }
}

/// Keep whatever the cache holds. A usable identity becomes `Degraded`;
/// anything else is `Unauthenticated` with the credential left in place
/// for a later attempt. The failure window is carried over unchanged.
fn fall_back_to_cache(
    snapshot: &CacheSnapshot,
    failure: VerificationFailure,
) -> (CacheUpdate, ChangeReason) {
    let status = if snapshot.session.has_usable_identity() {
        SessionStatus::Degraded
    } else {
        SessionStatus::Unauthenticated
    };

    (
        CacheUpdate {
            failure_window: snapshot.failure_window,
            session: snapshot.session.clone().with_status(status),
        },
        ChangeReason::Failed(failure),
    )
}
