use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::Coordinator;

/// Start the periodic re-verification task.
///
/// Returns `None` when refresh is disabled. Each tick is an unforced
/// `verify`, so a session confirmed recently (by any context) is not
/// re-checked before its cooldown runs out.
pub fn start_refresh_task(coordinator: Coordinator) -> Option<JoinHandle<()>> {
    let period = coordinator.policy().refresh_interval()?;
    info!(
        context = %coordinator.context_id(),
        interval_ms = period.as_millis() as u64,
        "Starting session refresh task"
    );

    Some(tokio::spawn(async move {
        // Spread contexts started together so they don't all tick at once
        let max_jitter = (period.as_millis() as u64 / 4).max(1);
        let jitter = rand::random::<u64>() % max_jitter;
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let mut interval_timer = tokio::time::interval(period);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval_timer.tick().await;
            run_refresh(&coordinator).await;
        }
    }))
}

async fn run_refresh(coordinator: &Coordinator) {
    match coordinator.verify(false).await {
        Ok(session) => debug!(
            context = %coordinator.context_id(),
            status = ?session.status,
            "Session refresh complete"
        ),
        Err(e) => error!(
            context = %coordinator.context_id(),
            error = %e,
            "Session refresh failed"
        ),
    }
}
