//! Periodic re-trigger
//!
//! Starts a run on a fixed schedule. At most one run is in flight: a tick that
//! fires while the previous run is still going is skipped, not queued.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Counters for a periodic trigger
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TriggerStats {
    /// Runs started
    pub started: usize,
    /// Ticks skipped because a run was still in flight
    pub skipped: usize,
}

/// Call `run` every `interval` until `cancel` fires.
///
/// The first run starts immediately. After cancellation no new run starts;
/// the in-flight run, if any, is awaited before returning (it is expected to
/// observe the same token and wind down).
pub async fn run_periodically<F, Fut>(
    interval: Duration,
    cancel: &CancellationToken,
    run: F,
) -> TriggerStats
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let gate = Arc::new(Semaphore::new(1));
    let mut in_flight = JoinSet::new();
    let mut stats = TriggerStats::default();

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        while in_flight.try_join_next().is_some() {}

        match gate.clone().try_acquire_owned() {
            Ok(permit) => {
                stats.started += 1;
                debug!(run = stats.started, "starting scheduled run");
                let fut = run();
                in_flight.spawn(async move {
                    fut.await;
                    drop(permit);
                });
            }
            Err(_) => {
                stats.skipped += 1;
                info!("previous run still in progress, skipping this tick");
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    info!(started = stats.started, skipped = stats.skipped, "periodic trigger stopped");
    stats
}
