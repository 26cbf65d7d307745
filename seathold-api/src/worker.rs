use seathold_core::HoldExpiryReaper;
use seathold_store::Config;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::state::AppState;

/// Spawn the hold expiry reaper against the app's ledger. It publishes expiry
/// notifications on the app's channel and stops when `shutdown` flips. Each
/// pass also drops closed rate limit windows.
pub fn start_expiry_worker(
    state: &AppState,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let reaper = HoldExpiryReaper::new(
        Arc::clone(state.ledger()),
        Arc::clone(state.allocator.idempotency()),
        Arc::clone(state.allocator.clock()),
        config.reaper_interval(),
    )
    .with_hold_retention(config.hold_retention())
    .with_notifier(state.notifier.clone());

    let metrics = Arc::clone(&state.metrics);
    let rate_limiter = state.rate_limiter.clone();
    reaper.spawn(shutdown, move |report| {
        metrics.record_reap(report);
        if let Some(limiter) = &rate_limiter {
            limiter.purge_stale();
        }
        if report.failed > 0 {
            warn!("{} holds could not be expired this pass", report.failed);
        }
    })
}
