use chrono::{DateTime, Duration, Utc};
use seathold_shared::{Hold, HoldNotification};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::error::HoldError;
use crate::idempotency::IdempotencyStore;
use crate::ledger::SeatLedger;

/// What one reaper pass did
#[derive(Debug, Default, Clone)]
pub struct ReapReport {
    pub expired: Vec<Hold>,
    /// Holds that left Active (confirmed, released) between scan and expiry.
    pub skipped: usize,
    pub failed: usize,
    pub purged_keys: usize,
    pub pruned_holds: usize,
}

/// Periodically expires holds past their expiry and bounds memory by purging
/// old idempotency records and finished holds.
pub struct HoldExpiryReaper {
    ledger: Arc<SeatLedger>,
    idempotency: Arc<IdempotencyStore>,
    clock: Arc<dyn Clock>,
    interval: std::time::Duration,
    hold_retention: Duration,
    notifier: Option<broadcast::Sender<HoldNotification>>,
}

impl HoldExpiryReaper {
    pub fn new(
        ledger: Arc<SeatLedger>,
        idempotency: Arc<IdempotencyStore>,
        clock: Arc<dyn Clock>,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            ledger,
            idempotency,
            clock,
            interval,
            hold_retention: Duration::hours(1),
            notifier: None,
        }
    }

    /// How long expired and released holds stay queryable.
    pub fn with_hold_retention(mut self, retention: Duration) -> Self {
        self.hold_retention = retention;
        self
    }

    pub fn with_notifier(mut self, notifier: broadcast::Sender<HoldNotification>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn tick(&self) -> ReapReport {
        self.reap_at(self.clock.now())
    }

    pub fn reap_at(&self, now: DateTime<Utc>) -> ReapReport {
        let mut report = ReapReport::default();

        for hold_id in self.ledger.due_holds(now) {
            match self.ledger.expire(hold_id, now) {
                Ok(hold) => {
                    info!("Hold {} expired, seats {:?} released", hold.id, hold.seats);
                    self.notify(&hold, now);
                    report.expired.push(hold);
                }
                // Confirmed or released after the scan: the other side won.
                Err(HoldError::InvalidState { status, .. }) => {
                    debug!("Skipping hold {}, now {}", hold_id, status);
                    report.skipped += 1;
                }
                Err(err) => {
                    error!("Failed to expire hold {}: {}", hold_id, err);
                    report.failed += 1;
                }
            }
        }

        report.purged_keys = self.idempotency.purge_expired(now);
        if let Some(cutoff) = now.checked_sub_signed(self.hold_retention) {
            report.pruned_holds = self.ledger.prune_finished(cutoff);
        }
        report
    }

    fn notify(&self, hold: &Hold, now: DateTime<Utc>) {
        if let Some(tx) = &self.notifier {
            // No subscribers is fine
            let _ = tx.send(HoldNotification::HoldExpired {
                event_id: hold.event_id,
                hold_id: hold.id,
                seats: hold.seats.clone(),
                timestamp: now,
            });
        }
    }

    /// Tick until `shutdown` flips to true or its sender is dropped.
    /// `observer` sees every report.
    pub async fn run<F>(self, mut shutdown: watch::Receiver<bool>, mut observer: F)
    where
        F: FnMut(&ReapReport) + Send,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Hold expiry reaper started, interval {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick();
                    if report.failed > 0 {
                        error!("Reaper pass had {} failures, retrying next tick", report.failed);
                    }
                    if !report.expired.is_empty() || report.purged_keys > 0 || report.pruned_holds > 0 {
                        debug!(
                            "Reaper pass: {} expired, {} skipped, {} keys purged, {} holds pruned",
                            report.expired.len(), report.skipped, report.purged_keys, report.pruned_holds
                        );
                    }
                    observer(&report);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Hold expiry reaper stopping");
                        break;
                    }
                }
            }
        }
    }

    pub fn spawn<F>(self, shutdown: watch::Receiver<bool>, observer: F) -> JoinHandle<()>
    where
        F: FnMut(&ReapReport) + Send + 'static,
    {
        tokio::spawn(self.run(shutdown, observer))
    }
}
