use anyhow::Context;
use seathold_core::{Clock, HoldAllocator, IdempotencyStore, SeatLedger};
use seathold_shared::HoldNotification;
use seathold_store::{seed_events, Config};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::metrics::Metrics;
use crate::rate_limit::RateLimiter;

/// Buffered notifications per stream subscriber before it starts lagging
const NOTIFICATION_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    pub allocator: Arc<HoldAllocator>,
    pub notifier: broadcast::Sender<HoldNotification>,
    pub metrics: Arc<Metrics>,
    /// `None` when rate limiting is disabled
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    pub fn new(allocator: HoldAllocator) -> anyhow::Result<Self> {
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let metrics = Metrics::new().context("registering metrics")?;

        Ok(Self {
            allocator: Arc::new(allocator),
            notifier,
            metrics: Arc::new(metrics),
            rate_limiter: None,
        })
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(Arc::new(limiter));
        self
    }

    /// Build the ledger and idempotency store from `config` and register the
    /// configured events.
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;

        let ledger = Arc::new(SeatLedger::new(config.hold_ttl()));
        let seeded = seed_events(&ledger, &config.events).context("seeding events")?;
        info!("{} events seeded from configuration", seeded);

        let idempotency = Arc::new(IdempotencyStore::new(config.idempotency_retention()));
        let allocator =
            HoldAllocator::new(ledger, idempotency, clock.clone(), config.holds.max_seats_per_hold);
        let state = Self::new(allocator)?;

        let limits = &config.rate_limit;
        if !limits.enabled {
            info!("Rate limiting disabled");
            return Ok(state);
        }
        info!(
            "Rate limiting to {} requests per {}s per client",
            limits.requests_per_window, limits.window_seconds
        );
        Ok(state.with_rate_limiter(RateLimiter::new(
            limits.requests_per_window,
            config.rate_limit_window(),
            clock,
        )))
    }

    pub fn ledger(&self) -> &Arc<SeatLedger> {
        self.allocator.ledger()
    }

    pub fn notify(&self, notification: HoldNotification) {
        // Sending only fails when nobody is subscribed
        let _ = self.notifier.send(notification);
    }
}
