use axum::{extract::State, http::header, response::IntoResponse};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use seathold_core::{Allocation, ReapReport};

use crate::error::AppError;
use crate::state::AppState;

/// Prometheus collectors for the hold lifecycle, registered on a private
/// registry so tests can build as many apps as they like.
pub struct Metrics {
    registry: Registry,
    pub holds_created: IntCounter,
    pub hold_rejections: IntCounterVec,
    pub idempotent_replays: IntCounter,
    pub holds_expired: IntCounter,
    pub holds_confirmed: IntCounter,
    pub holds_released: IntCounter,
    pub allocation_duration: Histogram,
    pub rate_limited: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let holds_created =
            IntCounter::new("seathold_holds_created_total", "Holds successfully created")?;
        let hold_rejections = IntCounterVec::new(
            Opts::new("seathold_hold_rejections_total", "Hold requests rejected, by error kind"),
            &["kind"],
        )?;
        let idempotent_replays = IntCounter::new(
            "seathold_idempotent_replays_total",
            "Hold requests answered from the idempotency cache",
        )?;
        let holds_expired =
            IntCounter::new("seathold_holds_expired_total", "Holds expired past their deadline")?;
        let holds_confirmed =
            IntCounter::new("seathold_holds_confirmed_total", "Holds confirmed into bookings")?;
        let holds_released =
            IntCounter::new("seathold_holds_released_total", "Holds released by their owner")?;
        let allocation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "seathold_allocation_duration_seconds",
                "Time spent allocating a hold request",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        let rate_limited =
            IntCounter::new("seathold_rate_limited_total", "Requests refused by the rate limiter")?;

        registry.register(Box::new(holds_created.clone()))?;
        registry.register(Box::new(hold_rejections.clone()))?;
        registry.register(Box::new(idempotent_replays.clone()))?;
        registry.register(Box::new(holds_expired.clone()))?;
        registry.register(Box::new(holds_confirmed.clone()))?;
        registry.register(Box::new(holds_released.clone()))?;
        registry.register(Box::new(allocation_duration.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;

        Ok(Self {
            registry,
            holds_created,
            hold_rejections,
            idempotent_replays,
            holds_expired,
            holds_confirmed,
            holds_released,
            allocation_duration,
            rate_limited,
        })
    }

    /// Count one `create_hold` call. Replays only bump the replay counter.
    pub fn record_allocation(&self, allocation: &Allocation) {
        if allocation.is_replay() {
            self.idempotent_replays.inc();
            return;
        }
        match &allocation.outcome {
            Ok(_) => self.holds_created.inc(),
            Err(err) => self.hold_rejections.with_label_values(&[err.kind()]).inc(),
        }
    }

    pub fn record_reap(&self, report: &ReapReport) {
        self.holds_expired.inc_by(report.expired.len() as u64);
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state.metrics.render().map_err(anyhow::Error::from)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
