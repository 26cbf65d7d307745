use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use seathold_core::Clock;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::warn;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: DateTime<Utc>,
    count: u32,
}

/// Fixed-window request counter per client address.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    windows: DashMap<IpAddr, Window>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            window,
            clock,
            windows: DashMap::new(),
        }
    }

    fn closed(&self, window: &Window, now: DateTime<Utc>) -> bool {
        window
            .started
            .checked_add_signed(self.window)
            .is_some_and(|end| end <= now)
    }

    /// Count one request from `client`. Over the limit, returns how long
    /// until the client's window closes.
    pub fn check(&self, client: IpAddr) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut window = self
            .windows
            .entry(client)
            .or_insert(Window { started: now, count: 0 });

        if self.closed(&window, now) {
            *window = Window { started: now, count: 0 };
        }
        if window.count >= self.limit {
            return Err(window.started + self.window - now);
        }
        window.count += 1;
        Ok(())
    }

    /// Forget clients whose window has closed.
    pub fn purge_stale(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, window| !self.closed(window, now));
        before - self.windows.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Limits requests per peer address. Requests without connection info
/// (in-process callers) are not limited.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let (Some(limiter), Some(ip)) = (state.rate_limiter.as_deref(), peer) else {
        return next.run(req).await;
    };

    match limiter.check(ip) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            warn!("Rate limit exceeded for {}", ip);
            state.metrics.rate_limited.inc();
            AppError::RateLimited {
                retry_after_seconds: retry_after.num_seconds().max(1) as u64,
            }
            .into_response()
        }
    }
}
