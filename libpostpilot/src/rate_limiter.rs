//! Per-platform request rate limiting
//!
//! Each platform gets its own limiter instance so the spacing sleep for one
//! platform never blocks dispatches for another. The hourly budget uses a
//! fixed-window reset rather than a sliding window; bursts of up to twice
//! the budget are possible at a window boundary and that approximation is
//! kept intentionally.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::TransportError;
use crate::types::Platform;

const WINDOW_MS: i64 = 3_600_000;

/// Rolling-hour counter and spacing bookkeeping for one platform.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterState {
    request_count: u32,
    window_reset_at: i64,
    last_request_at: i64,
}

impl RateLimiterState {
    pub fn new() -> Self {
        Self {
            request_count: 0,
            window_reset_at: 0,
            last_request_at: 0,
        }
    }

    /// Admit one request at `now_ms`, returning how long the caller must
    /// wait to respect the minimum spacing. Pure state transition, kept
    /// separate from the async wrapper so tests can drive it with explicit
    /// clocks.
    pub fn plan(
        &mut self,
        now_ms: i64,
        budget: u32,
        min_interval_ms: i64,
    ) -> Result<i64, TransportError> {
        if now_ms > self.window_reset_at {
            self.request_count = 0;
            self.window_reset_at = now_ms + WINDOW_MS;
        }

        if self.request_count >= budget {
            return Err(TransportError::RateLimited(format!(
                "hourly budget of {} requests reached",
                budget
            )));
        }

        let wait = (self.last_request_at + min_interval_ms - now_ms).max(0);
        self.request_count += 1;
        // Reserve the send slot now so a concurrent caller spaces off it.
        self.last_request_at = now_ms + wait;
        Ok(wait)
    }
}

impl Default for RateLimiterState {
    fn default() -> Self {
        Self::new()
    }
}

/// Async rate limiter for a single platform.
pub struct RateLimiter {
    budget: u32,
    min_interval_ms: i64,
    state: Mutex<RateLimiterState>,
}

impl RateLimiter {
    pub fn new(budget: u32, min_interval_ms: u64) -> Self {
        Self {
            budget,
            min_interval_ms: min_interval_ms as i64,
            state: Mutex::new(RateLimiterState::new()),
        }
    }

    /// Acquire one send slot, sleeping as needed to respect spacing.
    ///
    /// The spacing sleep is the one permitted blocking point in the
    /// dispatch path. An exhausted hourly budget returns immediately with
    /// `RateLimited`; the caller decides whether to defer.
    pub async fn acquire(&self) -> Result<(), TransportError> {
        let wait = {
            let mut state = self.state.lock().await;
            state.plan(now_ms(), self.budget, self.min_interval_ms)?
        };
        if wait > 0 {
            tokio::time::sleep(Duration::from_millis(wait as u64)).await;
        }
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One limiter per platform, with independent locks.
pub struct RateLimiterSet {
    limiters: Vec<RateLimiter>,
}

impl RateLimiterSet {
    pub fn new(hourly_limits: &HashMap<Platform, u32>, min_interval_ms: u64) -> Self {
        let limiters = Platform::ALL
            .iter()
            .map(|p| {
                let budget = hourly_limits.get(p).copied().unwrap_or(u32::MAX);
                RateLimiter::new(budget, min_interval_ms)
            })
            .collect();
        Self { limiters }
    }

    pub fn limiter(&self, platform: Platform) -> &RateLimiter {
        let idx = Platform::ALL
            .iter()
            .position(|&p| p == platform)
            .unwrap_or(0);
        &self.limiters[idx]
    }
}
