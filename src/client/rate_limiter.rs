//! Per-endpoint request pacing and 429 backoff.
//!
//! Epistemic foundation:
//! - K_i: 429 responses require exponential backoff
//! - K_i: Search APIs tolerate a steady request rate better than bursts
//! - B_i: A `retry-after` header may or may not be sent
//! - I^B: Actual quota unknowable until the server refuses a request

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest backoff applied after repeated 429s.
const MAX_BACKOFF_SECS: f64 = 60.0;

/// Throttle state for one endpoint.
#[derive(Debug)]
pub struct EndpointState {
    /// Consecutive 429 responses
    pub consecutive_429s: u32,
    /// No requests before this instant
    pub backoff_until: Option<Instant>,
    /// Slot reserved by the most recent request
    pub next_slot: Option<Instant>,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self {
            consecutive_429s: 0,
            backoff_until: None,
            next_slot: None,
        }
    }
}

impl EndpointState {
    /// Reserve the next request slot and return how long to wait for it.
    fn reserve(&mut self, min_interval: Duration) -> Duration {
        let now = Instant::now();
        let mut start = now;

        if let Some(until) = self.backoff_until.filter(|&t| t > now) {
            start = start.max(until);
        }
        if let Some(slot) = self.next_slot.filter(|&t| t > now) {
            start = start.max(slot);
        }

        self.next_slot = Some(start + min_interval);
        start - now
    }

    /// Record a 429 and extend the backoff window.
    fn record_429(&mut self, retry_after: Option<f64>) -> Duration {
        self.consecutive_429s += 1;
        let exponential = 2.0_f64.powi(self.consecutive_429s as i32).min(MAX_BACKOFF_SECS);
        // Server-supplied; may be negative, NaN or absurdly large.
        let requested = retry_after.filter(|s| s.is_finite()).unwrap_or(0.0);
        let backoff = Duration::from_secs_f64(requested.max(exponential).min(MAX_BACKOFF_SECS));
        self.backoff_until = Some(Instant::now() + backoff);
        warn!(
            consecutive_429s = self.consecutive_429s,
            backoff_secs = backoff.as_secs_f64(),
            "Rate limited (429), backing off"
        );
        backoff
    }

    fn record_success(&mut self) {
        if self.consecutive_429s > 0 {
            self.consecutive_429s = 0;
            self.backoff_until = None;
        }
    }
}

/// Shared limiter keyed by endpoint name (`tavily`, `brightdata`).
#[derive(Debug)]
pub struct RateLimiter {
    states: DashMap<String, EndpointState>,
    min_interval: Duration,
    total_requests: AtomicU64,
    total_429s: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl RateLimiter {
    /// Create a limiter that spaces requests to one endpoint by `min_interval`.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            states: DashMap::new(),
            min_interval,
            total_requests: AtomicU64::new(0),
            total_429s: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
        }
    }

    /// Wait until a request to `endpoint` may be sent.
    ///
    /// Returns the duration waited.
    pub async fn wait_if_needed(&self, endpoint: &str) -> Duration {
        // The map guard must be dropped before sleeping.
        let wait_time = {
            let mut state = self.states.entry(endpoint.to_string()).or_default();
            state.reserve(self.min_interval)
        };

        if wait_time > Duration::ZERO {
            debug!(endpoint, wait_ms = wait_time.as_millis() as u64, "Waiting for rate limit");
            self.total_wait_ms
                .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
            tokio::time::sleep(wait_time).await;
        }

        wait_time
    }

    /// Record a response status; returns the backoff chosen for a 429.
    pub fn record_response(&self, endpoint: &str, status: u16, retry_after: Option<f64>) -> Option<Duration> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut state = self.states.entry(endpoint.to_string()).or_default();

        if status == 429 {
            self.total_429s.fetch_add(1, Ordering::Relaxed);
            return Some(state.record_429(retry_after));
        }
        if status < 400 {
            state.record_success();
        }
        None
    }

    /// Whether `endpoint` is currently inside a backoff window.
    pub fn is_backing_off(&self, endpoint: &str) -> bool {
        self.states
            .get(endpoint)
            .and_then(|s| s.backoff_until)
            .is_some_and(|t| t > Instant::now())
    }

    pub fn stats(&self) -> RateLimiterStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_429s = self.total_429s.load(Ordering::Relaxed);

        RateLimiterStats {
            total_requests,
            total_429s,
            total_wait_secs: self.total_wait_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            endpoints_tracked: self.states.len(),
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_429s: u64,
    pub total_wait_secs: f64,
    pub endpoints_tracked: usize,
}
