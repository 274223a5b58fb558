//! Per-client fixed-window admission control for the upload endpoint.

use dashmap::DashMap;
use std::{net::IpAddr, sync::Arc, time::Duration};
use tokio::time::Instant;

use crate::errors::ServiceError;

/// Default number of uploads admitted per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 5;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

/// A thread-safe fixed-window counter keyed by client IP.
///
/// Each IP's counter lives in its own map shard entry, so concurrent requests from
/// different clients rarely contend and no lock is ever held across an `.await`.
/// Stale windows are dropped by [`RateLimiter::sweep`], which the server runs
/// periodically.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<IpAddr, Window>>,
    max_requests: u32,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    /// Creates a new `RateLimiter`.
    ///
    /// # Arguments
    ///
    /// * `max_requests` - Requests admitted per window.
    /// * `window` - Window length. A window is reset once this much time has passed since it started.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_requests,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit or reject one request from `ip`.
    ///
    /// Rejection carries the window length as the retry hint.
    pub fn admit(&self, ip: IpAddr) -> Result<(), ServiceError> {
        let now = Instant::now();
        let mut entry = self.windows.entry(ip).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.saturating_duration_since(entry.started) >= self.window {
            entry.count = 0;
            entry.started = now;
        }

        if entry.count >= self.max_requests {
            return Err(ServiceError::RateLimited {
                retry_after_seconds: self.window.as_secs().max(1),
            });
        }

        entry.count += 1;
        Ok(())
    }

    /// Remove windows that have expired. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before.saturating_sub(self.windows.len())
    }

    /// Number of IPs currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
