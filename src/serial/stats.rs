//! # Statistics Module
//!
//! Running byte counters and a derived throughput rate for one connection.
//! Counters are atomics so the receive loop and concurrent senders can
//! increment them without coordination; reads are non-blocking snapshots.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Minimum elapsed denominator, keeps same-tick samples finite.
const MIN_ELAPSED_SECS: f64 = 1e-3;

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub rate_bytes_per_sec: f64,
    pub connection_elapsed: Duration,
}

#[derive(Default)]
struct Timing {
    started_at: Option<Instant>,
    last_activity: Option<Instant>,
}

/// Monotonic per-connection counters plus a sampled throughput rate.
#[derive(Default)]
pub struct Statistics {
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    rate: Mutex<f64>,
    timing: Mutex<Timing>,
}

impl Statistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroes the counters and restarts the connection clock. Called exactly
    /// once per new connection.
    pub fn reset(&self) {
        self.bytes_received.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        if let Ok(mut rate) = self.rate.lock() {
            *rate = 0.0;
        }
        if let Ok(mut timing) = self.timing.lock() {
            timing.started_at = Some(Instant::now());
            timing.last_activity = None;
        }
    }

    /// Stops the connection clock; the rate reads 0 until the next reset.
    pub fn mark_disconnected(&self) {
        if let Ok(mut timing) = self.timing.lock() {
            timing.started_at = None;
        }
        if let Ok(mut rate) = self.rate.lock() {
            *rate = 0.0;
        }
    }

    pub fn record_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
        self.mark_activity();
    }

    pub fn record_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
        self.mark_activity();
    }

    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Recomputes the stored rate from the totals. Driven by the session's
    /// once-per-second sampler rather than per byte, so the value stays
    /// readable instead of flickering with every chunk.
    pub fn sample_rate(&self) {
        let elapsed = {
            let Ok(timing) = self.timing.lock() else {
                return;
            };
            match timing.started_at {
                Some(start) => start.elapsed().as_secs_f64().max(MIN_ELAPSED_SECS),
                None => return,
            }
        };
        let total = self.bytes_received() + self.bytes_sent();
        if let Ok(mut rate) = self.rate.lock() {
            *rate = total as f64 / elapsed;
        }
    }

    /// Last sampled throughput in bytes per second; 0.0 with no connection.
    #[must_use]
    pub fn current_rate(&self) -> f64 {
        self.rate.lock().map(|r| *r).unwrap_or(0.0)
    }

    /// Time since the connection clock started, zero when disconnected.
    #[must_use]
    pub fn connection_elapsed(&self) -> Duration {
        self.timing
            .lock()
            .ok()
            .and_then(|t| t.started_at.map(|s| s.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_received: self.bytes_received(),
            bytes_sent: self.bytes_sent(),
            rate_bytes_per_sec: self.current_rate(),
            connection_elapsed: self.connection_elapsed(),
        }
    }

    fn mark_activity(&self) {
        if let Ok(mut timing) = self.timing.lock() {
            timing.last_activity = Some(Instant::now());
        }
    }
}

/// Formats an elapsed duration as `HH:MM:SS` for status displays.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
