//! Reconnect backoff.
//!
//! Every connect request for a channel counts as an attempt. Attempts inside
//! the window beyond the threshold are delayed exponentially:
//!
//! - below `attempt_threshold` attempts within the window: connect immediately
//! - otherwise: `base * 2^(attempts - threshold)` plus up to 25% jitter
//! - capped at `max_backoff`
//!
//! The count decays on its own as attempts fall out of the window.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);
pub const DEFAULT_ATTEMPT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_ATTEMPT_THRESHOLD: usize = 5;

const MAX_EXPONENT: u32 = 10;

#[derive(Debug, Clone)]
pub struct ReconnectTrackerConfig {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_window: Duration,
    pub attempt_threshold: usize,
    /// Add up to 25% random jitter to non-zero delays.
    pub jitter: bool,
}

impl Default for ReconnectTrackerConfig {
    fn default() -> Self {
        Self {
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            attempt_window: DEFAULT_ATTEMPT_WINDOW,
            attempt_threshold: DEFAULT_ATTEMPT_THRESHOLD,
            jitter: true,
        }
    }
}

#[derive(Debug, Default)]
struct AttemptHistory {
    recent: Vec<Instant>,
    total: u64,
}

impl AttemptHistory {
    fn record(&mut self, now: Instant, window: Duration) -> usize {
        self.recent.retain(|&t| now.duration_since(t) < window);
        self.recent.push(now);
        self.total += 1;
        self.recent.len()
    }

    fn recent(&self, now: Instant, window: Duration) -> usize {
        self.recent
            .iter()
            .filter(|&&t| now.duration_since(t) < window)
            .count()
    }
}

/// Per-channel connect history.
#[derive(Debug, Default)]
pub struct ReconnectTracker {
    history: HashMap<String, AttemptHistory>,
    config: ReconnectTrackerConfig,
}

impl ReconnectTracker {
    pub fn with_config(config: ReconnectTrackerConfig) -> Self {
        Self {
            history: HashMap::new(),
            config,
        }
    }

    /// Record a connect attempt and return how long to wait before it.
    pub fn record_attempt(&mut self, channel_id: &str) -> Duration {
        let now = Instant::now();
        let attempts = self
            .history
            .entry(channel_id.to_string())
            .or_default()
            .record(now, self.config.attempt_window);

        let mut delay = self.backoff_for(attempts);
        if delay.is_zero() {
            debug!(channel_id, attempts, "Connecting immediately");
            return delay;
        }

        if self.config.jitter {
            let jitter_ms = (delay.as_millis() as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay = (delay + Duration::from_millis(jitter_ms)).min(self.config.max_backoff);
        }
        info!(channel_id, attempts, ?delay, "Reconnect backoff");
        delay
    }

    fn backoff_for(&self, attempts: usize) -> Duration {
        if attempts < self.config.attempt_threshold {
            return Duration::ZERO;
        }
        let exponent = (attempts - self.config.attempt_threshold).min(MAX_EXPONENT as usize) as u32;
        self.config
            .base_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.config.max_backoff)
    }

    pub fn recent_attempts(&self, channel_id: &str) -> usize {
        let now = Instant::now();
        self.history
            .get(channel_id)
            .map(|h| h.recent(now, self.config.attempt_window))
            .unwrap_or(0)
    }

    /// Drop the history of a retired channel.
    pub fn forget(&mut self, channel_id: &str) {
        self.history.remove(channel_id);
    }

    pub fn stats(&self) -> ReconnectStats {
        let now = Instant::now();
        ReconnectStats {
            tracked_channels: self.history.len(),
            backing_off: self
                .history
                .values()
                .filter(|h| h.recent(now, self.config.attempt_window) >= self.config.attempt_threshold)
                .count(),
            total_attempts: self.history.values().map(|h| h.total).sum(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectStats {
    pub tracked_channels: usize,
    /// Channels whose next connect would be delayed.
    pub backing_off: usize,
    pub total_attempts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ReconnectTracker {
        ReconnectTracker::with_config(ReconnectTrackerConfig {
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            attempt_window: Duration::from_secs(60),
            attempt_threshold: 3,
            jitter: false,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_below_threshold() {
        let mut tracker = tracker();
        assert_eq!(tracker.record_attempt("1"), Duration::ZERO);
        assert_eq!(tracker.record_attempt("1"), Duration::ZERO);
        assert_eq!(tracker.recent_attempts("1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_then_capped() {
        let mut tracker = tracker();
        tracker.record_attempt("1");
        tracker.record_attempt("1");
        assert_eq!(tracker.record_attempt("1"), Duration::from_secs(1));
        assert_eq!(tracker.record_attempt("1"), Duration::from_secs(2));
        assert_eq!(tracker.record_attempt("1"), Duration::from_secs(4));
        assert_eq!(tracker.record_attempt("1"), Duration::from_secs(8));
        assert_eq!(tracker.record_attempt("1"), Duration::from_secs(10));
        assert_eq!(tracker.record_attempt("1"), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets() {
        let mut tracker = tracker();
        for _ in 0..5 {
            tracker.record_attempt("1");
        }
        assert_eq!(tracker.stats().backing_off, 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(tracker.recent_attempts("1"), 0);
        assert_eq!(tracker.record_attempt("1"), Duration::ZERO);
        assert_eq!(tracker.stats().total_attempts, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_are_independent() {
        let mut tracker = tracker();
        for _ in 0..4 {
            tracker.record_attempt("1");
        }
        assert_eq!(tracker.record_attempt("2"), Duration::ZERO);

        tracker.forget("1");
        assert_eq!(tracker.recent_attempts("1"), 0);
        assert_eq!(tracker.stats().tracked_channels, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_stays_within_bounds() {
        let mut tracker = ReconnectTracker::with_config(ReconnectTrackerConfig {
            attempt_threshold: 1,
            base_backoff: Duration::from_secs(4),
            ..Default::default()
        });
        let delay = tracker.record_attempt("1");
        assert!(delay >= Duration::from_secs(4));
        assert!(delay <= Duration::from_secs(5));
    }
}
