//! Sliding-window rate limiting.
//!
//! A `RateWindow` holds the instants of recent attempts for one session and
//! caps how many may fall inside the window. Time is always passed in, so
//! callers (and tests) control the clock.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bounded sliding set of timestamps.
#[derive(Debug, Clone)]
pub struct RateWindow {
    hits: VecDeque<Instant>,
    window: Duration,
    max: usize,
}

impl RateWindow {
    pub fn new(window: Duration, max: usize) -> Self {
        Self {
            hits: VecDeque::with_capacity(max),
            window,
            max,
        }
    }

    /// Drop timestamps that fell out of the window.
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether the window already holds `max` attempts.
    pub fn is_exhausted(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.hits.len() >= self.max
    }

    /// Record an attempt if there is room. Returns false when exhausted.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.is_exhausted(now) {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    /// Record an attempt unconditionally.
    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        self.hits.push_back(now);
    }

    /// Attempts currently inside the window.
    pub fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.hits.len()
    }

    /// Time until the oldest attempt leaves the window.
    pub fn retry_after(&mut self, now: Instant) -> Duration {
        self.prune(now);
        match self.hits.front() {
            Some(&oldest) if self.hits.len() >= self.max => {
                self.window.saturating_sub(now.saturating_duration_since(oldest))
            }
            _ => Duration::ZERO,
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn clear(&mut self) {
        self.hits.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_within_window() {
        let start = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(60), 3);

        assert!(window.try_acquire(start));
        assert!(window.try_acquire(start + Duration::from_secs(1)));
        assert!(window.try_acquire(start + Duration::from_secs(2)));
        assert!(!window.try_acquire(start + Duration::from_secs(3)));
        assert_eq!(window.count(start + Duration::from_secs(3)), 3);
    }

    #[test]
    fn test_slides() {
        let start = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(60), 2);

        assert!(window.try_acquire(start));
        assert!(window.try_acquire(start + Duration::from_secs(30)));
        assert!(window.is_exhausted(start + Duration::from_secs(59)));

        // First hit expires at exactly one window.
        assert!(window.try_acquire(start + Duration::from_secs(60)));
        assert!(!window.try_acquire(start + Duration::from_secs(61)));
    }

    #[test]
    fn test_retry_after() {
        let start = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(60), 1);
        assert_eq!(window.retry_after(start), Duration::ZERO);

        window.record(start);
        assert_eq!(
            window.retry_after(start + Duration::from_secs(20)),
            Duration::from_secs(40)
        );
    }
}
