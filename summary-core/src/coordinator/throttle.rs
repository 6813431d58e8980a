//! Start throttling
//!
//! Exponential backoff over a sliding window of recent attempts, used to
//! keep a failing summarizer from reconnecting in a tight loop.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Maps the number of recent attempts to a delay
pub type DelayFn = Arc<dyn Fn(usize) -> Duration + Send + Sync>;

/// Default backoff: 0ms, 20ms, 60ms, 140ms, 300ms, ...
pub fn default_delay_fn(attempts: usize) -> Duration {
    let factor = u32::try_from(attempts)
        .ok()
        .and_then(|n| 2u64.checked_pow(n))
        .unwrap_or(u64::MAX);
    Duration::from_millis(20u64.saturating_mul(factor - 1))
}

/// Configuration for the throttler
#[derive(Clone)]
pub struct ThrottleConfig {
    /// Attempts older than this no longer count
    pub delay_window: Duration,
    /// Upper bound on any returned delay
    pub max_delay: Duration,
    /// Delay for a given number of recent attempts
    pub delay_fn: DelayFn,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            delay_window: Duration::from_secs(60),
            max_delay: Duration::from_secs(30),
            delay_fn: Arc::new(default_delay_fn),
        }
    }
}

impl fmt::Debug for ThrottleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleConfig")
            .field("delay_window", &self.delay_window)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

/// Backoff calculator over a sliding window
///
/// Every delay handed out pushes all retained attempts forward by that
/// delay, so a burst of attempts ages out together once the last delay has
/// passed.
#[derive(Debug)]
pub struct Throttler {
    config: ThrottleConfig,
    start_times: VecDeque<Instant>,
}

impl Throttler {
    /// Create a new throttler
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            start_times: VecDeque::new(),
        }
    }

    /// Number of attempts still inside the window
    pub fn attempts(&self) -> usize {
        self.start_times.len()
    }

    /// Configured maximum delay
    pub fn max_delay(&self) -> Duration {
        self.config.max_delay
    }

    /// Record an attempt and return how long it should wait
    pub fn get_delay(&mut self) -> Duration {
        let now = Instant::now();
        let window = self.config.delay_window;
        self.start_times
            .retain(|&t| now.saturating_duration_since(t) < window);

        let delay = (self.config.delay_fn)(self.start_times.len()).min(self.config.max_delay);
        self.start_times.push_back(now);
        for start in self.start_times.iter_mut() {
            *start = start.checked_add(delay).unwrap_or(*start);
        }

        if delay == self.config.max_delay {
            // Already pinned at max; more history changes nothing
            self.start_times.pop_front();
        }

        delay
    }
}

impl Default for Throttler {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delay_fn() {
        let delays: Vec<u64> = (0..5)
            .map(|n| default_delay_fn(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![0, 20, 60, 140, 300]);
        assert_eq!(default_delay_fn(usize::MAX), Duration::from_millis(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_grow_within_window() {
        let mut throttler = Throttler::default();
        let delays: Vec<u64> = (0..4)
            .map(|_| throttler.get_delay().as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![0, 20, 60, 140]);
        assert_eq!(throttler.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capped_at_max_delay() {
        let mut throttler = Throttler::new(ThrottleConfig {
            max_delay: Duration::from_millis(100),
            ..Default::default()
        });

        let mut last = Duration::ZERO;
        for _ in 0..20 {
            let delay = throttler.get_delay();
            assert!(delay >= last);
            assert!(delay <= Duration::from_millis(100));
            last = delay;
        }
        assert_eq!(last, Duration::from_millis(100));
        // History stops growing once pinned at max
        assert_eq!(throttler.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resets_after_window() {
        let mut throttler = Throttler::default();
        for _ in 0..3 {
            throttler.get_delay();
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(throttler.get_delay(), Duration::ZERO);
        assert_eq!(throttler.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_shifts_earlier_attempts() {
        let mut throttler = Throttler::default();
        assert_eq!(throttler.get_delay(), Duration::ZERO);
        assert_eq!(throttler.get_delay(), Duration::from_millis(20));

        // Both attempts now sit at +20ms, so neither has left the window
        tokio::time::advance(Duration::from_millis(60_001)).await;
        assert_eq!(throttler.get_delay(), Duration::from_millis(60));
        assert_eq!(throttler.attempts(), 3);
    }
}
