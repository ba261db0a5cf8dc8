//! Per-key token accounting.

use std::time::Duration;

use tokio::time::Instant;

/// Allowance for a single key.
///
/// A bucket starts full and is refilled all at once when a whole window has
/// passed since the last refill. Between refills each admitted request takes
/// one token; once `tokens` reaches zero every request is denied until the
/// next window boundary.
#[derive(Debug, Clone)]
pub(crate) struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

impl Bucket {
    /// Creates a full bucket for a key first seen at `now`.
    pub(crate) fn full(rate: u32, now: Instant) -> Self {
        Self {
            tokens: rate,
            last_refill: now,
        }
    }

    /// Refills if a window has elapsed, then takes one token if any remain.
    pub(crate) fn try_take(&mut self, rate: u32, window: Duration, now: Instant) -> bool {
        self.refill(rate, window, now);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Tokens that would be available to a request arriving at `now`.
    pub(crate) fn available(&self, rate: u32, window: Duration, now: Instant) -> u32 {
        if now.saturating_duration_since(self.last_refill) >= window {
            rate
        } else {
            self.tokens
        }
    }

    /// Time from `now` until the next refill, zero if one is already due.
    pub(crate) fn refill_in(&self, window: Duration, now: Instant) -> Duration {
        window.saturating_sub(now.saturating_duration_since(self.last_refill))
    }

    /// Whether the bucket has been idle long enough to be dropped.
    pub(crate) fn is_stale(&self, max_idle: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_refill) > max_idle
    }

    // `now` earlier than `last_refill` (a caller that read the clock before
    // another caller refilled) saturates to zero, so `last_refill` never moves back.
    fn refill(&mut self, rate: u32, window: Duration, now: Instant) {
        if now.saturating_duration_since(self.last_refill) >= window {
            self.tokens = rate;
            self.last_refill = now;
        }
    }

    #[cfg(test)]
    pub(crate) fn tokens(&self) -> u32 {
        self.tokens
    }

    #[cfg(test)]
    pub(crate) fn last_refill(&self) -> Instant {
        self.last_refill
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn new_bucket_is_full() {
        let now = Instant::now();
        let bucket = Bucket::full(5, now);
        assert_eq!(bucket.tokens(), 5);
        assert_eq!(bucket.last_refill(), now);
    }

    #[test]
    fn take_decrements_until_empty() {
        let now = Instant::now();
        let mut bucket = Bucket::full(2, now);

        assert!(bucket.try_take(2, WINDOW, now));
        assert_eq!(bucket.tokens(), 1);
        assert!(bucket.try_take(2, WINDOW, now));
        assert_eq!(bucket.tokens(), 0);
        assert!(!bucket.try_take(2, WINDOW, now));
        assert_eq!(bucket.tokens(), 0);
    }

    #[test]
    fn refill_happens_exactly_at_window_boundary() {
        let start = Instant::now();
        let mut bucket = Bucket::full(1, start);
        assert!(bucket.try_take(1, WINDOW, start));

        let just_before = start + WINDOW - Duration::from_millis(1);
        assert!(!bucket.try_take(1, WINDOW, just_before));
        assert_eq!(bucket.last_refill(), start);

        let boundary = start + WINDOW;
        assert!(bucket.try_take(1, WINDOW, boundary));
        assert_eq!(bucket.last_refill(), boundary);
    }

    #[test]
    fn refill_is_a_full_reset_not_a_trickle() {
        let start = Instant::now();
        let mut bucket = Bucket::full(4, start);
        for _ in 0..4 {
            assert!(bucket.try_take(4, WINDOW, start));
        }

        let later = start + WINDOW * 3;
        assert!(bucket.try_take(4, WINDOW, later));
        assert_eq!(bucket.tokens(), 3);
    }

    #[test]
    fn earlier_clock_reading_does_not_rewind_last_refill() {
        let start = Instant::now();
        let refill_at = start + WINDOW;
        let mut bucket = Bucket::full(3, start);
        assert!(bucket.try_take(3, WINDOW, refill_at));

        assert!(bucket.try_take(3, WINDOW, start + Duration::from_secs(30)));
        assert_eq!(bucket.last_refill(), refill_at);
    }

    #[test]
    fn available_reports_pending_refill() {
        let start = Instant::now();
        let mut bucket = Bucket::full(2, start);
        bucket.try_take(2, WINDOW, start);
        bucket.try_take(2, WINDOW, start);

        assert_eq!(bucket.available(2, WINDOW, start), 0);
        assert_eq!(bucket.available(2, WINDOW, start + WINDOW), 2);
    }

    #[test]
    fn refill_in_counts_down_to_next_window() {
        let start = Instant::now();
        let bucket = Bucket::full(1, start);

        assert_eq!(bucket.refill_in(WINDOW, start), WINDOW);
        assert_eq!(
            bucket.refill_in(WINDOW, start + Duration::from_secs(45)),
            Duration::from_secs(15)
        );
        assert_eq!(bucket.refill_in(WINDOW, start + WINDOW * 2), Duration::ZERO);
    }

    #[test]
    fn staleness_is_strictly_older_than_max_idle() {
        let start = Instant::now();
        let bucket = Bucket::full(1, start);
        let max_idle = WINDOW * 2;

        assert!(!bucket.is_stale(max_idle, start + max_idle));
        assert!(bucket.is_stale(max_idle, start + max_idle + Duration::from_millis(1)));
    }
}
