//! Per-key request limiting with fixed-window token buckets.
//!
//! A [`RateLimiter`] admits at most `rate` requests per `window` for each key
//! (a client IP, or a user identifier). Buckets are created on first use with
//! a full allowance and refilled all at once when a whole window has passed
//! since their last refill. Because the refill is a reset rather than a
//! continuous trickle, a client can spend a full allowance just before a
//! window boundary and another one just after it, so up to `2 × rate`
//! requests may be admitted in a short span around the boundary.
//!
//! # Locking
//!
//! The key → bucket map is a sharded [`DashMap`]; its shard lock only guards
//! map structure. Each bucket carries its own mutex for the token counters,
//! so requests for different keys never contend on the same counter lock.
//! Both [`RateLimiter::allow`] and [`RateLimiter::cleanup`] take the shard
//! lock before any bucket lock.

mod bucket;
mod rule;

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use bucket::Bucket;

pub use rule::LimitRule;

/// Buckets idle for longer than this many windows are dropped by a sweep.
const STALE_AFTER_WINDOWS: u32 = 2;

/// The background sweep runs once every this many windows.
const CLEANUP_EVERY_WINDOWS: u32 = 10;

/// In-memory per-key rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    rate: u32,
    window: Duration,
    buckets: DashMap<String, Mutex<Bucket>>,
    shutdown: CancellationToken,
}

impl RateLimiter {
    /// Creates a limiter admitting `rate` requests per `window` for each key.
    ///
    /// No background work is started; call [`cleanup`](Self::cleanup)
    /// yourself or use [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidRateLimit`] if `rate` is zero or `window` is empty.
    pub fn new(rate: u32, window: Duration) -> CoreResult<Self> {
        if rate == 0 {
            return Err(CoreError::InvalidRateLimit(
                "rate must be at least one request per window".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(CoreError::InvalidRateLimit(
                "window must be longer than zero".to_string(),
            ));
        }
        Ok(Self {
            rate,
            window,
            buckets: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Creates a limiter from a configured [`LimitRule`] without starting a
    /// sweep.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn from_rule(rule: &LimitRule) -> CoreResult<Self> {
        Self::new(rule.requests, rule.window())
    }

    /// Creates a limiter and spawns its periodic stale-bucket sweep.
    ///
    /// The sweep runs every `window × 10` until [`shutdown`](Self::shutdown)
    /// is called or the last `Arc` is dropped.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(rate: u32, window: Duration) -> CoreResult<Arc<Self>> {
        let limiter = Arc::new(Self::new(rate, window)?);
        spawn_cleanup(
            Arc::downgrade(&limiter),
            limiter.cleanup_interval(),
            limiter.shutdown.clone(),
        );
        tracing::debug!(
            rate,
            window_secs = window.as_secs_f64(),
            "rate limiter started"
        );
        Ok(limiter)
    }

    /// Records a request for `key` and returns whether it is admitted.
    ///
    /// Any string is a valid key, including the empty string.
    pub fn allow(&self, key: &str) -> bool {
        let bucket = match self.buckets.get(key) {
            Some(bucket) => bucket,
            None => self
                .buckets
                .entry(key.to_owned())
                .or_insert_with(|| Mutex::new(Bucket::full(self.rate, Instant::now())))
                .downgrade(),
        };
        let allowed = bucket
            .lock()
            .try_take(self.rate, self.window, Instant::now());
        allowed
    }

    /// Allowance left for `key` without consuming any, or `None` if the key
    /// has no bucket.
    pub fn remaining(&self, key: &str) -> Option<u32> {
        let bucket = self.buckets.get(key)?;
        let available = bucket
            .lock()
            .available(self.rate, self.window, Instant::now());
        Some(available)
    }

    /// How long until `key` gets a fresh allowance, or `None` if the key has
    /// no bucket. Zero when a refill is already due.
    pub fn retry_after(&self, key: &str) -> Option<Duration> {
        let bucket = self.buckets.get(key)?;
        let wait = bucket.lock().refill_in(self.window, Instant::now());
        Some(wait)
    }

    /// Drops every bucket whose last refill is older than `2 × window` and
    /// returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let max_idle = self.window.saturating_mul(STALE_AFTER_WINDOWS);
        let mut removed = 0;
        self.buckets.retain(|_, bucket| {
            let stale = bucket.get_mut().is_stale(max_idle, now);
            if stale {
                removed += 1;
            }
            !stale
        });
        removed
    }

    /// Stops the background sweep started by [`start`](Self::start).
    ///
    /// [`allow`](Self::allow) keeps working; stale buckets are simply no
    /// longer reclaimed.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn cleanup_interval(&self) -> Duration {
        self.window.saturating_mul(CLEANUP_EVERY_WINDOWS)
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Sweeps stale buckets every `period` until `shutdown` fires or the limiter
/// is gone. Holds only a weak reference so it never keeps the limiter alive.
fn spawn_cleanup(limiter: Weak<RateLimiter>, period: Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let first_tick = Instant::now()
            .checked_add(period)
            .unwrap_or_else(Instant::now);
        let mut ticker = tokio::time::interval_at(first_tick, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(limiter) = limiter.upgrade() else {
                        break;
                    };
                    let removed = limiter.cleanup();
                    if removed > 0 {
                        tracing::debug!(
                            removed,
                            remaining = limiter.len(),
                            "Removed stale rate limit buckets"
                        );
                    }
                }
            }
        }

        tracing::debug!("rate limiter cleanup stopped");
    });
}
