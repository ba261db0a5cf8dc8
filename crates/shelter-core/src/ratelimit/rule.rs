use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::RateLimiter;
use crate::error::{CoreError, CoreResult};

/// Configured allowance for one group of routes: `requests` per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    pub requests: u32,
    pub window_secs: u64,
}

impl LimitRule {
    pub const fn new(requests: u32, window_secs: u64) -> Self {
        Self {
            requests,
            window_secs,
        }
    }

    /// `requests` per minute.
    pub const fn per_minute(requests: u32) -> Self {
        Self::new(requests, 60)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Builds a limiter for this rule and starts its cleanup cycle.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidRateLimit`](crate::CoreError::InvalidRateLimit) if
    /// either field is zero.
    pub fn start(&self) -> CoreResult<Arc<RateLimiter>> {
        RateLimiter::start(self.requests, self.window())
    }
}

/// Parses `"<requests>/<window_secs>"`, e.g. `"5/60"`.
impl FromStr for LimitRule {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (requests, window) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| CoreError::ConfigParse(format!("expected <requests>/<seconds>, got {s:?}")))?;
        let requests = requests
            .trim()
            .parse()
            .map_err(|e| CoreError::ConfigParse(format!("invalid request count {requests:?}: {e}")))?;
        let window_secs = window
            .trim()
            .trim_end_matches('s')
            .parse()
            .map_err(|e| CoreError::ConfigParse(format!("invalid window {window:?}: {e}")))?;
        Ok(Self::new(requests, window_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_minute_uses_sixty_second_window() {
        let rule = LimitRule::per_minute(5);
        assert_eq!(rule.requests, 5);
        assert_eq!(rule.window(), Duration::from_secs(60));
    }

    #[test]
    fn parses_requests_per_seconds() {
        assert_eq!("5/60".parse::<LimitRule>().unwrap(), LimitRule::new(5, 60));
        assert_eq!(" 3 / 900s ".parse::<LimitRule>().unwrap(), LimitRule::new(3, 900));
    }

    #[test]
    fn parse_rejects_malformed_rules() {
        assert!(matches!("60".parse::<LimitRule>(), Err(CoreError::ConfigParse(_))));
        assert!(matches!("x/60".parse::<LimitRule>(), Err(CoreError::ConfigParse(_))));
        assert!(matches!("5/-1".parse::<LimitRule>(), Err(CoreError::ConfigParse(_))));
    }

    #[tokio::test]
    async fn start_rejects_zero_window() {
        let rule = LimitRule::new(10, 0);
        assert!(rule.start().is_err());
    }

    #[tokio::test]
    async fn start_builds_limiter_with_rule_values() {
        let limiter = LimitRule::new(7, 30).start().unwrap();
        assert_eq!(limiter.rate(), 7);
        assert_eq!(limiter.window(), Duration::from_secs(30));
        limiter.shutdown();
    }
}
