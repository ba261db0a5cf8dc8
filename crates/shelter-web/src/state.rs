use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use shelter_core::RateLimiter;
use tokio_util::sync::CancellationToken;

use crate::config::{RateLimitConfig, ServerConfig};
use crate::notify::Notifier;
use crate::users::UserStore;

/// A single-use password reset token waiting to be redeemed.
pub struct ResetTicket {
    pub username: String,
    pub created_at: Instant,
}

/// One limiter per route group, each with its own key space.
#[derive(Clone)]
pub struct Limiters {
    pub login: Arc<RateLimiter>,
    pub password_reset: Arc<RateLimiter>,
    pub api: Arc<RateLimiter>,
}

impl Limiters {
    /// Builds the limiters and starts their cleanup cycles. Must run inside
    /// a Tokio runtime.
    pub fn start(config: &RateLimitConfig) -> anyhow::Result<Self> {
        Ok(Self {
            login: config.login.start()?,
            password_reset: config.password_reset.start()?,
            api: config.api.start()?,
        })
    }

    pub fn shutdown(&self) {
        self.login.shutdown();
        self.password_reset.shutdown();
        self.api.shutdown();
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub users: Arc<UserStore>,
    pub limiters: Limiters,
    pub notifier: Arc<dyn Notifier>,
    pub reset_tickets: Arc<DashMap<String, ResetTicket>>,
    /// Revoked JWT token IDs (jti). Tokens in this map are rejected by the auth middleware.
    pub revoked_tokens: Arc<DashMap<String, Instant>>,
}

impl AppState {
    pub fn new(config: ServerConfig, notifier: Arc<dyn Notifier>) -> anyhow::Result<Self> {
        let limiters = Limiters::start(&config.rate_limit)?;
        let users = Arc::new(UserStore::from_config(&config.users));

        Ok(Self {
            config: Arc::new(config),
            users,
            limiters,
            notifier,
            reset_tickets: Arc::new(DashMap::new()),
            revoked_tokens: Arc::new(DashMap::new()),
        })
    }

    pub fn reset_token_ttl(&self) -> Duration {
        Duration::from_secs(self.config.auth.reset_token_ttl_minutes.saturating_mul(60))
    }

    /// Drops expired reset tickets and revocations of tokens that have expired anyway.
    pub fn purge_expired(&self) {
        let reset_ttl = self.reset_token_ttl();
        self.reset_tickets
            .retain(|_, t| t.created_at.elapsed() < reset_ttl);

        let jwt_ttl = Duration::from_secs(self.config.auth.jwt_ttl_hours.saturating_mul(3600));
        self.revoked_tokens
            .retain(|_, revoked_at| revoked_at.elapsed() < jwt_ttl);
    }

    /// Runs [`purge_expired`](Self::purge_expired) every minute until the
    /// returned token is cancelled.
    pub fn spawn_maintenance(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let state = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => state.purge_expired(),
                }
            }
            tracing::debug!("Maintenance task stopped");
        });

        cancel
    }
}
