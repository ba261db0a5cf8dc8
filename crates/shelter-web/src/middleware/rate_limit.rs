//! Request-pipeline adapters around [`RateLimiter`].
//!
//! Each adapter is installed with `axum::middleware::from_fn_with_state`
//! and a [`RequestLimiter`] built from one of the limiters in
//! [`Limiters`](crate::state::Limiters). A denied request is answered with
//! `429 Too Many Requests` and never reaches the inner handler.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::HeaderValue;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use shelter_core::RateLimiter;

use crate::auth::middleware::AuthUser;
use crate::error::AppError;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Middleware state: a shared limiter plus how to find the client address.
#[derive(Clone)]
pub struct RequestLimiter {
    limiter: Arc<RateLimiter>,
    forwarded_hops: usize,
}

impl RequestLimiter {
    /// `forwarded_hops` is the number of trusted reverse proxies; zero keys
    /// on the socket peer and ignores forwarding headers.
    pub fn new(limiter: Arc<RateLimiter>, forwarded_hops: usize) -> Self {
        Self {
            limiter,
            forwarded_hops,
        }
    }

    async fn admit(&self, key: &str, req: Request, next: Next) -> Response {
        if !self.limiter.allow(key) {
            tracing::warn!(key, path = %req.uri().path(), "Rate limit exceeded");
            return AppError::RateLimited {
                retry_after_secs: self.retry_after_secs(key),
            }
            .into_response();
        }

        let remaining = self.limiter.remaining(key).unwrap_or(0);
        let mut response = next.run(req).await;
        let headers = response.headers_mut();
        headers.insert(LIMIT_HEADER, HeaderValue::from(self.limiter.rate()));
        headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
        response
    }

    // Until the key's next refill, in whole seconds rounded up, at least one.
    fn retry_after_secs(&self, key: &str) -> u64 {
        let wait = self
            .limiter
            .retry_after(key)
            .unwrap_or_else(|| self.limiter.window());
        ceil_secs(wait).max(1)
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

/// Limits by client IP address.
pub async fn per_ip(State(limiter): State<RequestLimiter>, req: Request, next: Next) -> Response {
    let key = client_ip(&req, limiter.forwarded_hops);
    limiter.admit(&key, req, next).await
}

/// Limits by authenticated user, falling back to the client IP when no
/// [`AuthUser`] was recorded by an earlier layer.
pub async fn per_user(State(limiter): State<RequestLimiter>, req: Request, next: Next) -> Response {
    let key = match req.extensions().get::<AuthUser>() {
        Some(user) => format!("user:{}", user.sub),
        None => format!("ip:{}", client_ip(&req, limiter.forwarded_hops)),
    };
    limiter.admit(&key, req, next).await
}

/// Client address used as the per-IP key, or `"unknown"` if none is available.
///
/// With `forwarded_hops` > 0 the address comes from `X-Forwarded-For`, counted
/// that many entries from the right, then `X-Real-IP`, then the socket peer.
pub fn client_ip(req: &Request, forwarded_hops: usize) -> String {
    if forwarded_hops > 0 {
        if let Some(ip) = forwarded_ip(req.headers(), forwarded_hops) {
            return ip.to_string();
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// Each proxy appends the address it saw, so entries left of the last `hops`
// were written by the client and are never used.
fn forwarded_ip(headers: &HeaderMap, hops: usize) -> Option<IpAddr> {
    let chain: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();

    let from_chain = chain
        .len()
        .checked_sub(hops)
        .and_then(|i| chain[i].parse::<IpAddr>().ok());

    from_chain.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    })
}
