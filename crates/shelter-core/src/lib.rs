//! Shelter core library — transport-agnostic request limiting.
//!
//! `shelter-core` holds the pieces of the volunteer API that do not depend on
//! HTTP: the per-key token-bucket limiter, account password rules and the
//! shared error type. The web crate (`shelter-web`) wires them into axum
//! middleware and handlers.
//!
//! # Modules
//!
//! - [`ratelimit`] — Per-key fixed-window token buckets ([`RateLimiter`]) and
//!   the configuration rule they are built from ([`LimitRule`]).
//! - [`password`] — Minimum length check and argon2 hashing, shared by the
//!   server and the `hash_password` tool.
//! - [`error`] — Unified error type ([`CoreError`]) and result alias ([`CoreResult`]).

pub mod error;
pub mod password;
pub mod ratelimit;

pub use error::{CoreError, CoreResult};
pub use ratelimit::{LimitRule, RateLimiter};
