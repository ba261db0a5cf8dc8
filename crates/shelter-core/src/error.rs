//! Error types for `shelter-core`.
//!
//! All fallible operations in the core library return [`CoreResult<T>`],
//! which is an alias for `Result<T, CoreError>`.

/// Unified error type for all core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A limiter was configured with a zero rate or a zero window.
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),

    /// A configuration value could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// A new password is shorter than the accepted minimum.
    #[error("password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    /// A password hash could not be produced or parsed.
    #[error("password hash error: {0}")]
    PasswordHash(String),
}

/// Convenience alias used throughout `shelter-core`.
pub type CoreResult<T> = Result<T, CoreError>;
