use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::AppError;
use crate::state::AppState;

/// Identity of the caller, placed in request extensions by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub sub: String,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Validates the bearer token and records the caller as an [`AuthUser`]
/// extension for later layers (the per-user rate limiter) and handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| AppError::Auth("Missing or malformed authorization header".to_string()))?;

    let claims = super::jwt::verify_token(&state.config.auth.jwt_secret, token)
        .map_err(|_| AppError::Auth("Invalid or expired token".to_string()))?;

    if state.revoked_tokens.contains_key(&claims.jti) {
        return Err(AppError::Auth("Token has been revoked".to_string()));
    }

    req.extensions_mut().insert(AuthUser { sub: claims.sub });

    Ok(next.run(req).await)
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::Auth("Authentication required".to_string()))
    }
}
