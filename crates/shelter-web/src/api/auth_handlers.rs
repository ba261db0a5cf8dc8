use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rand::distributions::Alphanumeric;
use rand::Rng;
use shelter_core::password;

use crate::auth::jwt;
use crate::dto::*;
use crate::error::AppError;
use crate::state::{AppState, ResetTicket};

const RESET_TOKEN_LEN: usize = 32;

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let user = state.users.get(&body.username).ok_or_else(|| {
        tracing::warn!("Failed login attempt for unknown user: {}", body.username);
        AppError::Auth("Invalid credentials".to_string())
    })?;

    let hash = user.password_hash;
    let password = body.password;

    let valid = tokio::task::spawn_blocking(move || password::verify_password(&hash, &password))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    if !valid {
        tracing::warn!("Failed login attempt for user: {}", user.username);
        return Err(AppError::Auth("Invalid credentials".to_string()));
    }

    let (token, expires_at) = jwt::create_token(
        &state.config.auth.jwt_secret,
        state.config.auth.jwt_ttl_hours,
        &user.username,
    )?;

    tracing::info!("User logged in: {}", user.username);
    Ok(Json(LoginResponse { token, expires_at }))
}

/// Logout handler that accepts the token from either the Authorization header
/// or the JSON body `{ "token": "..." }`, so it also works from
/// `navigator.sendBeacon` (body only).
pub async fn logout(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let token = crate::auth::middleware::bearer_token(&headers)
        .map(|s| s.to_string())
        .or_else(|| {
            serde_json::from_slice::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("token")?.as_str().map(String::from))
        });

    let Some(token) = token else {
        return Ok(Json(serde_json::json!({ "success": true })));
    };

    if let Ok(claims) = jwt::verify_token(&state.config.auth.jwt_secret, &token) {
        state
            .revoked_tokens
            .insert(claims.jti.clone(), Instant::now());
        tracing::info!(
            "Token revoked for user: {} (jti: {})",
            claims.sub,
            claims.jti
        );
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

/// Issues a single-use reset token to the account's email address.
///
/// Always answers `202 Accepted` so the response does not reveal whether the
/// account exists.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(body): Json<PasswordResetRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let accepted = (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "success": true })),
    );

    let Some(user) = state.users.get(&body.username) else {
        tracing::info!("Password reset requested for unknown user: {}", body.username);
        return accepted;
    };
    let Some(email) = user.email else {
        tracing::warn!("Password reset requested for {} but no email is on file", user.username);
        return accepted;
    };

    let token = generate_reset_token();
    state.reset_tickets.insert(
        token.clone(),
        ResetTicket {
            username: user.username.clone(),
            created_at: Instant::now(),
        },
    );

    let message = format!(
        "A password reset was requested for your shelter volunteer account.\n\n\
         Reset code: {token}\n\n\
         The code expires in {} minutes. If you did not ask for this, ignore this message.",
        state.config.auth.reset_token_ttl_minutes
    );
    if let Err(e) = state.notifier.send(&email, "Password reset", &message) {
        tracing::error!("Failed to send password reset for {}: {e:#}", user.username);
    }

    accepted
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(body): Json<PasswordResetConfirm>,
) -> Result<Json<serde_json::Value>, AppError> {
    password::check_length(&body.new_password)?;

    let (_, ticket) = state
        .reset_tickets
        .remove(&body.token)
        .ok_or_else(|| AppError::Auth("Invalid or expired reset token".to_string()))?;

    if ticket.created_at.elapsed() > state.reset_token_ttl() {
        return Err(AppError::Auth("Invalid or expired reset token".to_string()));
    }

    let new_password = body.new_password;
    let hash = tokio::task::spawn_blocking(move || password::hash_password(&new_password))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    if !state.users.set_password_hash(&ticket.username, hash) {
        return Err(AppError::NotFound("User no longer exists".to_string()));
    }

    tracing::info!("Password reset completed for user: {}", ticket.username);
    Ok(Json(serde_json::json!({ "success": true })))
}

fn generate_reset_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LEN)
        .map(char::from)
        .collect()
}
