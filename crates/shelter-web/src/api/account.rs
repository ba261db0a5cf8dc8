use axum::extract::State;
use axum::Json;

use crate::auth::middleware::AuthUser;
use crate::dto::MeResponse;
use crate::error::AppError;
use crate::state::AppState;

pub async fn me(user: AuthUser, State(state): State<AppState>) -> Result<Json<MeResponse>, AppError> {
    let record = state
        .users
        .get(&user.sub)
        .ok_or_else(|| AppError::NotFound(format!("No account for {}", user.sub)))?;

    Ok(Json(MeResponse {
        username: record.username,
        email: record.email,
    }))
}
