use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    auth::{self, AuthUser},
    db::queries,
    error::{AppError, AppResult},
    models::UserDto,
    state::AppState,
};

// ============================================================================
// Request/response types
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 3, max = 32))]
    pub username: String,
    #[validate(length(min = 8))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserDto,
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /auth/register` → 201 or 400/409.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    req.validate().map_err(|e| AppError::Validation(e.to_string()))?;

    let (user, token) = auth::register_user(
        &state.pool,
        &req.email,
        &req.username,
        &req.password,
        &state.config.jwt_secret,
        state.config.jwt_expires_in,
    )
    .await?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

/// `POST /auth/login` → 200 or 401.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    req.validate().map_err(|e| AppError::Validation(e.to_string()))?;

    let (user, token) = auth::login_user(
        &state.pool,
        &req.email,
        &req.password,
        &state.config.jwt_secret,
        state.config.jwt_expires_in,
    )
    .await?;

    tracing::info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthResponse { token, user }))
}

/// `GET /auth/me` → 200 user or 401/404.
pub async fn me(State(state): State<AppState>, auth_user: AuthUser) -> AppResult<Json<UserDto>> {
    let user = queries::find_user_by_id(&state.pool, auth_user.user_id())
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(user.into()))
}
