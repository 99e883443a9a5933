use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json, RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::db::queries;
use crate::error::{AppError, AppResult};
use crate::models::UserDto;
use crate::state::AppState;

// ============================================================================
// Identity service (component 4.B business logic)
// ============================================================================

/// `register(email, username, password)`. Fails with `Conflict` if the email
/// already exists; otherwise stores a bcrypt digest at cost 12 and returns an
/// identity token plus the user view.
pub async fn register_user(
    pool: &sqlx::PgPool,
    email: &str,
    username: &str,
    password: &str,
    secret: &str,
    expires_in: Duration,
) -> AppResult<(UserDto, String)> {
    let password_hash = hash_password(password)?;
    let user = queries::create_user(pool, email, username, &password_hash).await?;
    let token = issue_token(user.id, &user.email, secret, expires_in)?;
    Ok((user.into(), token))
}

/// `login(email, password)`. Constant-time digest compare via bcrypt; returns
/// token + user view, or `AuthFailed` (surfaced as `AppError::Auth`).
pub async fn login_user(
    pool: &sqlx::PgPool,
    email: &str,
    password: &str,
    secret: &str,
    expires_in: Duration,
) -> AppResult<(UserDto, String)> {
    let user = queries::find_user_by_email(pool, email)
        .await?
        .ok_or_else(|| AppError::Auth("Invalid email or password".into()))?;

    if !verify_password(password, &user.password_hash)? {
        return Err(AppError::Auth("Invalid email or password".into()));
    }

    let token = issue_token(user.id, &user.email, secret, expires_in)?;
    Ok((user.into(), token))
}

// ============================================================================
// JWT claims
// ============================================================================

/// A single bearer-token scheme: no refresh-token rotation. Lifetime is
/// `Config::jwt_expires_in`, 7 days by default.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn user_id(&self) -> AppResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Auth("Invalid user ID in token".into()))
    }
}

// ============================================================================
// Token issuance/verification
// ============================================================================

pub fn issue_token(
    user_id: Uuid,
    email: &str,
    secret: &str,
    expires_in: Duration,
) -> AppResult<String> {
    let now = Utc::now();
    let exp = now + chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::days(7));

    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("Failed to issue token: {:?}", e);
        AppError::Auth("Failed to create token".into())
    })
}

pub fn verify_token(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::warn!("Token verification failed: {:?}", e);
        AppError::Auth("Invalid or expired token".into())
    })
}

// ============================================================================
// Password hashing
// ============================================================================

pub fn hash_password(password: &str) -> AppResult<String> {
    bcrypt::hash(password, 12).map_err(|e| {
        tracing::error!("Failed to hash password: {:?}", e);
        AppError::Internal
    })
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    bcrypt::verify(password, hash).map_err(|e| {
        tracing::error!("Failed to verify password: {:?}", e);
        AppError::Internal
    })
}

// ============================================================================
// HTTP extractor
// ============================================================================

/// Authenticated user extracted from a valid bearer token.
///
/// Fields are private: the only valid constructor is the `FromRequestParts`
/// impl, preventing callers from forging an `AuthUser` via struct literal.
pub struct AuthUser {
    user_id: Uuid,
    email: String,
}

impl AuthUser {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

type AuthRejection = (StatusCode, Json<serde_json::Value>);

fn auth_error(message: &str) -> AuthRejection {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| auth_error("Missing or invalid Authorization header"))?;

        let claims = verify_token(bearer.token(), &state.config.jwt_secret)
            .map_err(|_| auth_error("Invalid or expired token"))?;

        let user_id = claims
            .user_id()
            .map_err(|_| auth_error("Invalid token subject"))?;

        Ok(AuthUser {
            user_id,
            email: claims.email,
        })
    }
}

/// Verifies a bearer token against a decoded `{userId, email}` pair, for use
/// on the control channel's `auth` message where there is no HTTP header to
/// extract from.
pub fn verify_bearer(token: &str, secret: &str) -> AppResult<(Uuid, String)> {
    let claims = verify_token(token, secret)?;
    let user_id = claims.user_id()?;
    Ok((user_id, claims.email))
}

// ============================================================================
// Tests
// ============================================================================
