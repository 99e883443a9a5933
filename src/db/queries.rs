//! Parameterized statements over the connection pool (component 4.A).
//!
//! Every function here acquires a connection on demand from the shared pool
//! and maps driver errors through `AppError::from(sqlx::Error)`, which
//! distinguishes unique-constraint violations (409 Conflict) from generic
//! storage failures.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Capabilities, Machine, Platform, User};

// ============================================================================
// Users
// ============================================================================

pub async fn create_user(
    pool: &PgPool,
    email: &str,
    username: &str,
    password_hash: &str,
) -> AppResult<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, username, password_hash, created_at, updated_at)
        VALUES (gen_random_uuid(), $1, $2, $3, now(), now())
        RETURNING id, email, username, password_hash, created_at, updated_at
        "#,
    )
    .bind(email.to_lowercase())
    .bind(username)
    .bind(password_hash)
    .fetch_one(pool)
    .await?;

    Ok(user)
}

pub async fn find_user_by_email(pool: &PgPool, email: &str) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, username, password_hash, created_at, updated_at
        FROM users WHERE email = $1
        "#,
    )
    .bind(email.to_lowercase())
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

pub async fn find_user_by_id(pool: &PgPool, id: Uuid) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, username, password_hash, created_at, updated_at
        FROM users WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

// ============================================================================
// Machines
// ============================================================================

/// Upsert on `(user_id, name)`: refreshes platform/capabilities, flips
/// `is_online := true`, and bumps `last_seen`.
pub async fn upsert_machine(
    pool: &PgPool,
    user_id: Uuid,
    name: &str,
    platform: Platform,
    capabilities: Capabilities,
) -> AppResult<Machine> {
    let machine = sqlx::query_as::<_, Machine>(
        r#"
        INSERT INTO machines (id, user_id, name, platform, capabilities, last_seen, is_online, created_at)
        VALUES (gen_random_uuid(), $1, $2, $3, $4, now(), true, now())
        ON CONFLICT (user_id, name) DO UPDATE
        SET platform = EXCLUDED.platform,
            capabilities = EXCLUDED.capabilities,
            is_online = true,
            last_seen = now()
        RETURNING id, user_id, name, platform, capabilities, last_seen, is_online, created_at
        "#,
    )
    .bind(user_id)
    .bind(name)
    .bind(platform)
    .bind(Json(capabilities))
    .fetch_one(pool)
    .await?;

    Ok(machine)
}

pub async fn set_online(pool: &PgPool, id: Uuid, online: bool) -> AppResult<()> {
    sqlx::query("UPDATE machines SET is_online = $2, last_seen = now() WHERE id = $1")
        .bind(id)
        .bind(online)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn touch_last_seen(pool: &PgPool, id: Uuid) -> AppResult<()> {
    sqlx::query("UPDATE machines SET last_seen = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn list_machines_by_user(pool: &PgPool, user_id: Uuid) -> AppResult<Vec<Machine>> {
    let machines = sqlx::query_as::<_, Machine>(
        r#"
        SELECT id, user_id, name, platform, capabilities, last_seen, is_online, created_at
        FROM machines WHERE user_id = $1 ORDER BY name
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(machines)
}

pub async fn get_machine(pool: &PgPool, id: Uuid) -> AppResult<Option<Machine>> {
    let machine = sqlx::query_as::<_, Machine>(
        r#"
        SELECT id, user_id, name, platform, capabilities, last_seen, is_online, created_at
        FROM machines WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(machine)
}

/// Atomically flips every currently-online machine whose `last_seen` is
/// older than `timeout` to offline, returning the transitioned ids.
pub async fn sweep_stale(pool: &PgPool, timeout: chrono::Duration) -> AppResult<Vec<Uuid>> {
    let cutoff: DateTime<Utc> = Utc::now() - timeout;

    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        UPDATE machines
        SET is_online = false
        WHERE is_online = true AND last_seen < $1
        RETURNING id
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Delete scoped by owner. Returns whether a row was actually removed.
pub async fn delete_machine(pool: &PgPool, user_id: Uuid, id: Uuid) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM machines WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Rename scoped by owner. Returns whether a row was actually renamed.
pub async fn rename_machine(
    pool: &PgPool,
    user_id: Uuid,
    id: Uuid,
    new_name: &str,
) -> AppResult<bool> {
    let result = sqlx::query("UPDATE machines SET name = $3 WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .bind(new_name)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
