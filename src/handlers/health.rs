use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /health` → `{status:"ok", clients:<n>}`.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db_ok = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = ?e, "health check: database query failed");
            false
        }
    };

    let status = if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let clients = state.connections.count().await;

    (
        status,
        Json(json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "clients": clients,
            "database": if db_ok { "ok" } else { "unavailable" },
        })),
    )
}
