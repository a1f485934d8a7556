use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use rankguard_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub outbox: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

/// Ready only when the database answers. A growing outbox backlog is
/// reported but does not fail the check.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let outbox = outbox_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "rankguard-server runtime initialized".to_string(),
        },
        database,
        outbox,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn outbox_check(pool: &DbPool) -> HealthCheck {
    let pending = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM notification_outbox WHERE dispatched_at IS NULL",
    )
    .fetch_one(pool)
    .await;

    match pending {
        Ok(0) => {
            HealthCheck { status: "ready", detail: "no undelivered notifications".to_string() }
        }
        Ok(count) => HealthCheck {
            status: "backlogged",
            detail: format!("{count} notification(s) awaiting delivery"),
        },
        Err(error) => {
            HealthCheck { status: "unknown", detail: format!("outbox query failed: {error}") }
        }
    }
}
