use std::time::Duration;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AppState;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: DatabaseHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_pool: Option<ConnectionPoolHealth>,
    job_queue: QueueHealth,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct ConnectionPoolHealth {
    size: u32,
    idle_connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_connections: Option<u32>,
}

#[derive(Serialize)]
pub struct QueueHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check endpoint
///
/// Checks:
/// - Database connectivity and responsiveness
/// - Connection pool utilization
/// - Job queue reachability
///
/// Returns 200 OK if all systems are healthy, 503 Service Unavailable otherwise.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let deps = &state.deps;

    let (db_health, pool_health) = match &deps.db_pool {
        Some(pool) => {
            let db_health = match tokio::time::timeout(
                CHECK_TIMEOUT,
                sqlx::query("SELECT 1").execute(pool),
            )
            .await
            {
                Ok(Ok(_)) => DatabaseHealth {
                    status: "ok".to_string(),
                    error: None,
                },
                Ok(Err(e)) => DatabaseHealth {
                    status: "error".to_string(),
                    error: Some(format!("Query failed: {}", e)),
                },
                Err(_) => DatabaseHealth {
                    status: "error".to_string(),
                    error: Some("Query timeout (>5s)".to_string()),
                },
            };

            let pool_health = ConnectionPoolHealth {
                size: pool.size(),
                idle_connections: pool.num_idle(),
                max_connections: Some(pool.options().get_max_connections()),
            };

            (db_health, Some(pool_health))
        }
        // In-memory stores
        None => (
            DatabaseHealth {
                status: "ok".to_string(),
                error: None,
            },
            None,
        ),
    };

    // A lookup for a key that never exists exercises the queue backend.
    let queue_health = match tokio::time::timeout(
        CHECK_TIMEOUT,
        deps.job_queue.find_live_by_idempotency_key("health:probe"),
    )
    .await
    {
        Ok(Ok(_)) => QueueHealth {
            status: "ok".to_string(),
            error: None,
        },
        Ok(Err(e)) => QueueHealth {
            status: "error".to_string(),
            error: Some(format!("Queue lookup failed: {:#}", e)),
        },
        Err(_) => QueueHealth {
            status: "error".to_string(),
            error: Some("Queue lookup timeout (>5s)".to_string()),
        },
    };

    let is_healthy = db_health.status == "ok" && queue_health.status == "ok";

    let overall_status = if is_healthy { "healthy" } else { "unhealthy" };

    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: overall_status.to_string(),
            database: db_health,
            connection_pool: pool_health,
            job_queue: queue_health,
        }),
    )
}
