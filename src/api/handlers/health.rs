//! Handler for health check endpoint.

use axum::{Json, extract::State, http::StatusCode};

use crate::api::dto::health::{AllocatorCheck, CheckStatus, HealthChecks, HealthResponse};
use crate::state::AppState;

/// Returns service health with per-component checks.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response Codes
///
/// - **200 OK**: database reachable and at least one range can be lent out
/// - **503 Service Unavailable**: otherwise
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "checks": {
///     "database": { "status": "ok" },
///     "allocator": {
///       "status": "ok",
///       "idle_ranges": 5455,
///       "leased_ranges": 1,
///       "leaked_ranges": 0,
///       "retired_ranges": 0
///     }
///   }
/// }
/// ```
pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let database = check_database(&state).await;
    let allocator = check_allocator(&state);

    let all_healthy = database.status == "ok" && allocator.status == "ok";

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database,
            allocator,
        },
    };

    if all_healthy {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

async fn check_database(state: &AppState) -> CheckStatus {
    match state.link_service.check_storage().await {
        Ok(()) => CheckStatus {
            status: "ok".to_string(),
            message: None,
        },
        Err(e) => CheckStatus {
            status: "error".to_string(),
            message: Some(format!("Database error: {}", e)),
        },
    }
}

fn check_allocator(state: &AppState) -> AllocatorCheck {
    let stats = state.code_allocator.allocator().stats();
    let usable = stats.idle + stats.leased;

    AllocatorCheck {
        status: if usable > 0 { "ok" } else { "exhausted" }.to_string(),
        idle_ranges: stats.idle,
        leased_ranges: stats.leased,
        leaked_ranges: stats.leaked,
        retired_ranges: stats.retired,
    }
}
