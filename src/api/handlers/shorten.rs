//! Handler for link shortening endpoint.

use axum::{Json, extract::State, http::StatusCode};
use chrono::Duration;
use serde_json::json;
use validator::Validate;

use crate::api::dto::shorten::{ShortenRequest, ShortenResponse};
use crate::error::AppError;
use crate::state::AppState;

/// Creates a short link for one URL.
///
/// # Endpoint
///
/// `POST /api/shorten`
///
/// ```json
/// { "url": "https://example.com/docs", "ttl_seconds": 86400 }
/// ```
///
/// # Response
///
/// `201 Created`
///
/// ```json
/// {
///   "code": "x7Gk2-0",
///   "short_url": "https://s.example.com/x7Gk2-0",
///   "long_url": "https://example.com/docs",
///   "expires_at": "2026-01-02T00:00:00Z"
/// }
/// ```
///
/// A request without a lifetime (and no server default) reuses the permanent
/// short link already stored for the URL, if any. Requests with a lifetime
/// always get a fresh code.
///
/// # Errors
///
/// - 400 if the body fails validation
/// - 503 if no more codes can be allocated
pub async fn shorten_handler(
    State(state): State<AppState>,
    Json(payload): Json<ShortenRequest>,
) -> Result<(StatusCode, Json<ShortenResponse>), AppError> {
    payload.validate()?;

    let ttl = payload
        .ttl_seconds
        .map(|secs| {
            i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .ok_or_else(|| {
                    AppError::bad_request("TTL out of range", json!({ "ttl_seconds": secs }))
                })
        })
        .transpose()?;

    let link = state
        .link_service
        .create_short_link(&payload.url, ttl)
        .await?;

    let short_url = state.link_service.short_url(&state.base_url, &link.code);

    Ok((
        StatusCode::CREATED,
        Json(ShortenResponse {
            code: link.code,
            short_url,
            long_url: link.long_url,
            expires_at: link.expires_at,
        }),
    ))
}
