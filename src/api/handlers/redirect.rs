//! Handler for short URL redirect.

use axum::{
    extract::{Path, State},
    response::Redirect,
};
use serde_json::json;
use tracing::debug;

use crate::error::AppError;
use crate::state::AppState;

/// Redirects a short code to its destination.
///
/// # Endpoint
///
/// `GET /{code}`
///
/// Codes outside the configured code space are rejected without touching the
/// database.
///
/// # Errors
///
/// - 404 if the code is malformed or unknown
/// - 410 if the link has expired
pub async fn redirect_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
) -> Result<Redirect, AppError> {
    if !state.code_allocator.space().is_valid_code(&code) {
        return Err(AppError::not_found(
            "Short link not found",
            json!({ "code": code }),
        ));
    }

    let link = state.link_service.resolve(&code).await?;
    debug!(%code, "Redirecting");

    Ok(Redirect::temporary(&link.long_url))
}
