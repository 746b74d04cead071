//! DTOs for health check endpoint.

use serde::{Deserialize, Serialize};

/// Health check response with component status.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub database: CheckStatus,
    pub allocator: AllocatorCheck,
}

/// Individual component health status.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckStatus {
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Working set of the range allocator.
///
/// `ok` while at least one range can still be lent out.
#[derive(Debug, Serialize, Deserialize)]
pub struct AllocatorCheck {
    pub status: String,
    pub idle_ranges: usize,
    pub leased_ranges: usize,
    pub leaked_ranges: usize,
    pub retired_ranges: usize,
}
