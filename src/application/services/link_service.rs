//! Link creation and resolution service.

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::allocation::ShortCodeSource;
use crate::domain::entities::{Link, NewLink};
use crate::domain::repositories::LinkRepository;
use crate::error::AppError;
use crate::utils::url_normalizer::normalize_url;

/// Longest lifetime a link may be given: ten years.
pub const MAX_LINK_TTL_SECONDS: u64 = 315_360_000;

/// Service for creating and resolving shortened links.
///
/// Short codes come from a [`ShortCodeSource`], which guarantees uniqueness,
/// so creation never checks the repository for collisions.
pub struct LinkService {
    link_repository: Arc<dyn LinkRepository>,
    codes: Arc<dyn ShortCodeSource>,
    default_ttl: Option<Duration>,
}

impl LinkService {
    /// Creates a new link service.
    ///
    /// `default_ttl` applies when a caller does not pick a lifetime; `None`
    /// means links never expire.
    pub fn new(
        link_repository: Arc<dyn LinkRepository>,
        codes: Arc<dyn ShortCodeSource>,
        default_ttl: Option<Duration>,
    ) -> Self {
        Self {
            link_repository,
            codes,
            default_ttl,
        }
    }

    /// Creates a short link.
    ///
    /// `ttl` overrides the service default; when neither is set the link never
    /// expires. Only such permanent links are deduplicated: a permanent link
    /// already pointing at the same normalized URL is returned as is. A link
    /// with a lifetime is always new, so callers never receive a lifetime
    /// someone else picked.
    ///
    /// Exactly one code is allocated per newly stored link.
    ///
    /// # Errors
    ///
    /// - [`AppError::Validation`] if the URL is not an absolute http(s) URL,
    ///   or the lifetime ends past the representable date range
    /// - [`AppError::Unavailable`] if no more codes can be allocated
    /// - [`AppError::Internal`] on storage failures
    pub async fn create_short_link(
        &self,
        long_url: &str,
        ttl: Option<Duration>,
    ) -> Result<Link, AppError> {
        let normalized_url = normalize_url(long_url).map_err(|e| {
            AppError::bad_request("Invalid URL format", json!({ "reason": e.to_string() }))
        })?;

        let expires_at = match ttl.or(self.default_ttl) {
            Some(ttl) => Some(Utc::now().checked_add_signed(ttl).ok_or_else(|| {
                AppError::bad_request(
                    "Link lifetime is out of range",
                    json!({ "ttl_seconds": ttl.num_seconds() }),
                )
            })?),
            None => None,
        };

        if expires_at.is_none()
            && let Some(existing) = self
                .link_repository
                .find_permanent_by_long_url(&normalized_url)
                .await?
        {
            debug!(code = %existing.code, "Reusing existing short link");
            return Ok(existing);
        }

        let code = self.codes.next_code().await?;

        let link = self
            .link_repository
            .create(NewLink {
                code,
                long_url: normalized_url,
                expires_at,
            })
            .await?;

        info!(code = %link.code, "Short link created");
        Ok(link)
    }

    /// Looks up the destination of a short code.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`] if the code was never issued
    /// - [`AppError::Gone`] if the link has expired
    pub async fn resolve(&self, code: &str) -> Result<Link, AppError> {
        let link = self
            .link_repository
            .find_by_code(code)
            .await?
            .ok_or_else(|| AppError::not_found("Short link not found", json!({ "code": code })))?;

        if link.is_expired() {
            return Err(AppError::gone(
                "Short link has expired",
                json!({ "code": code, "expired_at": link.expires_at }),
            ));
        }

        Ok(link)
    }

    /// Round-trips link storage; used by the health check.
    pub async fn check_storage(&self) -> Result<(), AppError> {
        self.link_repository.ping().await
    }

    /// Builds the public short URL for a code.
    pub fn short_url(&self, base_url: &str, code: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), code)
    }
}
