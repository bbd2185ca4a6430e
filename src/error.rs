use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::session::SessionStatus;

pub type AcquireResult<T> = Result<T, AcquireError>;

/// Errors surfaced by the external image provider. The controller treats
/// `RateLimitedByProvider` and `Network` as recoverable (session stays
/// `Active`); `MalformedResponse` and `Other` fail the session.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("provider rejected the call as rate limited")]
    RateLimitedByProvider,

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimitedByProvider | ProviderError::Network(_)
        )
    }
}

/// A single payload too large to ever fit the cache budget. Reported, not
/// fatal: the image is simply not cached.
#[derive(Debug, Error, Clone)]
#[error("image {key} ({size_bytes} bytes) exceeds cache budget of {max_bytes} bytes")]
pub struct CacheCapacityError {
    pub key: String,
    pub size_bytes: u64,
    pub max_bytes: u64,
}

/// Error taxonomy of the acquisition controller.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Configuration rejected by `CollectionLimits::validate`.
    #[error("invalid collection limits: {0}")]
    InvalidLimits(String),

    /// Local call budget exhausted; `retry_after` is when a slot frees up.
    #[error("rate limited, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Wrong call order: the session cannot fetch in its current status.
    #[error("session not fetchable in status {status:?}")]
    SessionNotFetchable { status: SessionStatus },

    /// Per-session image or page ceiling hit; the session is `Completed`.
    #[error("session limit reached")]
    LimitReached,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    CacheCapacity(#[from] CacheCapacityError),
}

impl AcquireError {
    /// HTTP status for the host surface. Rate-limit and capacity conditions
    /// must stay distinguishable from hard failures.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AcquireError::InvalidLimits(_) => StatusCode::BAD_REQUEST,
            AcquireError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AcquireError::SessionNotFetchable { .. } | AcquireError::LimitReached => {
                StatusCode::CONFLICT
            }
            AcquireError::Provider(p) => match p {
                ProviderError::RateLimitedByProvider => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::BAD_GATEWAY,
            },
            AcquireError::CacheCapacity(_) => StatusCode::INSUFFICIENT_STORAGE,
        }
    }

    /// Retry hint for 429 responses.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AcquireError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn log(&self) {
        match self {
            AcquireError::RateLimited { retry_after } => {
                tracing::debug!(retry_after_secs = retry_after.as_secs(), "rate limited");
            }
            AcquireError::LimitReached => {
                tracing::debug!("session limit reached");
            }
            AcquireError::SessionNotFetchable { status } => {
                tracing::warn!(?status, "fetch called on non-fetchable session");
            }
            AcquireError::CacheCapacity(e) => {
                tracing::warn!(error = %e, "image skipped by cache");
            }
            AcquireError::Provider(e) => {
                tracing::error!(error = %e, "provider call failed");
            }
            AcquireError::InvalidLimits(msg) => {
                tracing::warn!(message = %msg, "rejected collection limits");
            }
        }
    }
}
