// src/source/error.rs
//! Typed failure of one fetch against one source.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Credentials rejected (or missing). Sticky until reconfiguration.
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// The request itself can never succeed (e.g. empty station id).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Malformed(String),

    /// Station is known but currently reports nothing.
    #[error("station reported no observations")]
    NoObservations,

    #[error("upstream returned HTTP {status}")]
    UpstreamStatus { status: u16 },
}

/// Coarse label for metrics and the status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Authentication,
    InvalidRequest,
    RateLimited,
    Network,
    Malformed,
    NoObservations,
    UpstreamStatus,
}

impl FetchErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchErrorKind::Authentication => "authentication",
            FetchErrorKind::InvalidRequest => "invalid_request",
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::Network => "network",
            FetchErrorKind::Malformed => "malformed",
            FetchErrorKind::NoObservations => "no_observations",
            FetchErrorKind::UpstreamStatus => "upstream_status",
        }
    }
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Authentication(_) => FetchErrorKind::Authentication,
            FetchError::InvalidRequest(_) => FetchErrorKind::InvalidRequest,
            FetchError::RateLimited { .. } => FetchErrorKind::RateLimited,
            FetchError::Network(_) | FetchError::Timeout(_) => FetchErrorKind::Network,
            FetchError::Malformed(_) => FetchErrorKind::Malformed,
            FetchError::NoObservations => FetchErrorKind::NoObservations,
            FetchError::UpstreamStatus { .. } => FetchErrorKind::UpstreamStatus,
        }
    }

    /// Sticky failures do not heal by retrying; they lock the source out.
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            FetchError::Authentication(_) | FetchError::InvalidRequest(_)
        )
    }
}
