// src/source/mod.rs
pub mod error;
pub mod wunderground;

pub use error::{FetchError, FetchErrorKind};
pub use wunderground::WundergroundClient;

use std::fmt;

use crate::group::{Coordinates, Source};
use crate::observation::{Observation, UnitSystem};

/// API key for the upstream. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn is_present(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Short, non-reversible fingerprint that is safe to log.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(self.api_key.as_bytes());
        let mut out = String::with_capacity(12);
        for b in digest.iter().take(6) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &format_args!("<{}>", self.fingerprint()))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericPrecision {
    None,
    #[default]
    Decimal,
}

/// Per-request knobs, passed through to the upstream as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub units: UnitSystem,
    pub precision: NumericPrecision,
    pub language: String,
    pub calendar_day: bool,
    pub forecast: bool,
    /// Forecast location; when absent the station's own position is used.
    pub coordinates: Option<Coordinates>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            units: UnitSystem::Metric,
            precision: NumericPrecision::Decimal,
            language: "en-US".to_string(),
            calendar_day: false,
            forecast: false,
            coordinates: None,
        }
    }
}

/// "Fetch one source's observation". Stateless per call.
#[async_trait::async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch(
        &self,
        source: &Source,
        credentials: &Credentials,
        options: &FetchOptions,
    ) -> Result<Observation, FetchError>;

    fn name(&self) -> &'static str;
}

/// Input checks shared by every client implementation.
pub fn validate_request(source: &Source, credentials: &Credentials) -> Result<(), FetchError> {
    if source.id.trim().is_empty() {
        return Err(FetchError::InvalidRequest("source id is empty".into()));
    }
    if !credentials.is_present() {
        return Err(FetchError::Authentication("no API key configured".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_api_key() {
        let c = Credentials::new("super-secret-key");
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("super-secret-key"));
        assert_eq!(c.fingerprint().len(), 12);
    }

    #[test]
    fn request_validation() {
        let key = Credentials::new("k");
        assert!(validate_request(&Source::new("A", "a", 1), &key).is_ok());
        assert!(matches!(
            validate_request(&Source::new("", "a", 1), &key),
            Err(FetchError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_request(&Source::new("A", "a", 1), &Credentials::new("  ")),
            Err(FetchError::Authentication(_))
        ));
    }
}
