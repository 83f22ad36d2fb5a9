// src/config.rs
use anyhow::{anyhow, bail, Context, Result};
use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::CoordinatorSettings;
use crate::group::{is_valid_station_id, Coordinates, Group, Source};
use crate::observation::UnitSystem;
use crate::source::{Credentials, FetchOptions, NumericPrecision};

pub const ENV_CONFIG_PATH: &str = "PWS_CONFIG_PATH";
pub const ENV_API_KEY: &str = "WU_API_KEY";
pub const MIN_POLL_INTERVAL_SECS: u64 = 60;
/// One week; a cache older than that is never worth serving.
pub const MAX_OBSERVATION_AGE_SECS: u64 = 7 * 24 * 3600;

fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_language() -> String {
    "en-US".to_string()
}
fn default_poll_interval_secs() -> u64 {
    300
}
fn default_failure_threshold() -> u32 {
    crate::health::DEFAULT_FAILURE_THRESHOLD
}
fn default_max_observation_age_secs() -> u64 {
    crate::health::DEFAULT_MAX_OBSERVATION_AGE_SECS as u64
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    pub id: String,
    /// Display name; falls back to the id.
    #[serde(default)]
    pub name: Option<String>,
    pub priority: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// "ENV" means: read from WU_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default)]
    pub units: UnitSystem,
    #[serde(default)]
    pub numeric_precision: NumericPrecision,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub calendar_day: bool,
    #[serde(default)]
    pub forecast: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// 0 disables the staleness guard.
    #[serde(default = "default_max_observation_age_secs")]
    pub max_observation_age_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_bind")]
    pub bind: String,
    pub groups: Vec<GroupConfig>,
}

impl AppConfig {
    /// Load using env var + fallbacks:
    /// 1) $PWS_CONFIG_PATH
    /// 2) config/pws.toml
    /// 3) config/pws.json
    pub fn load() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
            }
            return Self::load_from_file(&pb);
        }
        for candidate in ["config/pws.toml", "config/pws.json"] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
        }
        Err(anyhow!(
            "no configuration found (set {ENV_CONFIG_PATH} or create config/pws.toml)"
        ))
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = Self::parse(&content, &ext)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            groups = cfg.groups.len(),
            key = %Credentials::new(cfg.api_key.clone()).fingerprint(),
            "config loaded"
        );
        Ok(cfg)
    }

    /// Parse, resolve the API key, and validate. `ext` is "json" or anything else for TOML.
    pub fn parse(s: &str, ext: &str) -> Result<Self> {
        let mut cfg: AppConfig = if ext == "json" {
            serde_json::from_str(s)?
        } else {
            toml::from_str(s)?
        };

        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = std::env::var(ENV_API_KEY)
                .map_err(|_| anyhow!("Missing {ENV_API_KEY} env var"))?;
        }
        cfg.language = cfg.language.trim().to_string();
        if cfg.language.is_empty() {
            cfg.language = default_language();
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            bail!("api_key is empty");
        }
        if self.poll_interval_secs < MIN_POLL_INTERVAL_SECS {
            bail!(
                "poll_interval_secs must be >= {MIN_POLL_INTERVAL_SECS} (got {})",
                self.poll_interval_secs
            );
        }
        if self.failure_threshold < 1 {
            bail!("failure_threshold must be >= 1");
        }
        if self.request_timeout_secs == 0 || self.fetch_timeout_secs == 0 {
            bail!("timeouts must be > 0");
        }
        if self.max_observation_age_secs > MAX_OBSERVATION_AGE_SECS {
            bail!(
                "max_observation_age_secs must be <= {MAX_OBSERVATION_AGE_SECS} (got {})",
                self.max_observation_age_secs
            );
        }
        self.bind_addr()?;
        if self.groups.is_empty() {
            bail!("at least one [[groups]] entry is required");
        }

        let mut group_names = HashSet::new();
        let mut station_ids = HashSet::new();
        for g in &self.groups {
            if !group_names.insert(g.name.as_str()) {
                bail!("duplicate group name '{}'", g.name);
            }
            if g.stations.is_empty() {
                bail!("group '{}' has no stations", g.name);
            }
            if g.latitude.is_some() != g.longitude.is_some() {
                bail!("group '{}': set both latitude and longitude or neither", g.name);
            }
            for st in &g.stations {
                if !is_valid_station_id(&st.id) {
                    bail!("group '{}': invalid station id '{}'", g.name, st.id);
                }
                if !station_ids.insert(st.id.as_str()) {
                    bail!("station '{}' is configured more than once", st.id);
                }
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("invalid bind address '{}'", self.bind))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.api_key.clone())
    }

    pub fn groups(&self) -> Result<Vec<Group>> {
        self.groups
            .iter()
            .map(|g| {
                let sources = g
                    .stations
                    .iter()
                    .map(|s| {
                        let name = s.name.clone().unwrap_or_else(|| s.id.clone());
                        Source::new(s.id.clone(), name, s.priority)
                    })
                    .collect();
                let coords = match (g.latitude, g.longitude) {
                    (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
                    _ => None,
                };
                Group::new(g.name.clone(), sources, coords)
            })
            .collect()
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            units: self.units,
            precision: self.numeric_precision,
            language: self.language.clone(),
            calendar_day: self.calendar_day,
            forecast: self.forecast,
            coordinates: None,
        }
    }

    /// `None` when the age guard is disabled (`max_observation_age_secs = 0`).
    pub fn max_observation_age(&self) -> Result<Option<ChronoDuration>> {
        if self.max_observation_age_secs == 0 {
            return Ok(None);
        }
        let secs = i64::try_from(self.max_observation_age_secs)
            .context("max_observation_age_secs out of range")?;
        ChronoDuration::try_seconds(secs)
            .map(Some)
            .ok_or_else(|| anyhow!("max_observation_age_secs out of range ({secs})"))
    }

    pub fn coordinator_settings(&self) -> Result<CoordinatorSettings> {
        Ok(CoordinatorSettings {
            failure_threshold: self.failure_threshold,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_observation_age: self.max_observation_age()?,
            options: self.fetch_options(),
            credentials: self.credentials(),
        })
    }
}
