// src/group.rs
//! Sources and the groups that aggregate them.
//!
//! A `Group` is validated once at construction and immutable afterwards.
//! Its sources are kept sorted by priority; the sort is stable so equal
//! priorities keep their configuration order.

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

static STATION_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("station id regex"));

/// One upstream reporting unit (a weather station).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub display_name: String,
    /// 1 = most preferred. Need not be contiguous or unique.
    pub priority: u32,
}

impl Source {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, priority: u32) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            priority,
        }
    }
}

/// Returns true if `id` looks like a station identifier the upstream accepts.
pub fn is_valid_station_id(id: &str) -> bool {
    STATION_ID_RE.is_match(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// `lat,lon` as the forecast endpoint expects it.
    pub fn geocode(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

/// The unit a caller observes: a named, priority-ordered set of sources.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    name: String,
    sources: Vec<Source>,
    coordinates: Option<Coordinates>,
}

impl Group {
    pub fn new(
        name: impl Into<String>,
        mut sources: Vec<Source>,
        coordinates: Option<Coordinates>,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            bail!("group name must not be empty");
        }
        if sources.is_empty() {
            bail!("group '{name}' has no sources");
        }

        let mut seen = HashSet::new();
        for s in &sources {
            if s.id.trim().is_empty() {
                bail!("group '{name}' has a source with an empty id");
            }
            if s.priority == 0 {
                bail!("source '{}' in group '{name}': priority must be >= 1", s.id);
            }
            if !seen.insert(s.id.as_str()) {
                bail!("source '{}' appears twice in group '{name}'", s.id);
            }
        }

        if let Some(c) = coordinates {
            if !(-90.0..=90.0).contains(&c.latitude) || !(-180.0..=180.0).contains(&c.longitude) {
                bail!(
                    "group '{name}': coordinates out of range ({}, {})",
                    c.latitude,
                    c.longitude
                );
            }
        }

        // Stable: ties keep configuration order.
        sources.sort_by_key(|s| s.priority);

        Ok(Self {
            name,
            sources,
            coordinates,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sources in selection order (priority, then configuration order).
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        self.coordinates
    }
}
