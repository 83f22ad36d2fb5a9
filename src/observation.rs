// src/observation.rs
//! Strongly typed weather observation: current conditions plus an optional
//! multi-day forecast.
//!
//! The upstream nulls some of today's forecast fields once a local-time
//! cutoff has passed. Those fields are `Expirable` so an expired value is a
//! state, not a parse failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::group::Coordinates;

/// Measurement system requested from (and reported by) the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

impl UnitSystem {
    /// Value of the `units` query parameter.
    pub fn api_code(self) -> &'static str {
        match self {
            UnitSystem::Metric => "m",
            UnitSystem::Imperial => "e",
        }
    }

    /// Key of the unit-dependent object inside an observation.
    pub fn observation_key(self) -> &'static str {
        match self {
            UnitSystem::Metric => "metric",
            UnitSystem::Imperial => "imperial",
        }
    }
}

/// A value that is either known or was nulled by the upstream after its
/// validity window closed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum Expirable<T> {
    Value(T),
    Expired,
}

impl<T> Expirable<T> {
    pub fn from_option(v: Option<T>) -> Self {
        match v {
            Some(v) => Expirable::Value(v),
            None => Expirable::Expired,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Expirable::Expired)
    }

    pub fn as_ref(&self) -> Expirable<&T> {
        match self {
            Expirable::Value(v) => Expirable::Value(v),
            Expirable::Expired => Expirable::Expired,
        }
    }

    pub fn value(self) -> Option<T> {
        match self {
            Expirable::Value(v) => Some(v),
            Expirable::Expired => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub station_id: String,
    pub observed_at: DateTime<Utc>,
    pub neighborhood: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub software_type: Option<String>,
    pub qc_status: Option<i32>,
    pub humidity: Option<f64>,
    /// Degrees.
    pub wind_bearing: Option<f64>,
    pub uv: Option<f64>,
    pub solar_radiation: Option<f64>,
    pub units: UnitSystem,
    pub temperature: Option<f64>,
    pub dewpoint: Option<f64>,
    pub heat_index: Option<f64>,
    pub wind_chill: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub pressure: Option<f64>,
    pub precip_rate: Option<f64>,
    pub precip_total: Option<f64>,
    pub elevation: Option<f64>,
}

impl CurrentConditions {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        }
    }
}

/// Day or night half of a forecast day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Daypart {
    pub name: Option<String>,
    pub icon_code: Option<i32>,
    pub precip_chance: Option<f64>,
    pub qpf: Option<f64>,
    pub temperature: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub wind_direction_cardinal: Option<String>,
    pub relative_humidity: Option<f64>,
    pub narrative: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub valid_time: DateTime<Utc>,
    pub day_of_week: Option<String>,
    pub narrative: Option<String>,
    pub temperature_max: Expirable<f64>,
    pub temperature_min: Option<f64>,
    pub qpf: Option<f64>,
    pub day: Expirable<Daypart>,
    pub night: Expirable<Daypart>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Forecast {
    pub days: Vec<ForecastDay>,
}

impl Forecast {
    /// Number of values the upstream has already expired (today's max and
    /// dayparts). Informational only.
    pub fn expired_count(&self) -> usize {
        self.days
            .iter()
            .map(|d| {
                usize::from(d.temperature_max.is_expired())
                    + usize::from(d.day.is_expired())
                    + usize::from(d.night.is_expired())
            })
            .sum()
    }

    /// First non-expired daypart, in chronological order.
    pub fn next_daypart(&self) -> Option<&Daypart> {
        self.days
            .iter()
            .flat_map(|d| [d.day.as_ref(), d.night.as_ref()])
            .find_map(Expirable::value)
    }
}

/// One successful fetch of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub current: CurrentConditions,
    pub forecast: Option<Forecast>,
}
