// tests/common/mod.rs
//
// Scripted SourceClient and observation builders shared by integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pws_fallback::group::{Group, Source};
use pws_fallback::observation::{
    CurrentConditions, Daypart, Expirable, Forecast, ForecastDay, Observation, UnitSystem,
};
use pws_fallback::source::{Credentials, FetchError, FetchOptions, SourceClient};

#[derive(Clone)]
pub struct Step {
    pub result: Result<Observation, FetchError>,
    pub delay: Duration,
}

pub fn ok(o: Observation) -> Step {
    Step {
        result: Ok(o),
        delay: Duration::ZERO,
    }
}

pub fn fail(e: FetchError) -> Step {
    Step {
        result: Err(e),
        delay: Duration::ZERO,
    }
}

pub fn net_err() -> Step {
    fail(FetchError::Network("connection reset".into()))
}

impl Step {
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
struct Script {
    queued: HashMap<String, VecDeque<Step>>,
    /// Used once a source's queue is empty.
    fallback: HashMap<String, Step>,
    calls: HashMap<String, usize>,
}

/// Per-source scripted outcomes. Also tracks concurrency per source.
#[derive(Clone, Default)]
pub struct ScriptedClient {
    inner: Arc<Mutex<Script>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: &str, step: Step) -> &Self {
        let mut s = self.inner.lock().unwrap();
        s.queued.entry(id.to_string()).or_default().push_back(step);
        self
    }

    pub fn always(&self, id: &str, step: Step) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .fallback
            .insert(id.to_string(), step);
        self
    }

    pub fn calls(&self, id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next(&self, id: &str) -> Step {
        let mut s = self.inner.lock().unwrap();
        *s.calls.entry(id.to_string()).or_default() += 1;
        if let Some(step) = s.queued.get_mut(id).and_then(|q| q.pop_front()) {
            return step;
        }
        s.fallback
            .get(id)
            .cloned()
            .unwrap_or_else(|| fail(FetchError::Network(format!("no script for {id}"))))
    }
}

#[async_trait]
impl SourceClient for ScriptedClient {
    async fn fetch(
        &self,
        source: &Source,
        _credentials: &Credentials,
        _options: &FetchOptions,
    ) -> Result<Observation, FetchError> {
        let step = self.next(&source.id);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        step.result
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Cycle `n` at the default 5-minute cadence.
pub fn cycle_at(n: i64) -> DateTime<Utc> {
    t0() + ChronoDuration::minutes(5 * n)
}

pub fn obs(id: &str, temp: f64) -> Observation {
    Observation {
        current: CurrentConditions {
            station_id: id.into(),
            observed_at: t0(),
            neighborhood: Some("Lakeside".into()),
            country: Some("HU".into()),
            latitude: Some(47.23),
            longitude: Some(18.61),
            software_type: None,
            qc_status: Some(1),
            humidity: Some(60.0),
            wind_bearing: Some(200.0),
            uv: Some(3.0),
            solar_radiation: Some(400.0),
            units: UnitSystem::Metric,
            temperature: Some(temp),
            dewpoint: Some(12.0),
            heat_index: Some(temp),
            wind_chill: Some(temp),
            wind_speed: Some(10.0),
            wind_gust: Some(15.0),
            pressure: Some(1015.0),
            precip_rate: Some(0.0),
            precip_total: Some(0.0),
            elevation: Some(104.0),
        },
        forecast: None,
    }
}

/// Observation whose forecast was fetched after today's cutoff: today's max
/// and daytime period are expired.
pub fn obs_after_cutoff(id: &str, temp: f64) -> Observation {
    let night = Daypart {
        name: Some("Tonight".into()),
        icon_code: Some(29),
        precip_chance: Some(10.0),
        qpf: Some(0.0),
        temperature: Some(14.0),
        wind_speed: Some(6.0),
        wind_direction: Some(220.0),
        wind_direction_cardinal: Some("SW".into()),
        relative_humidity: Some(70.0),
        narrative: None,
    };
    let mut o = obs(id, temp);
    o.forecast = Some(Forecast {
        days: vec![ForecastDay {
            valid_time: t0(),
            day_of_week: Some("Saturday".into()),
            narrative: None,
            temperature_max: Expirable::Expired,
            temperature_min: Some(13.0),
            qpf: Some(0.0),
            day: Expirable::Expired,
            night: Expirable::Value(night),
        }],
    });
    o
}

pub fn group(name: &str, sources: &[(&str, u32)]) -> Group {
    Group::new(
        name,
        sources
            .iter()
            .map(|(id, p)| Source::new(*id, format!("Station {id}"), *p))
            .collect(),
        None,
    )
    .unwrap()
}
