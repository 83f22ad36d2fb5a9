// src/source/wunderground.rs
//! Weather Company PWS client: current conditions (v2) and the daily 5-day
//! forecast (v3), decoded into a typed `Observation`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header::RETRY_AFTER, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::{
    validate_request, Credentials, FetchError, FetchOptions, NumericPrecision, SourceClient,
};
use crate::group::{Coordinates, Source};
use crate::observation::{
    CurrentConditions, Daypart, Expirable, Forecast, ForecastDay, Observation, UnitSystem,
};

pub const CURRENT_URL: &str = "https://api.weather.com/v2/pws/observations/current";
pub const FORECAST_URL: &str = "https://api.weather.com/v3/wx/forecast/daily/5day";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("pws-fallback/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct WundergroundClient {
    http: reqwest::Client,
    current_url: String,
    forecast_url: String,
    timeout: Duration,
}

impl WundergroundClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("building upstream http client")?;
        Ok(Self {
            http,
            current_url: CURRENT_URL.to_string(),
            forecast_url: FORECAST_URL.to_string(),
            timeout,
        })
    }

    /// Point the client at different endpoints (local fakes in tests).
    pub fn with_endpoints(
        mut self,
        current_url: impl Into<String>,
        forecast_url: impl Into<String>,
    ) -> Self {
        self.current_url = current_url.into();
        self.forecast_url = forecast_url.into();
        self
    }

    pub fn current_query(
        station_id: &str,
        credentials: &Credentials,
        options: &FetchOptions,
    ) -> Vec<(&'static str, String)> {
        let mut q = vec![
            ("stationId", station_id.to_string()),
            ("format", "json".to_string()),
            ("units", options.units.api_code().to_string()),
            ("apiKey", credentials.api_key().to_string()),
        ];
        if options.precision == NumericPrecision::Decimal {
            q.push(("numericPrecision", "decimal".to_string()));
        }
        q
    }

    pub fn forecast_query(
        coordinates: Coordinates,
        credentials: &Credentials,
        options: &FetchOptions,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("geocode", coordinates.geocode()),
            ("language", options.language.clone()),
            ("format", "json".to_string()),
            ("units", options.units.api_code().to_string()),
            ("apiKey", credentials.api_key().to_string()),
        ]
    }

    fn transport_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(e.without_url().to_string())
        }
    }

    async fn get_body(
        &self,
        url: &str,
        query: &[(&'static str, String)],
    ) -> Result<String, FetchError> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        if let Some(err) = classify_status(status, retry_after) {
            return Err(err);
        }
        resp.text().await.map_err(|e| self.transport_error(e))
    }
}

#[async_trait]
impl SourceClient for WundergroundClient {
    async fn fetch(
        &self,
        source: &Source,
        credentials: &Credentials,
        options: &FetchOptions,
    ) -> Result<Observation, FetchError> {
        validate_request(source, credentials)?;

        let body = self
            .get_body(&self.current_url, &Self::current_query(&source.id, credentials, options))
            .await?;
        let current = parse_current(&body, &source.id, options.units)?;

        let forecast = if options.forecast {
            let coords = options
                .coordinates
                .or_else(|| current.coordinates())
                .ok_or_else(|| {
                    FetchError::Malformed("station reports no coordinates for forecast".into())
                })?;
            let body = self
                .get_body(&self.forecast_url, &Self::forecast_query(coords, credentials, options))
                .await?;
            Some(parse_forecast(&body, options.calendar_day)?)
        } else {
            None
        };

        tracing::debug!(
            target: "source",
            source = %source.id,
            forecast_days = forecast.as_ref().map(|f| f.days.len()).unwrap_or(0),
            "fetched observation"
        );

        Ok(Observation { current, forecast })
    }

    fn name(&self) -> &'static str {
        "wunderground"
    }
}

/// Map an HTTP status to a fetch failure. `None` means the body should be parsed.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> Option<FetchError> {
    match status {
        StatusCode::NO_CONTENT => Some(FetchError::NoObservations),
        s if s.is_success() => None,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(FetchError::Authentication(
            format!("upstream returned HTTP {}", status.as_u16()),
        )),
        StatusCode::TOO_MANY_REQUESTS => Some(FetchError::RateLimited { retry_after }),
        s => Some(FetchError::UpstreamStatus { status: s.as_u16() }),
    }
}

// --- wire shapes ---

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEntry {
    message: Option<String>,
    error: Option<ApiErrorDetail>,
}

/// Error code the API puts in a 200 body when the key is not accepted.
const INVALID_KEY_CODE: &str = "CDN-0001";

fn check_api_errors(errors: Option<&[ApiErrorEntry]>) -> Result<(), FetchError> {
    let errors = match errors {
        Some(e) if !e.is_empty() => e,
        _ => return Ok(()),
    };
    let mut key_rejected = false;
    let msgs: Vec<String> = errors
        .iter()
        .map(|e| {
            let detail = e.error.as_ref();
            let code = detail.and_then(|d| d.code.as_deref()).unwrap_or("");
            let msg = e
                .message
                .as_deref()
                .or_else(|| detail.and_then(|d| d.message.as_deref()))
                .unwrap_or("unknown error");
            if code == INVALID_KEY_CODE || msg.to_ascii_lowercase().contains("invalid apikey") {
                key_rejected = true;
            }
            if code.is_empty() {
                msg.to_string()
            } else {
                format!("{code}: {msg}")
            }
        })
        .collect();
    let joined = format!("upstream errors: {}", msgs.join("; "));
    if key_rejected {
        Err(FetchError::Authentication(joined))
    } else {
        Err(FetchError::Malformed(joined))
    }
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    #[serde(default)]
    observations: Vec<RawObservation>,
    #[serde(default)]
    errors: Option<Vec<ApiErrorEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawObservation {
    #[serde(rename = "stationID")]
    station_id: Option<String>,
    obs_time_utc: Option<DateTime<Utc>>,
    epoch: Option<i64>,
    neighborhood: Option<String>,
    country: Option<String>,
    software_type: Option<String>,
    qc_status: Option<i32>,
    lat: Option<f64>,
    lon: Option<f64>,
    humidity: Option<f64>,
    winddir: Option<f64>,
    uv: Option<f64>,
    solar_radiation: Option<f64>,
    metric: Option<RawUnits>,
    imperial: Option<RawUnits>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUnits {
    temp: Option<f64>,
    heat_index: Option<f64>,
    dewpt: Option<f64>,
    wind_chill: Option<f64>,
    wind_speed: Option<f64>,
    wind_gust: Option<f64>,
    pressure: Option<f64>,
    precip_rate: Option<f64>,
    precip_total: Option<f64>,
    elev: Option<f64>,
}

/// Decode a current-conditions body. `fallback_id` is used when the station
/// omits its own id.
pub fn parse_current(
    body: &str,
    fallback_id: &str,
    units: UnitSystem,
) -> Result<CurrentConditions, FetchError> {
    if body.trim().is_empty() {
        return Err(FetchError::NoObservations);
    }
    let resp: CurrentResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("current conditions: {e}")))?;
    check_api_errors(resp.errors.as_deref())?;

    let obs = resp
        .observations
        .into_iter()
        .next()
        .ok_or(FetchError::NoObservations)?;

    let observed_at = obs
        .obs_time_utc
        .or_else(|| obs.epoch.and_then(|e| DateTime::from_timestamp(e, 0)))
        .ok_or_else(|| FetchError::Malformed("observation has no timestamp".into()))?;

    let unit_block = match units {
        UnitSystem::Metric => obs.metric,
        UnitSystem::Imperial => obs.imperial,
    }
    .ok_or_else(|| {
        FetchError::Malformed(format!(
            "observation has no '{}' block",
            units.observation_key()
        ))
    })?;

    Ok(CurrentConditions {
        station_id: obs.station_id.unwrap_or_else(|| fallback_id.to_string()),
        observed_at,
        neighborhood: obs.neighborhood,
        country: obs.country,
        latitude: obs.lat,
        longitude: obs.lon,
        software_type: obs.software_type,
        qc_status: obs.qc_status,
        humidity: obs.humidity,
        wind_bearing: obs.winddir,
        uv: obs.uv,
        solar_radiation: obs.solar_radiation,
        units,
        temperature: unit_block.temp,
        dewpoint: unit_block.dewpt,
        heat_index: unit_block.heat_index,
        wind_chill: unit_block.wind_chill,
        wind_speed: unit_block.wind_speed,
        wind_gust: unit_block.wind_gust,
        pressure: unit_block.pressure,
        precip_rate: unit_block.precip_rate,
        precip_total: unit_block.precip_total,
        elevation: unit_block.elev,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForecastResponse {
    valid_time_utc: Option<Vec<Option<i64>>>,
    #[serde(default)]
    day_of_week: Vec<Option<String>>,
    #[serde(default)]
    narrative: Vec<Option<String>>,
    #[serde(default)]
    temperature_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_min: Vec<Option<f64>>,
    #[serde(default)]
    calendar_day_temperature_max: Vec<Option<f64>>,
    #[serde(default)]
    calendar_day_temperature_min: Vec<Option<f64>>,
    #[serde(default)]
    qpf: Vec<Option<f64>>,
    #[serde(default)]
    daypart: Vec<RawDaypart>,
    #[serde(default)]
    errors: Option<Vec<ApiErrorEntry>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawDaypart {
    day_or_night: Vec<Option<String>>,
    daypart_name: Vec<Option<String>>,
    icon_code: Vec<Option<i32>>,
    precip_chance: Vec<Option<f64>>,
    qpf: Vec<Option<f64>>,
    temperature: Vec<Option<f64>>,
    wind_speed: Vec<Option<f64>>,
    wind_direction: Vec<Option<f64>>,
    wind_direction_cardinal: Vec<Option<String>>,
    relative_humidity: Vec<Option<f64>>,
    narrative: Vec<Option<String>>,
}

fn at<T: Clone>(v: &[Option<T>], i: usize) -> Option<T> {
    v.get(i).cloned().flatten()
}

impl RawDaypart {
    /// A period whose `dayOrNight` marker is null has been expired upstream.
    fn period(&self, i: usize) -> Expirable<Daypart> {
        if at(&self.day_or_night, i).is_none() {
            return Expirable::Expired;
        }
        Expirable::Value(Daypart {
            name: at(&self.daypart_name, i),
            icon_code: at(&self.icon_code, i),
            precip_chance: at(&self.precip_chance, i),
            qpf: at(&self.qpf, i),
            temperature: at(&self.temperature, i),
            wind_speed: at(&self.wind_speed, i),
            wind_direction: at(&self.wind_direction, i),
            wind_direction_cardinal: at(&self.wind_direction_cardinal, i),
            relative_humidity: at(&self.relative_humidity, i),
            narrative: at(&self.narrative, i),
        })
    }
}

/// Decode a daily forecast body. Nulls in today's max temperature and in
/// expired dayparts are expected after the local afternoon cutoff and are
/// returned as `Expirable::Expired`.
pub fn parse_forecast(body: &str, calendar_day: bool) -> Result<Forecast, FetchError> {
    let resp: ForecastResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("forecast: {e}")))?;
    check_api_errors(resp.errors.as_deref())?;

    let valid_times = resp
        .valid_time_utc
        .ok_or_else(|| FetchError::Malformed("forecast has no validTimeUtc".into()))?;
    let n_days = valid_times.len();

    let empty = RawDaypart::default();
    let parts = match resp.daypart.first() {
        Some(p) => {
            if p.day_or_night.len() < n_days * 2 {
                return Err(FetchError::Malformed(format!(
                    "daypart has {} periods for {} days",
                    p.day_or_night.len(),
                    n_days
                )));
            }
            p
        }
        None => {
            tracing::warn!(target: "source", "forecast has no daypart data");
            &empty
        }
    };

    let (max, min) = if calendar_day {
        (&resp.calendar_day_temperature_max, &resp.calendar_day_temperature_min)
    } else {
        (&resp.temperature_max, &resp.temperature_min)
    };

    let mut days = Vec::with_capacity(n_days);
    for (i, ts) in valid_times.into_iter().enumerate() {
        let valid_time = ts
            .and_then(|t| DateTime::from_timestamp(t, 0))
            .ok_or_else(|| FetchError::Malformed(format!("forecast day {i} has no valid time")))?;
        days.push(ForecastDay {
            valid_time,
            day_of_week: at(&resp.day_of_week, i),
            narrative: at(&resp.narrative, i),
            temperature_max: Expirable::from_option(at(max, i)),
            temperature_min: at(min, i),
            qpf: at(&resp.qpf, i),
            day: parts.period(2 * i),
            night: parts.period(2 * i + 1),
        });
    }

    Ok(Forecast { days })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT: &str = r#"{
      "observations": [
        {
          "stationID": "IVELEN12",
          "obsTimeUtc": "2024-06-01T10:15:00Z",
          "neighborhood": "Lakeside",
          "country": "HU",
          "softwareType": "EasyWeather",
          "qcStatus": 1,
          "lat": 47.23,
          "lon": 18.61,
          "humidity": 64,
          "winddir": 210,
          "uv": 5.0,
          "solarRadiation": 612.4,
          "epoch": 1717236900,
          "metric": {
            "temp": 22.4,
            "heatIndex": 22.4,
            "dewpt": 15.2,
            "windChill": 22.4,
            "windSpeed": 11.2,
            "windGust": 18.0,
            "pressure": 1014.6,
            "precipRate": 0.0,
            "precipTotal": 0.3,
            "elev": 104
          }
        }
      ]
    }"#;

    #[test]
    fn current_metric_decodes() {
        let c = parse_current(CURRENT, "X", UnitSystem::Metric).unwrap();
        assert_eq!(c.station_id, "IVELEN12");
        assert_eq!(c.temperature, Some(22.4));
        assert_eq!(c.wind_bearing, Some(210.0));
        assert_eq!(c.coordinates(), Some(Coordinates::new(47.23, 18.61)));
    }

    #[test]
    fn current_missing_unit_block_is_malformed() {
        let err = parse_current(CURRENT, "X", UnitSystem::Imperial).unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[test]
    fn empty_observations_means_station_offline() {
        let err = parse_current(r#"{"observations":[]}"#, "X", UnitSystem::Metric).unwrap_err();
        assert_eq!(err, FetchError::NoObservations);
        assert_eq!(
            parse_current("", "X", UnitSystem::Metric).unwrap_err(),
            FetchError::NoObservations
        );
    }

    #[test]
    fn errors_array_is_a_failure_even_on_200() {
        let body = r#"{"errors":[{"error":{"code":"NDF-0001","message":"No data found."}}]}"#;
        let err = parse_current(body, "X", UnitSystem::Metric).unwrap_err();
        match err {
            FetchError::Malformed(m) => assert!(m.contains("NDF-0001")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn invalid_key_in_errors_body_is_sticky() {
        let body = r#"{"errors":[{"error":{"code":"CDN-0001","message":"Invalid apiKey."}}]}"#;
        let err = parse_current(body, "X", UnitSystem::Metric).unwrap_err();
        match &err {
            FetchError::Authentication(m) => assert!(m.contains("CDN-0001")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_sticky());

        // message-only entry without a code
        let body = r#"{"errors":[{"message":"Invalid apiKey"}]}"#;
        let err = parse_current(body, "X", UnitSystem::Metric).unwrap_err();
        assert!(matches!(err, FetchError::Authentication(_)));
    }

    #[test]
    fn forecast_after_cutoff_marks_today_expired() {
        let body = r#"{
            "validTimeUtc":[1717228800,1717315200],
            "dayOfWeek":["Saturday","Sunday"],
            "temperatureMax":[null,25],
            "temperatureMin":[14,15],
            "calendarDayTemperatureMax":[24,26],
            "calendarDayTemperatureMin":[13,14],
            "daypart":[{
                "dayOrNight":[null,"N","D","N"],
                "daypartName":[null,"Tonight","Tomorrow","Tomorrow night"],
                "temperature":[null,15,25,14],
                "iconCode":[null,29,32,31]
            }]
        }"#;
        let f = parse_forecast(body, false).unwrap();
        assert_eq!(f.days.len(), 2);
        assert!(f.days[0].temperature_max.is_expired());
        assert!(f.days[0].day.is_expired());
        assert!(!f.days[0].night.is_expired());
        assert_eq!(f.days[1].temperature_max, Expirable::Value(25.0));

        let cal = parse_forecast(body, true).unwrap();
        assert_eq!(cal.days[0].temperature_max, Expirable::Value(24.0));
        assert_eq!(cal.days[0].temperature_min, Some(13.0));
    }

    #[test]
    fn forecast_without_valid_times_is_malformed() {
        let err = parse_forecast(r#"{"temperatureMax":[20]}"#, false).unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[test]
    fn short_daypart_is_malformed() {
        let body = r#"{
            "validTimeUtc": [1717228800, 1717315200],
            "daypart": [{"dayOrNight": ["D", "N"]}]
        }"#;
        assert!(matches!(
            parse_forecast(body, false).unwrap_err(),
            FetchError::Malformed(_)
        ));
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::OK, None), None);
        assert_eq!(
            classify_status(StatusCode::NO_CONTENT, None),
            Some(FetchError::NoObservations)
        );
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None),
            Some(FetchError::Authentication(_))
        ));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(30))),
            Some(FetchError::RateLimited {
                retry_after: Some(Duration::from_secs(30))
            })
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY, None),
            Some(FetchError::UpstreamStatus { status: 502 })
        );
    }

    #[test]
    fn queries_carry_pass_through_options() {
        let creds = Credentials::new("k");
        let opts = FetchOptions {
            precision: NumericPrecision::None,
            units: UnitSystem::Imperial,
            ..FetchOptions::default()
        };
        let q = WundergroundClient::current_query("IVELEN12", &creds, &opts);
        assert!(q.contains(&("units", "e".to_string())));
        assert!(!q.iter().any(|(k, _)| *k == "numericPrecision"));

        let fq = WundergroundClient::forecast_query(Coordinates::new(47.2, 18.6), &creds, &opts);
        assert!(fq.contains(&("geocode", "47.2,18.6".to_string())));
        assert!(fq.contains(&("language", "en-US".to_string())));
    }
}
