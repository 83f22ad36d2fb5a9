// src/metrics.rs
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// Register metric descriptions once per process.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pws_fetch_total", "Source fetches by outcome (ok/error).");
        describe_counter!("pws_fetch_errors_total", "Failed source fetches by error kind.");
        describe_histogram!("pws_fetch_ms", "Per-source fetch time in milliseconds.");
        describe_counter!("pws_cycle_total", "Completed poll cycles.");
        describe_gauge!("pws_cycle_last_run_ts", "Unix ts of the last completed poll cycle.");
        describe_gauge!("pws_usable_sources", "Sources currently Active or Degraded.");
        describe_counter!("pws_failover_total", "Changes of the active source.");
        describe_counter!(
            "pws_forecast_expired_total",
            "Forecast values already expired upstream at fetch time."
        );
    });
}

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already installed.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
