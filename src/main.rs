//! pws-fallback: binary entrypoint.
//! `pws-fallback` serves snapshots over HTTP; `pws-fallback probe` polls once
//! and prints a status table.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pws_fallback::{
    api::{create_router, AppState},
    config::AppConfig,
    metrics::Metrics,
    render_status_table, run_probe,
    service::Service,
    source::{SourceClient, WundergroundClient},
};

/// Compact logs by default, JSON with LOG_FORMAT=json.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pws_fallback=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl_c handler failed");
    }
}

async fn probe(cfg: &AppConfig) -> Result<()> {
    let client: Arc<dyn SourceClient> = Arc::new(WundergroundClient::new(cfg.request_timeout())?);
    for snap in run_probe(cfg, client).await? {
        print!("{}", render_status_table(&snap));
    }
    Ok(())
}

async fn serve(cfg: &AppConfig) -> Result<()> {
    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = ?e, "metrics disabled");
            None
        }
    };

    let service = Service::start(cfg)?;
    let router = create_router(AppState::new(service.readers()), metrics.as_ref());

    let addr = cfg.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, groups = ?service.group_names(), "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    service.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load()?;
    tracing::info!(
        key = %cfg.credentials().fingerprint(),
        poll_secs = cfg.poll_interval_secs,
        "starting"
    );

    match std::env::args().nth(1).as_deref() {
        Some("probe") => probe(&cfg).await,
        Some(other) => anyhow::bail!("unknown command '{other}' (expected: probe)"),
        None => serve(&cfg).await,
    }
}
