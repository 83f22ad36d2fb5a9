// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod group;
pub mod health;
pub mod metrics;
pub mod observation;
pub mod selection;
pub mod service;
pub mod snapshot;
pub mod source;

pub use crate::api::{create_router, AppState};
pub use crate::coordinator::{CoordinatorSettings, FallbackCoordinator, GroupHandle};
pub use crate::group::{Coordinates, Group, Source};
pub use crate::snapshot::{AggregatedSnapshot, Availability, SnapshotReader};
pub use crate::source::{Credentials, FetchError, SourceClient};

use std::fmt::Write as _;
use std::sync::Arc;

/// Poll every configured station once and return one snapshot per group.
/// Used by `pws-fallback probe` to check keys and station ids before serving.
pub async fn run_probe(
    cfg: &config::AppConfig,
    client: Arc<dyn SourceClient>,
) -> anyhow::Result<Vec<Arc<AggregatedSnapshot>>> {
    let settings = cfg.coordinator_settings()?;
    let mut out = Vec::new();
    for group in cfg.groups()? {
        let mut coord = FallbackCoordinator::new(group, client.clone(), settings.clone());
        out.push(coord.run_cycle().await);
    }
    tracing::info!(groups = out.len(), "probe finished");
    Ok(out)
}

/// Plain-text status table for one snapshot.
pub fn render_status_table(snap: &AggregatedSnapshot) -> String {
    let mut s = String::new();
    let active = snap.active_source_id.as_deref().unwrap_or("-");
    let _ = writeln!(
        s,
        "group {} [{:?}] active={}",
        snap.group, snap.availability, active
    );
    for e in &snap.source_statuses {
        let marker = if e.active { "*" } else { " " };
        let err = match (&e.last_error, e.credentials_rejected) {
            (Some(msg), true) => format!("CREDENTIALS REJECTED: {msg}"),
            (Some(msg), false) => msg.clone(),
            (None, _) => String::new(),
        };
        let _ = writeln!(
            s,
            "{marker} {:<16} p{:<3} {:<9} {}",
            e.id,
            e.priority,
            e.status.as_str(),
            err
        );
    }
    if let Some(temp) = snap.values.as_ref().and_then(|v| v.current.temperature) {
        let _ = writeln!(s, "  temperature {temp}");
    }
    s
}
