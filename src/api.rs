// src/api.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;

use crate::metrics::Metrics;
use crate::snapshot::{AggregatedSnapshot, Availability, SnapshotReader, SourceStatusEntry};

#[derive(Clone)]
pub struct AppState {
    groups: Arc<BTreeMap<String, SnapshotReader>>,
}

impl AppState {
    pub fn new(groups: BTreeMap<String, SnapshotReader>) -> Self {
        Self {
            groups: Arc::new(groups),
        }
    }

    fn snapshot(&self, name: &str) -> Option<Arc<AggregatedSnapshot>> {
        self.groups.get(name).map(|r| r.current())
    }
}

/// Read-only API. `/metrics` is mounted only when a recorder is installed.
pub fn create_router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let router = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/groups", get(list_groups))
        .route("/groups/{name}", get(group_snapshot))
        .route("/groups/{name}/sources", get(group_sources))
        .with_state(state);

    let router = match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    };
    router.layer(CorsLayer::very_permissive())
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupSummary {
    name: String,
    availability: Availability,
    active_source_id: Option<String>,
    version: u64,
    generated_at: Option<DateTime<Utc>>,
}

async fn list_groups(State(state): State<AppState>) -> Json<Vec<GroupSummary>> {
    let out = state
        .groups
        .iter()
        .map(|(name, reader)| {
            let s = reader.current();
            GroupSummary {
                name: name.clone(),
                availability: s.availability,
                active_source_id: s.active_source_id.clone(),
                version: s.version,
                generated_at: s.generated_at,
            }
        })
        .collect();
    Json(out)
}

async fn group_snapshot(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Arc<AggregatedSnapshot>>, StatusCode> {
    state.snapshot(&name).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn group_sources(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<SourceStatusEntry>>, StatusCode> {
    state
        .snapshot(&name)
        .map(|s| Json(s.source_statuses.clone()))
        .ok_or(StatusCode::NOT_FOUND)
}
