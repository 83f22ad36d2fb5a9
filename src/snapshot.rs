// src/snapshot.rs
//! Immutable, versioned read model of one group plus its single-writer
//! publisher. Readers clone an `Arc` and never block the coordinator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::group::Coordinates;
use crate::health::{SourceHealth, SourceStatus};
use crate::observation::Observation;
use crate::source::FetchErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    /// No cycle has completed yet.
    Pending,
    Available,
    /// A cycle completed but no source was usable.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatusEntry {
    pub id: String,
    pub display_name: String,
    pub priority: u32,
    pub status: SourceStatus,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error_kind: Option<FetchErrorKind>,
    pub last_error: Option<String>,
    /// Operator warning: the key was rejected and retrying will not help.
    pub credentials_rejected: bool,
    pub active: bool,
}

impl SourceStatusEntry {
    pub fn from_health(h: &SourceHealth, active: bool) -> Self {
        let src = h.source();
        Self {
            id: src.id.clone(),
            display_name: src.display_name.clone(),
            priority: src.priority,
            status: h.status(),
            last_success_at: h.last_success_at(),
            consecutive_failures: h.consecutive_failures(),
            last_error_kind: h.last_error().map(|e| e.kind()),
            last_error: h.last_error().map(|e| e.to_string()),
            credentials_rejected: h.credentials_rejected(),
            active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedSnapshot {
    pub group: String,
    /// 0 for the initial pending snapshot, +1 per publication.
    pub version: u64,
    pub generated_at: Option<DateTime<Utc>>,
    pub availability: Availability,
    pub active_source_id: Option<String>,
    pub active_source_name: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub values: Option<Arc<Observation>>,
    pub source_statuses: Vec<SourceStatusEntry>,
}

impl AggregatedSnapshot {
    pub fn pending(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: 0,
            generated_at: None,
            availability: Availability::Pending,
            active_source_id: None,
            active_source_name: None,
            coordinates: None,
            values: None,
            source_statuses: Vec::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }

    pub fn status_of(&self, id: &str) -> Option<&SourceStatusEntry> {
        self.source_statuses.iter().find(|e| e.id == id)
    }

    /// Content comparison that ignores `version` and `generated_at`.
    pub fn differs_from(&self, other: &AggregatedSnapshot) -> bool {
        self.availability != other.availability
            || self.active_source_id != other.active_source_id
            || self.coordinates != other.coordinates
            || self.values != other.values
            || self.source_statuses != other.source_statuses
    }
}

/// The one writer for a group's snapshot. Deliberately not `Clone`.
#[derive(Debug)]
pub struct SnapshotPublisher {
    tx: watch::Sender<Arc<AggregatedSnapshot>>,
}

impl SnapshotPublisher {
    pub fn new(group: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(AggregatedSnapshot::pending(group)));
        Self { tx }
    }

    /// Swap in `snap` with the next version number. Returns true when
    /// subscribers were notified (content changed).
    pub fn publish(&self, mut snap: AggregatedSnapshot) -> bool {
        snap.version = self.tx.borrow().version + 1;
        let snap = Arc::new(snap);
        self.tx.send_if_modified(move |cur| {
            let changed = snap.differs_from(cur);
            *cur = snap;
            changed
        })
    }

    pub fn current(&self) -> Arc<AggregatedSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<Arc<AggregatedSnapshot>>,
}

impl SnapshotReader {
    pub fn current(&self) -> Arc<AggregatedSnapshot> {
        self.rx.borrow().clone()
    }

    /// Wait for the next content change. `None` once the publisher is gone.
    pub async fn changed(&mut self) -> Option<Arc<AggregatedSnapshot>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, status: SourceStatus) -> SourceStatusEntry {
        SourceStatusEntry {
            id: id.into(),
            display_name: id.into(),
            priority: 1,
            status,
            last_success_at: None,
            consecutive_failures: 0,
            last_error_kind: None,
            last_error: None,
            credentials_rejected: false,
            active: false,
        }
    }

    fn unavailable(group: &str) -> AggregatedSnapshot {
        AggregatedSnapshot {
            availability: Availability::Unavailable,
            generated_at: Some(Utc::now()),
            source_statuses: vec![entry("A", SourceStatus::Offline)],
            ..AggregatedSnapshot::pending(group)
        }
    }

    #[test]
    fn versions_increase_and_pending_is_zero() {
        let p = SnapshotPublisher::new("g");
        assert_eq!(p.current().version, 0);
        assert_eq!(p.current().availability, Availability::Pending);
        p.publish(unavailable("g"));
        p.publish(unavailable("g"));
        assert_eq!(p.current().version, 2);
    }

    #[test]
    fn timestamp_only_change_does_not_notify() {
        let p = SnapshotPublisher::new("g");
        assert!(p.publish(unavailable("g")));
        assert!(!p.publish(unavailable("g")));

        let mut next = unavailable("g");
        next.source_statuses[0].consecutive_failures = 3;
        assert!(p.publish(next));
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(unavailable("g")).unwrap();
        assert_eq!(v["availability"], "unavailable");
        assert!(v["activeSourceId"].is_null());
        assert_eq!(v["sourceStatuses"][0]["status"], "offline");
    }
}
