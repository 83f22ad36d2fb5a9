// src/health.rs
//! Per-source health: last good reading, failure streak, derived status.
//!
//! Owned by exactly one coordinator task, so nothing here locks.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::group::Source;
use crate::observation::Observation;
use crate::source::FetchError;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 2;
pub const DEFAULT_MAX_OBSERVATION_AGE_SECS: i64 = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Unknown,
    Active,
    Degraded,
    Offline,
}

impl SourceStatus {
    /// Whether the source may back a published snapshot.
    pub fn is_usable(self) -> bool {
        matches!(self, SourceStatus::Active | SourceStatus::Degraded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceStatus::Unknown => "unknown",
            SourceStatus::Active => "active",
            SourceStatus::Degraded => "degraded",
            SourceStatus::Offline => "offline",
        }
    }
}

/// The last successful fetch: reading and timestamp travel together.
#[derive(Debug, Clone, PartialEq)]
pub struct LastGood {
    pub observation: Arc<Observation>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SourceHealth {
    source: Source,
    status: SourceStatus,
    last_good: Option<LastGood>,
    consecutive_failures: u32,
    last_error: Option<FetchError>,
    credentials_rejected: bool,
}

impl SourceHealth {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            status: SourceStatus::Unknown,
            last_good: None,
            consecutive_failures: 0,
            last_error: None,
            credentials_rejected: false,
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }
    pub fn status(&self) -> SourceStatus {
        self.status
    }
    pub fn last_good(&self) -> Option<&LastGood> {
        self.last_good.as_ref()
    }
    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_good.as_ref().map(|g| g.at)
    }
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
    pub fn last_error(&self) -> Option<&FetchError> {
        self.last_error.as_ref()
    }
    pub fn credentials_rejected(&self) -> bool {
        self.credentials_rejected
    }

    /// True when the cached reading is older than `max_age` at `now`.
    pub fn is_stale(&self, max_age: Option<ChronoDuration>, now: DateTime<Utc>) -> bool {
        match (max_age, &self.last_good) {
            (Some(max), Some(good)) => now.signed_duration_since(good.at) > max,
            _ => false,
        }
    }

    /// Apply one fetch outcome and return the new status.
    fn apply(
        &mut self,
        outcome: Result<Observation, FetchError>,
        at: DateTime<Utc>,
        threshold: u32,
        max_age: Option<ChronoDuration>,
    ) -> SourceStatus {
        match outcome {
            Ok(obs) => {
                self.last_good = Some(LastGood {
                    observation: Arc::new(obs),
                    at,
                });
                self.consecutive_failures = 0;
                self.last_error = None;
                self.credentials_rejected = false;
                self.status = SourceStatus::Active;
            }
            Err(err) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if err.is_sticky() {
                    self.credentials_rejected = true;
                    self.status = SourceStatus::Offline;
                } else if self.consecutive_failures >= threshold || self.is_stale(max_age, at) {
                    // a cache too old to serve ends the grace period early
                    self.status = SourceStatus::Offline;
                } else {
                    self.status = match self.status {
                        SourceStatus::Active | SourceStatus::Degraded => SourceStatus::Degraded,
                        // nothing cached to serve during a grace cycle
                        other => other,
                    };
                }
                self.last_error = Some(err);
            }
        }
        self.status
    }
}

/// Health records for one group, in the group's selection order.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    records: Vec<SourceHealth>,
    threshold: u32,
    max_observation_age: Option<ChronoDuration>,
}

impl HealthTracker {
    /// `threshold` below 1 is treated as 1.
    pub fn new(sources: &[Source], threshold: u32) -> Self {
        Self {
            records: sources.iter().cloned().map(SourceHealth::new).collect(),
            threshold: threshold.max(1),
            max_observation_age: None,
        }
    }

    /// Degraded sources whose last success is older than `age` go Offline
    /// before the failure threshold is reached. `None` disables the check.
    pub fn with_max_observation_age(mut self, age: Option<ChronoDuration>) -> Self {
        self.max_observation_age = age;
        self
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn max_observation_age(&self) -> Option<ChronoDuration> {
        self.max_observation_age
    }

    pub fn records(&self) -> &[SourceHealth] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&SourceHealth> {
        self.records.iter().find(|h| h.source.id == id)
    }

    pub fn is_locked(&self, id: &str) -> bool {
        self.get(id).is_some_and(|h| h.credentials_rejected)
    }

    pub fn usable_count(&self) -> usize {
        self.records.iter().filter(|h| h.status.is_usable()).count()
    }

    /// Feed one outcome for `id`. Returns the status after the update, or
    /// `None` when the id is not part of this group.
    pub fn record(
        &mut self,
        id: &str,
        outcome: Result<Observation, FetchError>,
        at: DateTime<Utc>,
    ) -> Option<SourceStatus> {
        let threshold = self.threshold;
        let max_age = self.max_observation_age;
        let h = self.records.iter_mut().find(|h| h.source.id == id)?;
        let before = h.status;
        let was_locked = h.credentials_rejected;
        let after = h.apply(outcome, at, threshold, max_age);

        if h.credentials_rejected && !was_locked {
            tracing::warn!(
                target: "health",
                source = %id,
                error = ?h.last_error,
                "credentials rejected; source locked out until reconfigured"
            );
        } else if before != after {
            tracing::info!(
                target: "health",
                source = %id,
                from = before.as_str(),
                status = after.as_str(),
                failures = h.consecutive_failures,
                "source status changed"
            );
        } else {
            tracing::debug!(
                target: "health",
                source = %id,
                status = after.as_str(),
                failures = h.consecutive_failures,
                "source status unchanged"
            );
        }
        Some(after)
    }

    /// Lift a credentials lockout after the key was fixed. The source starts
    /// over as `Unknown` and is fetched again on the next cycle.
    pub fn clear_credentials_lock(&mut self, id: &str) -> bool {
        match self.records.iter_mut().find(|h| h.source.id == id) {
            Some(h) if h.credentials_rejected => {
                h.credentials_rejected = false;
                h.consecutive_failures = 0;
                h.last_error = None;
                h.status = SourceStatus::Unknown;
                tracing::info!(target: "health", source = %id, "credentials lock cleared");
                true
            }
            _ => false,
        }
    }
}
