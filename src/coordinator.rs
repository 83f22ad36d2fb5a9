// src/coordinator.rs
//! One poll cycle per tick: fetch every source concurrently, update health,
//! select, publish.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::group::Group;
use crate::health::{
    HealthTracker, DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_OBSERVATION_AGE_SECS,
};
use crate::metrics::ensure_metrics_described;
use crate::selection::SelectionPolicy;
use crate::snapshot::{
    AggregatedSnapshot, Availability, SnapshotPublisher, SnapshotReader, SourceStatusEntry,
};
use crate::source::{Credentials, FetchError, FetchOptions, SourceClient};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub failure_threshold: u32,
    /// Whole per-source budget, forecast request included.
    pub fetch_timeout: Duration,
    /// A Degraded source whose cache is older than this goes Offline.
    pub max_observation_age: Option<ChronoDuration>,
    pub options: FetchOptions,
    pub credentials: Credentials,
}

impl CoordinatorSettings {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_observation_age: Some(ChronoDuration::seconds(DEFAULT_MAX_OBSERVATION_AGE_SECS)),
            options: FetchOptions::default(),
            credentials,
        }
    }
}

pub struct FallbackCoordinator {
    group: Group,
    client: Arc<dyn SourceClient>,
    settings: CoordinatorSettings,
    health: HealthTracker,
    policy: SelectionPolicy,
    publisher: SnapshotPublisher,
}

impl FallbackCoordinator {
    pub fn new(group: Group, client: Arc<dyn SourceClient>, settings: CoordinatorSettings) -> Self {
        ensure_metrics_described();
        let health = HealthTracker::new(group.sources(), settings.failure_threshold)
            .with_max_observation_age(settings.max_observation_age);
        let policy = SelectionPolicy;
        let publisher = SnapshotPublisher::new(group.name());
        Self {
            group,
            client,
            settings,
            health,
            policy,
            publisher,
        }
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn health_mut(&mut self) -> &mut HealthTracker {
        &mut self.health
    }

    pub fn reader(&self) -> SnapshotReader {
        self.publisher.reader()
    }

    pub fn current(&self) -> Arc<AggregatedSnapshot> {
        self.publisher.current()
    }

    pub async fn run_cycle(&mut self) -> Arc<AggregatedSnapshot> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one full cycle stamped with `now`. Always publishes.
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> Arc<AggregatedSnapshot> {
        let group_name = self.group.name().to_string();
        let previous_active = self.publisher.current().active_source_id.clone();

        let mut options = self.settings.options.clone();
        if let Some(c) = self.group.coordinates() {
            options.coordinates = Some(c);
        }

        // Locked sources keep their sticky status without spending requests.
        let targets: Vec<_> = self
            .group
            .sources()
            .iter()
            .filter(|s| !self.health.is_locked(&s.id))
            .collect();

        let client = self.client.as_ref();
        let credentials = &self.settings.credentials;
        let budget = self.settings.fetch_timeout;
        let options = &options;

        let fetches = targets.into_iter().map(move |source| async move {
            let started = Instant::now();
            let res = match tokio::time::timeout(budget, client.fetch(source, credentials, options))
                .await
            {
                Ok(r) => r,
                Err(_) => Err(FetchError::Timeout(budget)),
            };
            (source.id.clone(), res, started.elapsed())
        });
        let results = join_all(fetches).await;

        for (id, res, elapsed) in results {
            let elapsed_ms = elapsed.as_millis() as u64;
            histogram!("pws_fetch_ms").record(elapsed_ms as f64);
            match &res {
                Ok(obs) => {
                    counter!("pws_fetch_total", "group" => group_name.clone(), "outcome" => "ok")
                        .increment(1);
                    let expired = obs.forecast.as_ref().map(|f| f.expired_count()).unwrap_or(0);
                    if expired > 0 {
                        counter!("pws_forecast_expired_total", "group" => group_name.clone())
                            .increment(expired as u64);
                    }
                    tracing::debug!(
                        target: "coordinator",
                        group = %group_name,
                        source = %id,
                        elapsed_ms,
                        expired,
                        "fetch ok"
                    );
                }
                Err(e) => {
                    counter!("pws_fetch_total", "group" => group_name.clone(), "outcome" => "error")
                        .increment(1);
                    counter!(
                        "pws_fetch_errors_total",
                        "group" => group_name.clone(),
                        "kind" => e.kind().as_str()
                    )
                    .increment(1);
                    tracing::warn!(
                        target: "coordinator",
                        group = %group_name,
                        source = %id,
                        elapsed_ms,
                        kind = e.kind().as_str(),
                        error = %e,
                        "fetch failed"
                    );
                }
            }
            self.health.record(&id, res, now);
        }

        let snapshot = self.build_snapshot(now);
        let new_active = snapshot.active_source_id.clone();
        let usable = self.health.usable_count();
        self.publisher.publish(snapshot);

        counter!("pws_cycle_total", "group" => group_name.clone()).increment(1);
        gauge!("pws_cycle_last_run_ts", "group" => group_name.clone())
            .set(now.timestamp().max(0) as f64);
        gauge!("pws_usable_sources", "group" => group_name.clone()).set(usable as f64);

        if previous_active != new_active {
            match (&previous_active, &new_active) {
                (_, None) => tracing::warn!(
                    target: "coordinator",
                    group = %group_name,
                    from = ?previous_active,
                    "no usable source; group unavailable"
                ),
                (None, Some(to)) => tracing::info!(
                    target: "coordinator",
                    group = %group_name,
                    source = %to,
                    "active source selected"
                ),
                (Some(from), Some(to)) => {
                    counter!("pws_failover_total", "group" => group_name.clone()).increment(1);
                    tracing::info!(
                        target: "coordinator",
                        group = %group_name,
                        from = %from,
                        source = %to,
                        "active source changed"
                    );
                }
            }
        }

        self.publisher.current()
    }

    fn build_snapshot(&self, now: DateTime<Utc>) -> AggregatedSnapshot {
        let records = self.health.records();
        let chosen = self.policy.select(records);
        let active_id = chosen.map(|h| h.source().id.as_str());

        let source_statuses = records
            .iter()
            .map(|h| SourceStatusEntry::from_health(h, Some(h.source().id.as_str()) == active_id))
            .collect();

        match chosen.and_then(|h| h.last_good().map(|g| (h, g))) {
            Some((h, good)) => AggregatedSnapshot {
                group: self.group.name().to_string(),
                version: 0,
                generated_at: Some(now),
                availability: Availability::Available,
                active_source_id: Some(h.source().id.clone()),
                active_source_name: Some(h.source().display_name.clone()),
                coordinates: self
                    .group
                    .coordinates()
                    .or_else(|| good.observation.current.coordinates()),
                values: Some(good.observation.clone()),
                source_statuses,
            },
            None => AggregatedSnapshot {
                group: self.group.name().to_string(),
                version: 0,
                generated_at: Some(now),
                availability: Availability::Unavailable,
                active_source_id: None,
                active_source_name: None,
                coordinates: self.group.coordinates(),
                values: None,
                source_statuses,
            },
        }
    }

    /// Move the coordinator onto its own task, ticking every `every`. The
    /// first cycle runs immediately; ticks missed by a slow cycle are skipped.
    pub fn spawn(mut self, every: Duration) -> GroupHandle {
        let name = self.group.name().to_string();
        let reader = self.reader();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task_name = name.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(
                target: "coordinator",
                group = %task_name,
                every_secs = every.as_secs(),
                "coordinator started"
            );
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                // Teardown drops the cycle future, cancelling in-flight fetches.
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = self.run_cycle() => {}
                }
            }
            tracing::info!(target: "coordinator", group = %task_name, "coordinator stopped");
        });

        GroupHandle {
            name,
            reader,
            stop: stop_tx,
            task: Some(task),
        }
    }
}

/// Owns a running group task. Dropping it without `shutdown` aborts the task.
pub struct GroupHandle {
    name: String,
    reader: SnapshotReader,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl GroupHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reader(&self) -> SnapshotReader {
        self.reader.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop the timer, cancel any in-flight cycle, and wait for the task.
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(
                    target: "coordinator",
                    group = %self.name,
                    error = %e,
                    "coordinator task ended abnormally"
                );
            }
        }
    }
}

impl Drop for GroupHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
