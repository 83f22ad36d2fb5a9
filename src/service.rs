// src/service.rs
//! Starts one coordinator task per configured group and tears them down.

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::coordinator::{CoordinatorSettings, FallbackCoordinator, GroupHandle};
use crate::group::Group;
use crate::snapshot::SnapshotReader;
use crate::source::{SourceClient, WundergroundClient};

pub struct Service {
    handles: Vec<GroupHandle>,
}

impl Service {
    /// Build the upstream client from `cfg` and start every group.
    pub fn start(cfg: &AppConfig) -> Result<Self> {
        let client: Arc<dyn SourceClient> =
            Arc::new(WundergroundClient::new(cfg.request_timeout())?);
        let groups = cfg.groups()?;
        let settings = cfg.coordinator_settings()?;
        Ok(Self::start_with(groups, client, settings, cfg.poll_interval()))
    }

    pub fn start_with(
        groups: Vec<Group>,
        client: Arc<dyn SourceClient>,
        settings: CoordinatorSettings,
        every: Duration,
    ) -> Self {
        let handles = groups
            .into_iter()
            .map(|g| {
                tracing::info!(
                    group = %g.name(),
                    sources = g.sources().len(),
                    client = client.name(),
                    "starting group"
                );
                FallbackCoordinator::new(g, client.clone(), settings.clone()).spawn(every)
            })
            .collect();
        Self { handles }
    }

    /// Readers keyed by group name, for the HTTP layer.
    pub fn readers(&self) -> BTreeMap<String, SnapshotReader> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.reader()))
            .collect()
    }

    pub fn reader(&self, group: &str) -> Option<SnapshotReader> {
        self.handles
            .iter()
            .find(|h| h.name() == group)
            .map(|h| h.reader())
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.handles.iter().map(|h| h.name()).collect()
    }

    pub async fn shutdown(self) {
        for h in self.handles {
            h.shutdown().await;
        }
        tracing::info!("all groups stopped");
    }
}
