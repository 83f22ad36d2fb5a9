// src/selection.rs
use crate::health::SourceHealth;

/// Picks the active source of a group. Stateless: every cycle starts from
/// scratch, so a recovered higher-priority source wins back immediately.
///
/// Only status matters here. Staleness is handled by the health tracker,
/// which takes a too-old cache Offline, so a usable status always qualifies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionPolicy;

impl SelectionPolicy {
    pub fn qualifies(&self, h: &SourceHealth) -> bool {
        h.status().is_usable() && h.last_good().is_some()
    }

    /// Lowest priority number among qualifying records; ties go to the
    /// record that comes first (configuration order).
    pub fn select<'a>(&self, records: &'a [SourceHealth]) -> Option<&'a SourceHealth> {
        records
            .iter()
            .filter(|h| self.qualifies(h))
            .min_by_key(|h| h.source().priority)
    }
}
