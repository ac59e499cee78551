//! Batch job input and aggregated result

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use uuid::Uuid;

/// Prefix of the failure reason recorded for items skipped after a stop
pub const STOPPED_REASON_PREFIX: &str = "stopped";

/// Worklist for one batch invocation
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Artist ids in scheduling order
    pub entity_ids: Vec<String>,
    /// Maximum items in flight (at least 1)
    pub concurrency_limit: usize,
    /// Pause each worker takes after its own fetch
    pub inter_request_delay: Duration,
}

impl BatchJob {
    pub fn new(entity_ids: Vec<String>, concurrency_limit: usize, inter_request_delay: Duration) -> Self {
        Self {
            entity_ids,
            concurrency_limit: concurrency_limit.max(1),
            inter_request_delay,
        }
    }
}

/// Per-item outcomes of a batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub run_id: Uuid,
    pub successful: BTreeSet<String>,
    /// Failed or skipped ids with their reason
    pub failed: BTreeMap<String, String>,
    pub stopped_early: bool,
    pub stop_reason: Option<String>,
    pub total: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchResult {
    pub fn new(total: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            successful: BTreeSet::new(),
            failed: BTreeMap::new(),
            stopped_early: false,
            stop_reason: None,
            total,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_success(&mut self, id: String) {
        self.failed.remove(&id);
        self.successful.insert(id);
    }

    pub fn record_failure(&mut self, id: String, reason: String) {
        if !self.successful.contains(&id) {
            self.failed.insert(id, reason);
        }
    }

    /// Mark the run as stopped; only the first reason is kept
    pub fn record_stop(&mut self, reason: impl Into<String>) {
        self.stopped_early = true;
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason.into());
        }
    }

    pub fn success_count(&self) -> usize {
        self.successful.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    /// Items never recorded either way
    pub fn unattempted_count(&self) -> usize {
        self.total
            .saturating_sub(self.successful.len() + self.failed.len())
    }

    /// Ids skipped because of a stop signal
    pub fn skipped_ids(&self) -> impl Iterator<Item = &String> {
        self.failed
            .iter()
            .filter(|(_, reason)| reason.starts_with(STOPPED_REASON_PREFIX))
            .map(|(id, _)| id)
    }
}
