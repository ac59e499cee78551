//! Destination for fetched enrichment payloads

use crate::db::PersistenceGateway;
use crate::models::{EnrichmentPayload, PersistedRecord};
use crate::services::merge_engine;
use async_trait::async_trait;
use encore_common::{Error, Result};
use std::sync::Arc;

/// Commits one artist's payload; failures are local to that artist
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn commit(&self, entity_id: &str, payload: &EnrichmentPayload) -> Result<()>;
}

/// Read-merge-write sink over a [`PersistenceGateway`]
///
/// The stored record is read immediately before the merge so that fields
/// written by other writers since the batch started are preserved.
pub struct GatewaySink {
    gateway: Arc<dyn PersistenceGateway>,
    source_tag: String,
}

impl GatewaySink {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, source_tag: impl Into<String>) -> Self {
        Self {
            gateway,
            source_tag: source_tag.into(),
        }
    }

    /// Merge `payload` into the stored record and write it back
    pub async fn merge_and_store(
        &self,
        entity_id: &str,
        payload: &EnrichmentPayload,
    ) -> Result<PersistedRecord> {
        let existing = self.gateway.get(entity_id).await?;
        let merged = merge_engine::merge(entity_id, existing.as_ref(), payload, &self.source_tag);

        if !self.gateway.put(&merged).await? {
            return Err(Error::Internal(format!(
                "store accepted no write for artist {}",
                entity_id
            )));
        }

        Ok(merged)
    }
}

#[async_trait]
impl RecordSink for GatewaySink {
    async fn commit(&self, entity_id: &str, payload: &EnrichmentPayload) -> Result<()> {
        let record = self.merge_and_store(entity_id, payload).await?;
        tracing::debug!(
            artist_id = %entity_id,
            monthly_listeners = ?record.monthly_listeners,
            upcoming_events = record.upcoming_events_count(),
            "Artist record updated"
        );
        Ok(())
    }
}
