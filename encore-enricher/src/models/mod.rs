//! Data models for encore-enricher

pub mod batch;
pub mod credential;
pub mod enrichment;
pub mod record;

pub use batch::{BatchJob, BatchResult, STOPPED_REASON_PREFIX};
pub use credential::{Credential, StoredCredential};
pub use enrichment::{City, EnrichmentPayload, Event};
pub use record::{FieldProvenance, PersistedRecord, OFFICIAL_SOURCE_TAG, PARTNER_SOURCE_TAG};
