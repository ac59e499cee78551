//! Services for encore-enricher
//!
//! Credential handling, the partner request path, merging and batch
//! orchestration.

pub mod batch_orchestrator;
pub mod credential_client;
pub mod credential_store;
pub mod extract;
pub mod merge_engine;
pub mod partner_client;
pub mod record_sink;
pub mod request_executor;
pub mod token_cache;

pub use batch_orchestrator::{BatchOrchestrator, INTERRUPTED_REASON};
pub use credential_client::{CredentialSource, IssuedToken, WebTokenClient};
pub use credential_store::{CredentialStore, FileCredentialStore};
pub use extract::extract_artist_overview;
pub use merge_engine::{merge, merge_at};
pub use partner_client::{PartnerApiClient, PartnerResponse, PartnerTransport, TransportError};
pub use record_sink::{GatewaySink, RecordSink};
pub use request_executor::{EnrichmentFetcher, RequestExecutor};
pub use token_cache::{TokenCache, TokenCacheSettings};
