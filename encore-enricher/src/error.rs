//! Error types for encore-enricher
//!
//! Callers only ever see the terminal classification of a request; retries
//! happen below these types.

use thiserror::Error;

/// Credential acquisition errors
///
/// `Clone` because a single refresh result is shared with every caller that
/// waited on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// All refresh attempts failed on transient errors
    #[error("Credential refresh exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// Endpoint answered but the body was unusable (not retried)
    #[error("Malformed credential response: {0}")]
    Malformed(String),

    /// Endpoint rejected the request outright (not retried)
    #[error("Credential endpoint rejected request: HTTP {0}")]
    Rejected(u16),
}

/// Errors from a single credential endpoint call, before retry handling
#[derive(Debug, Clone, Error)]
pub enum CredentialFetchError {
    /// Network error, timeout or 5xx
    #[error("Transient credential error: {0}")]
    Transient(String),

    /// Non-retryable HTTP status
    #[error("Credential endpoint returned HTTP {0}")]
    Status(u16),

    /// Body could not be parsed or lacked the token
    #[error("Malformed credential response: {0}")]
    Malformed(String),
}

/// Terminal outcome of `fetch_enrichment`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// No credential could be obtained for the request
    #[error("Credential unavailable: {0}")]
    Credential(#[from] CredentialError),

    /// Authentication rejected even after one forced refresh
    #[error("Authentication rejected after token refresh (HTTP {status})")]
    Auth { status: u16 },

    /// Server-side failures exhausted the retry budget
    #[error("Transient failure after {attempts} attempts: {reason}")]
    Transient { attempts: u32, reason: String },

    /// Response body did not have the expected shape
    #[error("Unexpected response shape: {0}")]
    DataShape(String),

    /// Client-side rejection other than authentication
    #[error("Request rejected with HTTP {status}: {message}")]
    Permanent { status: u16, message: String },
}

impl FetchError {
    /// Whether this failure means the credential itself is unusable for every
    /// item, as opposed to a problem with one entity's data
    pub fn is_systemic(&self) -> bool {
        matches!(self, FetchError::Auth { .. } | FetchError::Credential(_))
    }
}

/// Errors that abort a batch run instead of producing a `BatchResult`
#[derive(Debug, Error)]
pub enum BatchError {
    /// A worker panicked; aggregation can no longer be trusted
    #[error("Batch worker panicked: {0}")]
    WorkerPanicked(String),
}

/// Outcome of one attempt inside a retry loop
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Operation succeeded
    Ok(T),
    /// Failure worth retrying after backoff
    Retryable(E),
    /// Failure that ends the loop immediately
    Fatal(E),
}
