//! Web player credential endpoint client
//!
//! Fetches the anonymous bearer token the partner API accepts. One call per
//! refresh; retry and caching live in [`TokenCache`](super::token_cache::TokenCache).

use crate::error::CredentialFetchError;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://open.spotify.com/get_access_token";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Token as issued by the credential endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub value: String,
    /// `None` when the endpoint omitted the expiry
    pub expires_at: Option<DateTime<Utc>>,
}

/// Anything that can mint a fresh partner credential
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch_token(&self) -> Result<IssuedToken, CredentialFetchError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: Option<String>,
    access_token_expiration_timestamp_ms: Option<i64>,
}

/// Parse the credential endpoint body
///
/// A missing or empty `accessToken` is malformed. A missing or out-of-range
/// expiry yields `expires_at = None` so the cache applies its default
/// lifetime.
pub fn parse_token_response(body: &str) -> Result<IssuedToken, CredentialFetchError> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|e| CredentialFetchError::Malformed(e.to_string()))?;

    let value = response
        .access_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| {
            CredentialFetchError::Malformed("response missing accessToken".to_string())
        })?;

    let expires_at = response
        .access_token_expiration_timestamp_ms
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    Ok(IssuedToken { value, expires_at })
}

/// Only 5xx is worth retrying; every other non-2xx status is final
fn check_status(status: u16) -> Result<(), CredentialFetchError> {
    match status {
        200..=299 => Ok(()),
        500..=599 => Err(CredentialFetchError::Transient(format!("HTTP {}", status))),
        _ => Err(CredentialFetchError::Status(status)),
    }
}

/// HTTP client for the credential endpoint
pub struct WebTokenClient {
    http_client: reqwest::Client,
    endpoint: String,
}

impl WebTokenClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, CredentialFetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| CredentialFetchError::Transient(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl CredentialSource for WebTokenClient {
    async fn fetch_token(&self) -> Result<IssuedToken, CredentialFetchError> {
        tracing::debug!(endpoint = %self.endpoint, "Requesting partner access token");

        let response = self
            .http_client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| CredentialFetchError::Transient(e.to_string()))?;

        check_status(response.status().as_u16())?;

        let body = response
            .text()
            .await
            .map_err(|e| CredentialFetchError::Transient(e.to_string()))?;

        parse_token_response(&body)
    }
}
