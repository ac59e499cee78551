//! Partner API transport
//!
//! Issues the single `queryArtistOverview` GET. The transport reports the raw
//! status and body; classification and retry belong to the
//! [`RequestExecutor`](super::request_executor::RequestExecutor).

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PARTNER_ENDPOINT: &str = "https://api-partner.spotify.com/pathfinder/v1/query";
pub const DEFAULT_ARTIST_QUERY_HASH: &str =
    "591ed473fa2f5426186f8ba52dee295fe1ce32b36820d67eaadbc957d89408b0";
const OPERATION_NAME: &str = "queryArtistOverview";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36";

/// Transport-level failures (no HTTP status available)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,
}

/// Raw partner API response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerResponse {
    pub status: u16,
    pub body: String,
}

/// Anything that can perform the artist overview request
#[async_trait]
pub trait PartnerTransport: Send + Sync {
    async fn get_artist_overview(
        &self,
        artist_id: &str,
        bearer: &str,
    ) -> Result<PartnerResponse, TransportError>;
}

/// Query parameters for the persisted `queryArtistOverview` operation
pub fn artist_overview_params(artist_id: &str, query_hash: &str) -> [(&'static str, String); 3] {
    let variables = json!({
        "uri": format!("spotify:artist:{}", artist_id),
        "locale": "",
    });
    let extensions = json!({
        "persistedQuery": {
            "version": 1,
            "sha256Hash": query_hash,
        }
    });

    [
        ("operationName", OPERATION_NAME.to_string()),
        ("variables", variables.to_string()),
        ("extensions", extensions.to_string()),
    ]
}

/// reqwest-backed partner API client
pub struct PartnerApiClient {
    http_client: reqwest::Client,
    endpoint: String,
    query_hash: String,
}

impl PartnerApiClient {
    pub fn new(
        endpoint: impl Into<String>,
        query_hash: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            query_hash: query_hash.into(),
        })
    }
}

#[async_trait]
impl PartnerTransport for PartnerApiClient {
    async fn get_artist_overview(
        &self,
        artist_id: &str,
        bearer: &str,
    ) -> Result<PartnerResponse, TransportError> {
        tracing::debug!(artist_id = %artist_id, "Querying partner API");

        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&artist_overview_params(artist_id, &self.query_hash))
            .header(reqwest::header::AUTHORIZATION, bearer)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en")
            .header("app-platform", "WebPlayer")
            .header(reqwest::header::ORIGIN, "https://open.spotify.com")
            .header(reqwest::header::REFERER, "https://open.spotify.com/")
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_reqwest_error)?;

        Ok(PartnerResponse { status, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}
