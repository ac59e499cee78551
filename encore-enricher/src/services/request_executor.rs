//! Partner request executor
//!
//! Performs one enrichment fetch for one artist and classifies the outcome.
//!
//! **Algorithm:**
//! 1. Acquire a credential from the [`TokenCache`]
//! 2. Wait on the global rate limiter, if configured
//! 3. Send the request under `request_timeout`
//! 4. 2xx → parse and extract; 401 → replace the credential once and go to 2;
//!    5xx, network errors and timeouts → back off and retry;
//!    any other status → permanent failure

use crate::error::{Attempt, FetchError};
use crate::models::{Credential, EnrichmentPayload};
use crate::services::extract::extract_artist_overview;
use crate::services::partner_client::{PartnerResponse, PartnerTransport, TransportError};
use crate::services::token_cache::TokenCache;
use crate::utils::{retry_with_backoff, RetryFailure, RetryPolicy, Sleeper, TokioSleeper};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type PartnerRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const UNAUTHORIZED: u16 = 401;

/// Anything that can turn an artist id into an enrichment payload
#[async_trait]
pub trait EnrichmentFetcher: Send + Sync {
    async fn fetch_enrichment(&self, entity_id: &str) -> Result<EnrichmentPayload, FetchError>;
}

/// Failure of one partner call, before the 401 and retry handling above it
#[derive(Debug)]
enum CallFailure {
    Transient(String),
    Unauthorized,
    Rejected { status: u16, message: String },
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallFailure::Transient(reason) => write!(f, "{}", reason),
            CallFailure::Unauthorized => write!(f, "HTTP {}", UNAUTHORIZED),
            CallFailure::Rejected { status, message } => write!(f, "HTTP {}: {}", status, message),
        }
    }
}

/// Executes partner API requests with credential handling and retry
pub struct RequestExecutor {
    token_cache: TokenCache,
    transport: Arc<dyn PartnerTransport>,
    retry: RetryPolicy,
    request_timeout: Duration,
    sleeper: Arc<dyn Sleeper>,
    rate_limiter: Option<PartnerRateLimiter>,
}

impl RequestExecutor {
    pub fn new(
        token_cache: TokenCache,
        transport: Arc<dyn PartnerTransport>,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        Self {
            token_cache,
            transport,
            retry,
            request_timeout,
            sleeper: Arc::new(TokioSleeper),
            rate_limiter: None,
        }
    }

    /// Replace the backoff sleeper (tests inject a recording sleeper)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Cap partner requests across all workers sharing this executor
    pub fn with_rate_limit(mut self, requests_per_second: NonZeroU32) -> Self {
        self.rate_limiter = Some(RateLimiter::direct(Quota::per_second(requests_per_second)));
        self
    }

    pub fn token_cache(&self) -> &TokenCache {
        &self.token_cache
    }

    /// Fetch and extract the artist overview for `entity_id`
    pub async fn fetch_enrichment(&self, entity_id: &str) -> Result<EnrichmentPayload, FetchError> {
        let mut credential = self.token_cache.acquire(false).await?;
        let mut replaced = false;

        loop {
            match self.call_with_retry(entity_id, &credential).await {
                Ok(body) => {
                    let payload = parse_overview(&body)?;
                    tracing::debug!(
                        artist_id = %entity_id,
                        name = %payload.primary_name,
                        "Partner enrichment fetched"
                    );
                    return Ok(payload);
                }
                Err(RetryFailure::Fatal {
                    error: CallFailure::Unauthorized,
                    ..
                }) => {
                    if replaced {
                        tracing::error!(
                            artist_id = %entity_id,
                            "Partner API still rejects credential after refresh"
                        );
                        return Err(FetchError::Auth { status: UNAUTHORIZED });
                    }

                    tracing::warn!(artist_id = %entity_id, "Partner API rejected credential, refreshing");
                    credential = self.token_cache.replace(&credential).await?;
                    replaced = true;
                }
                Err(RetryFailure::Fatal {
                    error: CallFailure::Rejected { status, message },
                    ..
                }) => {
                    tracing::warn!(artist_id = %entity_id, status, "Partner API rejected request");
                    return Err(FetchError::Permanent { status, message });
                }
                Err(failure) => {
                    let attempts = failure.attempts();
                    return Err(FetchError::Transient {
                        attempts,
                        reason: failure.into_error().to_string(),
                    });
                }
            }
        }
    }

    async fn call_with_retry(
        &self,
        entity_id: &str,
        credential: &Credential,
    ) -> Result<String, RetryFailure<CallFailure>> {
        let bearer = credential.bearer();

        retry_with_backoff("partner request", &self.retry, self.sleeper.as_ref(), |_| {
            self.call_once(entity_id, &bearer)
        })
        .await
    }

    async fn call_once(&self, entity_id: &str, bearer: &str) -> Attempt<String, CallFailure> {
        if let Some(limiter) = self.rate_limiter.as_ref() {
            limiter.until_ready().await;
        }

        let response = tokio::time::timeout(
            self.request_timeout,
            self.transport.get_artist_overview(entity_id, bearer),
        )
        .await;

        match response {
            Err(_) | Ok(Err(TransportError::Timeout)) => Attempt::Retryable(CallFailure::Transient(
                format!("timed out after {:?}", self.request_timeout),
            )),
            Ok(Err(TransportError::Network(message))) => {
                Attempt::Retryable(CallFailure::Transient(message))
            }
            Ok(Ok(response)) => classify_response(response),
        }
    }
}

#[async_trait]
impl EnrichmentFetcher for RequestExecutor {
    async fn fetch_enrichment(&self, entity_id: &str) -> Result<EnrichmentPayload, FetchError> {
        RequestExecutor::fetch_enrichment(self, entity_id).await
    }
}

fn classify_response(response: PartnerResponse) -> Attempt<String, CallFailure> {
    match response.status {
        200..=299 => Attempt::Ok(response.body),
        UNAUTHORIZED => Attempt::Fatal(CallFailure::Unauthorized),
        500..=599 => {
            Attempt::Retryable(CallFailure::Transient(format!("HTTP {}", response.status)))
        }
        status => Attempt::Fatal(CallFailure::Rejected {
            status,
            message: truncate(&response.body, 200),
        }),
    }
}

fn parse_overview(body: &str) -> Result<EnrichmentPayload, FetchError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| FetchError::DataShape(format!("response is not JSON: {}", e)))?;
    extract_artist_overview(&value)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CredentialError, CredentialFetchError};
    use crate::services::credential_client::{CredentialSource, IssuedToken};
    use crate::services::token_cache::TokenCacheSettings;
    use crate::utils::SystemClock;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    const OVERVIEW: &str = r#"{"data":{"artistUnion":{"profile":{"name":"Róisín Murphy"},"stats":{"monthlyListeners":1200000}}}}"#;

    /// Issues `token-1`, `token-2`, ... valid for an hour
    struct SequentialSource {
        calls: AtomicU32,
        reject_with: Option<u16>,
    }

    impl SequentialSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                reject_with: None,
            })
        }

        fn rejecting(status: u16) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                reject_with: Some(status),
            })
        }
    }

    #[async_trait]
    impl CredentialSource for SequentialSource {
        async fn fetch_token(&self) -> Result<IssuedToken, CredentialFetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(status) = self.reject_with {
                return Err(CredentialFetchError::Status(status));
            }
            Ok(IssuedToken {
                value: format!("token-{}", n),
                expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
            })
        }
    }

    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<PartnerResponse, TransportError>>>,
        bearers: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<PartnerResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                bearers: Mutex::new(Vec::new()),
            })
        }

        fn bearers(&self) -> Vec<String> {
            self.bearers.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PartnerTransport for ScriptedTransport {
        async fn get_artist_overview(
            &self,
            _artist_id: &str,
            bearer: &str,
        ) -> Result<PartnerResponse, TransportError> {
            self.bearers.lock().unwrap().push(bearer.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Network("script exhausted".into())))
        }
    }

    struct NoSleep;

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, _duration: Duration) {}
    }

    fn status(code: u16) -> Result<PartnerResponse, TransportError> {
        Ok(PartnerResponse {
            status: code,
            body: String::new(),
        })
    }

    fn ok(body: &str) -> Result<PartnerResponse, TransportError> {
        Ok(PartnerResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    fn executor(
        source: Arc<SequentialSource>,
        transport: Arc<ScriptedTransport>,
    ) -> RequestExecutor {
        let settings = TokenCacheSettings {
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
            ..TokenCacheSettings::default()
        };
        let cache = TokenCache::with_runtime(
            source,
            settings,
            None,
            Arc::new(SystemClock),
            Arc::new(NoSleep),
        );

        RequestExecutor::new(
            cache,
            transport,
            RetryPolicy::new(3, Duration::from_millis(1)),
            Duration::from_secs(5),
        )
        .with_sleeper(Arc::new(NoSleep))
    }

    #[tokio::test]
    async fn test_success_uses_bearer_credential() {
        let source = SequentialSource::new();
        let transport = ScriptedTransport::new(vec![ok(OVERVIEW)]);
        let exec = executor(source.clone(), transport.clone());

        let payload = exec.fetch_enrichment("artist-1").await.unwrap();

        assert_eq!(payload.primary_name, "Róisín Murphy");
        assert_eq!(payload.monthly_listeners, Some(1200000));
        assert_eq!(transport.bearers(), vec!["Bearer token-1"]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once_then_succeeds() {
        let source = SequentialSource::new();
        let transport = ScriptedTransport::new(vec![status(401), ok(OVERVIEW)]);
        let exec = executor(source.clone(), transport.clone());

        exec.fetch_enrichment("artist-1").await.unwrap();

        assert_eq!(transport.bearers(), vec!["Bearer token-1", "Bearer token-2"]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_after_refresh_is_auth_error() {
        let source = SequentialSource::new();
        let transport = ScriptedTransport::new(vec![status(401), status(401), ok(OVERVIEW)]);
        let exec = executor(source.clone(), transport.clone());

        let err = exec.fetch_enrichment("artist-1").await.unwrap_err();

        assert_eq!(err, FetchError::Auth { status: 401 });
        assert!(err.is_systemic());
        assert_eq!(transport.bearers().len(), 2);
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_into_transient() {
        let transport = ScriptedTransport::new(vec![status(503), status(502), status(500)]);
        let exec = executor(SequentialSource::new(), transport.clone());

        let err = exec.fetch_enrichment("artist-1").await.unwrap_err();

        assert!(matches!(err, FetchError::Transient { attempts: 3, .. }));
        assert_eq!(transport.bearers().len(), 3);
    }

    #[tokio::test]
    async fn test_network_errors_are_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Network("connection reset".into())),
            status(503),
            ok(OVERVIEW),
        ]);
        let exec = executor(SequentialSource::new(), transport.clone());

        assert!(exec.fetch_enrichment("artist-1").await.is_ok());
        assert_eq!(transport.bearers().len(), 3);
    }

    #[tokio::test]
    async fn test_rate_limited_is_permanent_without_retry() {
        let transport = ScriptedTransport::new(vec![status(429), status(429), status(429)]);
        let exec = executor(SequentialSource::new(), transport.clone());

        let err = exec.fetch_enrichment("artist-1").await.unwrap_err();

        assert!(matches!(err, FetchError::Permanent { status: 429, .. }));
        assert!(!err.is_systemic());
        assert_eq!(transport.bearers().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        ]);
        let exec = executor(SequentialSource::new(), transport);

        let err = exec.fetch_enrichment("artist-1").await.unwrap_err();
        assert!(matches!(err, FetchError::Transient { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_client_error_is_permanent_without_retry() {
        let transport = ScriptedTransport::new(vec![Ok(PartnerResponse {
            status: 404,
            body: "artist not found".into(),
        })]);
        let exec = executor(SequentialSource::new(), transport.clone());

        let err = exec.fetch_enrichment("artist-1").await.unwrap_err();

        assert_eq!(
            err,
            FetchError::Permanent {
                status: 404,
                message: "artist not found".into()
            }
        );
        assert_eq!(transport.bearers().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_body_is_data_shape_without_retry() {
        let transport = ScriptedTransport::new(vec![ok("<html>nope</html>"), ok(OVERVIEW)]);
        let exec = executor(SequentialSource::new(), transport.clone());

        let err = exec.fetch_enrichment("artist-1").await.unwrap_err();

        assert!(matches!(err, FetchError::DataShape(_)));
        assert_eq!(transport.bearers().len(), 1);
    }

    #[tokio::test]
    async fn test_credential_failure_surfaces_as_credential_error() {
        let transport = ScriptedTransport::new(vec![ok(OVERVIEW)]);
        let exec = executor(SequentialSource::rejecting(403), transport.clone());

        let err = exec.fetch_enrichment("artist-1").await.unwrap_err();

        assert_eq!(err, FetchError::Credential(CredentialError::Rejected(403)));
        assert!(transport.bearers().is_empty());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }
}
