//! Partner API token cache
//!
//! Owns the single short-lived partner credential: reuse while fresh,
//! proactive refresh inside the refresh buffer, degraded reuse when refresh
//! fails, and persistence to an optional side channel.
//!
//! **Singleflight:** at most one refresh runs at a time. The first caller that
//! needs a refresh installs a shared future; every caller arriving while it is
//! pending awaits that same future and receives the same result, success or
//! failure.

use crate::error::{Attempt, CredentialError, CredentialFetchError};
use crate::models::Credential;
use crate::services::credential_client::{CredentialSource, IssuedToken};
use crate::services::credential_store::CredentialStore;
use crate::utils::{retry_with_backoff, Clock, RetryFailure, RetryPolicy, Sleeper, SystemClock, TokioSleeper};
use chrono::Duration as ChronoDuration;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, CredentialError>>>;

/// Tuning for [`TokenCache`]
#[derive(Debug, Clone)]
pub struct TokenCacheSettings {
    /// Stop reusing a credential this long before its expiry
    pub refresh_buffer: ChronoDuration,
    /// Lifetime assumed when the endpoint omits the expiry
    pub default_lifetime: ChronoDuration,
    /// Backoff for transient endpoint failures
    pub retry: RetryPolicy,
    /// Per-call timeout on the credential endpoint
    pub fetch_timeout: Duration,
}

impl Default for TokenCacheSettings {
    fn default() -> Self {
        Self {
            refresh_buffer: ChronoDuration::seconds(300),
            default_lifetime: ChronoDuration::seconds(3600),
            retry: RetryPolicy::default(),
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Default)]
struct CacheState {
    credential: Option<Credential>,
    inflight: Option<RefreshFuture>,
    refreshes: u64,
}

struct Inner {
    source: Arc<dyn CredentialSource>,
    store: Option<Arc<dyn CredentialStore>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    settings: TokenCacheSettings,
    state: Mutex<CacheState>,
}

/// Shared handle to the partner credential
#[derive(Clone)]
pub struct TokenCache {
    inner: Arc<Inner>,
}

impl TokenCache {
    /// Cache with the wall clock, tokio sleeps and no side channel
    pub fn new(source: Arc<dyn CredentialSource>, settings: TokenCacheSettings) -> Self {
        Self::with_runtime(
            source,
            settings,
            None,
            Arc::new(SystemClock),
            Arc::new(TokioSleeper),
        )
    }

    pub fn with_runtime(
        source: Arc<dyn CredentialSource>,
        settings: TokenCacheSettings,
        store: Option<Arc<dyn CredentialStore>>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                store,
                clock,
                sleeper,
                settings,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Load a previously issued credential from the side channel
    ///
    /// Hard-expired or unreadable entries are ignored; an existing in-memory
    /// credential is never replaced. Returns whether a credential was adopted.
    pub async fn restore(&self) -> bool {
        let Some(store) = self.inner.store.as_ref() else {
            return false;
        };

        let stored = match store.load().await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                tracing::debug!("No stored partner credential");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable stored credential");
                return false;
            }
        };

        let credential = Credential::from_stored(stored, self.inner.settings.refresh_buffer);
        let now = self.inner.clock.now();
        if credential.is_hard_expired(now) {
            tracing::info!(
                expired_at = %credential.expires_at,
                "Stored partner credential already expired, will acquire fresh"
            );
            return false;
        }

        let mut state = self.inner.lock_state();
        if state.credential.is_some() {
            return false;
        }
        tracing::info!(
            expires_at = %credential.expires_at,
            usage_count = credential.requests_since_refresh,
            "Restored partner credential from side channel"
        );
        state.credential = Some(credential);
        true
    }

    /// Return a usable credential, refreshing when needed or forced
    ///
    /// Without `force_refresh`, a credential with `now < expires_at - buffer`
    /// is returned without I/O. Otherwise the caller joins (or starts) the
    /// single in-flight refresh.
    pub async fn acquire(&self, force_refresh: bool) -> Result<Credential, CredentialError> {
        let refresh = {
            let mut guard = self.inner.lock_state();
            let state = &mut *guard;
            let now = self.inner.clock.now();

            if !force_refresh {
                if let Some(credential) = state.credential.as_mut().filter(|c| c.is_usable(now)) {
                    credential.requests_since_refresh += 1;
                    return Ok(credential.clone());
                }
            }

            self.inner.join_or_start_refresh(state)
        };

        let credential = refresh.await?;
        Ok(self.inner.record_use(credential))
    }

    /// Forced refresh on behalf of a request that `rejected` failed
    ///
    /// When another caller already replaced the rejected credential, the
    /// replacement is returned without a new refresh. The rejected credential
    /// is dropped so a failed refresh cannot hand it back as a fallback.
    pub async fn replace(&self, rejected: &Credential) -> Result<Credential, CredentialError> {
        let refresh = {
            let mut guard = self.inner.lock_state();
            let state = &mut *guard;
            let now = self.inner.clock.now();

            if let Some(current) = state.credential.as_mut() {
                if current.value != rejected.value && !current.is_hard_expired(now) {
                    tracing::debug!("Rejected credential already replaced by another worker");
                    current.requests_since_refresh += 1;
                    return Ok(current.clone());
                }
            }

            if state
                .credential
                .as_ref()
                .is_some_and(|current| current.value == rejected.value)
            {
                state.credential = None;
            }

            self.inner.join_or_start_refresh(state)
        };

        let credential = refresh.await?;
        Ok(self.inner.record_use(credential))
    }

    /// Current cached credential, if any
    pub fn snapshot(&self) -> Option<Credential> {
        self.inner.lock_state().credential.clone()
    }

    /// Number of refresh operations started so far
    pub fn refresh_count(&self) -> u64 {
        self.inner.lock_state().refreshes
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join_or_start_refresh(self: &Arc<Self>, state: &mut CacheState) -> RefreshFuture {
        if let Some(inflight) = state.inflight.as_ref() {
            tracing::debug!("Joining in-flight credential refresh");
            return inflight.clone();
        }

        let inner = Arc::clone(self);
        let refresh = async move { inner.run_refresh().await }.boxed().shared();
        state.inflight = Some(refresh.clone());
        state.refreshes += 1;
        refresh
    }

    /// Body of the shared refresh future
    async fn run_refresh(self: Arc<Self>) -> Result<Credential, CredentialError> {
        let outcome = self.refresh_with_retry().await;

        let result = {
            let now = self.clock.now();
            let mut state = self.lock_state();
            state.inflight = None;

            match outcome {
                Ok(credential) => {
                    state.credential = Some(credential.clone());
                    Ok(credential)
                }
                Err(err) => match state.credential.take() {
                    Some(previous) if !previous.is_hard_expired(now) => {
                        tracing::warn!(
                            error = %err,
                            expires_at = %previous.expires_at,
                            "Credential refresh failed, reusing unexpired credential"
                        );
                        state.credential = Some(previous.clone());
                        return Ok(previous);
                    }
                    Some(previous) => {
                        tracing::error!(
                            error = %err,
                            expired_at = %previous.expires_at,
                            "Credential refresh failed and cached credential has expired"
                        );
                        Err(err)
                    }
                    None => {
                        tracing::error!(error = %err, "Credential refresh failed");
                        Err(err)
                    }
                },
            }
        };

        if let Ok(credential) = &result {
            self.persist(credential).await;
        }
        result
    }

    async fn refresh_with_retry(&self) -> Result<Credential, CredentialError> {
        tracing::info!("Refreshing partner access token");

        let token = retry_with_backoff(
            "credential refresh",
            &self.settings.retry,
            self.sleeper.as_ref(),
            |_| self.fetch_once(),
        )
        .await
        .map_err(|failure| match failure {
            RetryFailure::Exhausted { attempts, last } => CredentialError::Exhausted {
                attempts,
                last_error: last.to_string(),
            },
            RetryFailure::Fatal { error, attempt } => match error {
                CredentialFetchError::Status(status) => CredentialError::Rejected(status),
                CredentialFetchError::Malformed(message) => CredentialError::Malformed(message),
                CredentialFetchError::Transient(message) => CredentialError::Exhausted {
                    attempts: attempt,
                    last_error: message,
                },
            },
        })?;

        let now = self.clock.now();
        let expires_at = match token.expires_at {
            Some(expires_at) => expires_at,
            None => {
                tracing::debug!("Credential endpoint omitted expiry, assuming default lifetime");
                now + self.settings.default_lifetime
            }
        };

        tracing::info!(expires_at = %expires_at, "Partner access token refreshed");
        Ok(Credential::new(token.value, expires_at, self.settings.refresh_buffer))
    }

    async fn fetch_once(&self) -> Attempt<IssuedToken, CredentialFetchError> {
        match tokio::time::timeout(self.settings.fetch_timeout, self.source.fetch_token()).await {
            Ok(Ok(token)) => Attempt::Ok(token),
            Ok(Err(CredentialFetchError::Transient(message))) => {
                Attempt::Retryable(CredentialFetchError::Transient(message))
            }
            Ok(Err(fatal)) => Attempt::Fatal(fatal),
            Err(_) => Attempt::Retryable(CredentialFetchError::Transient(format!(
                "timed out after {:?}",
                self.settings.fetch_timeout
            ))),
        }
    }

    async fn persist(&self, credential: &Credential) {
        let Some(store) = self.store.as_ref() else {
            return;
        };

        if let Err(e) = store.save(&credential.to_stored()).await {
            tracing::warn!(error = %e, "Failed to persist credential to side channel");
        }
    }

    /// Count one use of `credential`, on the cached copy when it is current
    fn record_use(&self, mut credential: Credential) -> Credential {
        let mut state = self.lock_state();
        match state.credential.as_mut() {
            Some(current) if current.value == credential.value => {
                current.requests_since_refresh += 1;
                current.clone()
            }
            _ => {
                credential.requests_since_refresh += 1;
                credential
            }
        }
    }
}
