//! Test helper utilities
//!
//! Fakes for the crate's seams, shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use encore_enricher::error::{CredentialFetchError, FetchError};
use encore_enricher::models::EnrichmentPayload;
use encore_enricher::services::{
    CredentialSource, IssuedToken, RecordSink, TokenCache, TokenCacheSettings,
};
use encore_enricher::utils::{RetryPolicy, Sleeper, SystemClock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Credential source issuing `token-1`, `token-2`, ... after an optional delay
pub struct CountingSource {
    calls: AtomicU32,
    delay: Duration,
    reject_with: Option<u16>,
}

impl CountingSource {
    pub fn new() -> Arc<Self> {
        Self::slow(Duration::ZERO)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            delay,
            reject_with: None,
        })
    }

    pub fn rejecting(status: u16) -> Arc<Self> {
        Self::rejecting_after(status, Duration::ZERO)
    }

    /// Rejects with `status` once `delay` has passed
    pub fn rejecting_after(status: u16, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            delay,
            reject_with: Some(status),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for CountingSource {
    async fn fetch_token(&self) -> Result<IssuedToken, CredentialFetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(status) = self.reject_with {
            return Err(CredentialFetchError::Status(status));
        }
        Ok(IssuedToken {
            value: format!("token-{}", n),
            expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
        })
    }
}

/// Sleeper that returns immediately
pub struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

/// Token cache over `source` with fast retries and no side channel
pub fn token_cache(source: Arc<CountingSource>) -> TokenCache {
    let settings = TokenCacheSettings {
        retry: RetryPolicy::new(2, Duration::from_millis(1)),
        ..TokenCacheSettings::default()
    };
    TokenCache::with_runtime(source, settings, None, Arc::new(SystemClock), Arc::new(NoSleep))
}

/// Scripted outcome for one artist id
#[derive(Clone)]
pub enum Scripted {
    Payload(EnrichmentPayload),
    Error(FetchError),
    Panic,
}

/// Enrichment fetcher returning scripted outcomes and tracking concurrency
pub struct FakeFetcher {
    script: HashMap<String, Scripted>,
    work: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    /// Unscripted ids succeed with a payload carrying a listener count
    pub fn new(script: Vec<(&str, Scripted)>) -> Self {
        Self {
            script: script
                .into_iter()
                .map(|(id, outcome)| (id.to_string(), outcome))
                .collect(),
            work: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Each fetch takes `work` of real time
    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl encore_enricher::services::EnrichmentFetcher for FakeFetcher {
    async fn fetch_enrichment(&self, entity_id: &str) -> Result<EnrichmentPayload, FetchError> {
        self.calls.lock().unwrap().push(entity_id.to_string());
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.script.get(entity_id).cloned() {
            Some(Scripted::Payload(payload)) => Ok(payload),
            Some(Scripted::Error(error)) => Err(error),
            Some(Scripted::Panic) => panic!("scripted panic for {}", entity_id),
            None => Ok(EnrichmentPayload {
                monthly_listeners: Some(1000),
                ..EnrichmentPayload::named(format!("Artist {}", entity_id))
            }),
        }
    }
}

/// Sink that keeps committed payloads in memory
#[derive(Default)]
pub struct MemorySink {
    committed: Mutex<Vec<(String, EnrichmentPayload)>>,
    fail_for: Vec<String>,
}

impl MemorySink {
    pub fn failing_for(ids: &[&str]) -> Self {
        Self {
            committed: Mutex::new(Vec::new()),
            fail_for: ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    pub fn committed_ids(&self) -> Vec<String> {
        self.committed
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn commit(&self, entity_id: &str, payload: &EnrichmentPayload) -> encore_common::Result<()> {
        if self.fail_for.iter().any(|id| id == entity_id) {
            return Err(encore_common::Error::Internal("disk full".to_string()));
        }
        self.committed
            .lock()
            .unwrap()
            .push((entity_id.to_string(), payload.clone()));
        Ok(())
    }
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
