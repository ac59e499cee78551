//! Short-lived partner API credential

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Bearer credential for the partner API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Bearer token value
    pub value: String,
    /// Hard expiry reported by the credential endpoint
    pub expires_at: DateTime<Utc>,
    /// How long before `expires_at` the credential stops being reused
    pub refresh_buffer: Duration,
    /// Requests served by this credential since it was acquired
    pub requests_since_refresh: u64,
}

impl Credential {
    pub fn new(value: String, expires_at: DateTime<Utc>, refresh_buffer: Duration) -> Self {
        Self {
            value,
            expires_at,
            refresh_buffer,
            requests_since_refresh: 0,
        }
    }

    /// Reusable without refresh: `now < expires_at - refresh_buffer`
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - self.refresh_buffer
    }

    /// Past the raw expiry; must never be sent again
    pub fn is_hard_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }

    pub fn to_stored(&self) -> StoredCredential {
        StoredCredential {
            access_token: self.value.clone(),
            expires_at: self.expires_at,
            usage_count: self.requests_since_refresh,
        }
    }

    pub fn from_stored(stored: StoredCredential, refresh_buffer: Duration) -> Self {
        Self {
            value: stored.access_token,
            expires_at: stored.expires_at,
            refresh_buffer,
            requests_since_refresh: stored.usage_count,
        }
    }
}

/// Side-channel representation of a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub usage_count: u64,
}
