//! Configuration for encore-enricher
//!
//! **Priority:** CLI flag → environment variable → TOML file → compiled default
//!
//! clap merges the first two tiers (every overridable flag carries an `env`
//! name); this module loads the TOML tier, applies the merged overrides on
//! top and validates the result.

use crate::models::BatchJob;
use crate::services::partner_client::{DEFAULT_ARTIST_QUERY_HASH, DEFAULT_PARTNER_ENDPOINT};
use crate::services::credential_client::DEFAULT_TOKEN_ENDPOINT;
use crate::services::token_cache::TokenCacheSettings;
use crate::utils::RetryPolicy;
use encore_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file stem under `~/.config/encore/`
pub const MODULE_NAME: &str = "enricher";

/// Upper bound for the assumed token lifetime and the refresh buffer
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 86_400;

/// Upper bound for the per-worker pause between items
pub const MAX_DELAY_SECS: f64 = 3_600.0;

/// Settings loaded from `enricher.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnricherConfig {
    pub db_path: Option<PathBuf>,
    pub token_endpoint: String,
    pub partner_endpoint: String,
    pub artist_query_hash: String,
    pub token_refresh_buffer_secs: u64,
    pub default_token_lifetime_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub credential_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Global cap across all workers; unset means no cap
    pub requests_per_second: Option<u32>,
    pub max_workers: usize,
    pub delay_secs: f64,
    /// Credential side channel; unset disables it
    pub token_file: Option<PathBuf>,
    pub output_dir: PathBuf,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            partner_endpoint: DEFAULT_PARTNER_ENDPOINT.to_string(),
            artist_query_hash: DEFAULT_ARTIST_QUERY_HASH.to_string(),
            token_refresh_buffer_secs: 300,
            default_token_lifetime_secs: 3600,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
            credential_timeout_secs: 15,
            request_timeout_secs: 30,
            requests_per_second: None,
            max_workers: 1,
            delay_secs: 1.0,
            token_file: None,
            output_dir: PathBuf::from("output"),
        }
    }
}

/// CLI/environment tier, already merged by clap
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<PathBuf>,
    pub max_workers: Option<usize>,
    pub delay_secs: Option<f64>,
    pub token_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

impl EnricherConfig {
    /// Load the TOML tier, apply overrides and validate
    ///
    /// `config_path` is the explicit `--config`/`ENCORE_CONFIG` value; without
    /// one the platform default location is used.
    pub fn resolve(config_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let path = encore_common::config::resolve_config_path(config_path, MODULE_NAME);
        let mut config: Self = encore_common::config::load_toml_config(path.as_deref())?;
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(db_path) = &overrides.db_path {
            self.db_path = Some(db_path.clone());
        }
        if let Some(max_workers) = overrides.max_workers {
            self.max_workers = max_workers;
        }
        if let Some(delay_secs) = overrides.delay_secs {
            self.delay_secs = delay_secs;
        }
        if let Some(token_file) = &overrides.token_file {
            self.token_file = Some(token_file.clone());
        }
        if let Some(output_dir) = &overrides.output_dir {
            self.output_dir = output_dir.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers < 1 {
            return Err(Error::Config("max_workers must be at least 1".to_string()));
        }
        if self.retry_attempts < 1 {
            return Err(Error::Config("retry_attempts must be at least 1".to_string()));
        }
        if !(0.0..=MAX_DELAY_SECS).contains(&self.delay_secs) {
            return Err(Error::Config(format!(
                "delay_secs must be between 0 and {}, got {}",
                MAX_DELAY_SECS, self.delay_secs
            )));
        }
        if self.default_token_lifetime_secs == 0
            || self.default_token_lifetime_secs > MAX_TOKEN_LIFETIME_SECS
        {
            return Err(Error::Config(format!(
                "default_token_lifetime_secs must be between 1 and {}, got {}",
                MAX_TOKEN_LIFETIME_SECS, self.default_token_lifetime_secs
            )));
        }
        if self.token_refresh_buffer_secs >= self.default_token_lifetime_secs {
            return Err(Error::Config(format!(
                "token_refresh_buffer_secs ({}) must be below default_token_lifetime_secs ({})",
                self.token_refresh_buffer_secs, self.default_token_lifetime_secs
            )));
        }
        if self.requests_per_second == Some(0) {
            return Err(Error::Config(
                "requests_per_second must be greater than 0 when set".to_string(),
            ));
        }
        if self.token_endpoint.trim().is_empty() || self.partner_endpoint.trim().is_empty() {
            return Err(Error::Config("endpoints must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn token_cache_settings(&self) -> Result<TokenCacheSettings> {
        Ok(TokenCacheSettings {
            refresh_buffer: seconds_delta(
                "token_refresh_buffer_secs",
                self.token_refresh_buffer_secs,
            )?,
            default_lifetime: seconds_delta(
                "default_token_lifetime_secs",
                self.default_token_lifetime_secs,
            )?,
            retry: self.retry_policy(),
            fetch_timeout: self.credential_timeout(),
        })
    }

    pub fn credential_timeout(&self) -> Duration {
        Duration::from_secs(self.credential_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit(&self) -> Option<NonZeroU32> {
        self.requests_per_second.and_then(NonZeroU32::new)
    }

    pub fn inter_request_delay(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.delay_secs)
            .map_err(|e| Error::Config(format!("delay_secs {}: {}", self.delay_secs, e)))
    }

    /// Job for `entity_ids` with this config's worker count and delay
    pub fn batch_job(&self, entity_ids: Vec<String>) -> Result<BatchJob> {
        Ok(BatchJob::new(
            entity_ids,
            self.max_workers,
            self.inter_request_delay()?,
        ))
    }
}

fn seconds_delta(key: &str, secs: u64) -> Result<chrono::TimeDelta> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::TimeDelta::try_seconds)
        .ok_or_else(|| Error::Config(format!("{} is out of range: {}", key, secs)))
}
