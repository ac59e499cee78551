//! Credential side channel
//!
//! Lets a restarted process reuse a still-valid partner token instead of
//! minting a new one. The channel is optional and best-effort: read failures
//! mean "nothing stored", write failures are logged by the caller.

use crate::models::StoredCredential;
use async_trait::async_trait;
use encore_common::{Error, Result};
use std::path::{Path, PathBuf};

/// Durable slot holding the last issued credential
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stored credential, `Ok(None)` when the slot is empty
    async fn load(&self) -> Result<Option<StoredCredential>>;

    /// Overwrite the slot
    async fn save(&self, credential: &StoredCredential) -> Result<()>;
}

/// JSON file side channel, written atomically
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<StoredCredential>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredCredential = serde_json::from_str(&content)?;
        Ok(Some(stored))
    }

    async fn save(&self, credential: &StoredCredential) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(credential)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || encore_common::config::write_atomic(&path, &bytes))
            .await
            .map_err(|e| Error::Internal(format!("Token file writer panicked: {}", e)))??;

        tracing::debug!(path = %self.path.display(), "Credential saved to side channel");
        Ok(())
    }
}
