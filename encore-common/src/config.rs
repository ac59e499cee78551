//! Configuration file discovery and loading
//!
//! Resolution order used by Encore tools (highest priority first):
//! 1. Command-line argument
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default
//!
//! This module covers the file tier: locating the TOML file, loading it with
//! graceful degradation, and writing files atomically.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directory name under the platform config dir (e.g. `~/.config/encore`)
pub const CONFIG_DIR_NAME: &str = "encore";

/// Resolve the TOML config path for a module
///
/// **Priority:**
/// 1. Explicit path (CLI flag or environment variable, already merged by clap)
/// 2. `<config_dir>/encore/<module>.toml`
///
/// Returns `None` when no config directory can be determined for the platform.
pub fn resolve_config_path(explicit: Option<&Path>, module_name: &str) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(format!("{}.toml", module_name)))
}

/// Load a TOML config file, falling back to defaults when the file is missing
///
/// A missing file is not an error: the module starts with compiled defaults
/// and logs a warning. A file that exists but cannot be read or parsed is a
/// configuration error.
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No config directory available, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            path = %path.display(),
            "Config file not found, using compiled defaults"
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!(path = %path.display(), "Loaded config file");
    Ok(config)
}

/// Write bytes to `target` atomically (temp file + rename)
///
/// The temp file lives next to the target so the rename stays on one
/// filesystem. Parent directories are created when missing.
pub fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut temp_name = target
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("Not a file path: {}", target.display())))?
        .to_os_string();
    temp_name.push(".tmp");
    let temp_path = target.with_file_name(temp_name);

    std::fs::write(&temp_path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    if let Err(e) = std::fs::rename(&temp_path, target) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }

    Ok(())
}
