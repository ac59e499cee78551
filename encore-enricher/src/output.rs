//! Batch result artifact

use crate::models::BatchResult;
use encore_common::Result;
use std::path::{Path, PathBuf};

/// Write `result` as `batch_results_<YYYYMMDD_HHMMSS>.json` under `dir`
///
/// The timestamp is the run's start time. Returns the written path.
pub fn write_batch_results(dir: &Path, result: &BatchResult) -> Result<PathBuf> {
    let file_name = format!(
        "batch_results_{}.json",
        result.started_at.format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(file_name);

    let bytes = serde_json::to_vec_pretty(result)?;
    encore_common::config::write_atomic(&path, &bytes)?;

    tracing::info!(path = %path.display(), "Batch results written");
    Ok(path)
}
