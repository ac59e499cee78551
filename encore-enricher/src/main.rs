//! encore-enricher - batch artist enrichment
//!
//! Selects artists from the shared database, fetches partner API statistics
//! for each and merges them into the stored records. Writes a
//! `batch_results_<timestamp>.json` artifact per run.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgGroup, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use encore_enricher::config::{ConfigOverrides, EnricherConfig};
use encore_enricher::db::{self, SqliteArtistStore};
use encore_enricher::models::{BatchResult, PARTNER_SOURCE_TAG};
use encore_enricher::output::write_batch_results;
use encore_enricher::services::{
    BatchOrchestrator, CredentialStore, FileCredentialStore, GatewaySink, PartnerApiClient,
    RequestExecutor, TokenCache, WebTokenClient, INTERRUPTED_REASON,
};
use encore_enricher::utils::{SystemClock, TokioSleeper};

/// Command-line arguments for encore-enricher
#[derive(Parser, Debug)]
#[command(name = "encore-enricher")]
#[command(about = "Enrich stored artists with partner API statistics")]
#[command(version)]
#[command(group(
    ArgGroup::new("selection")
        .required(true)
        .args(["artist_ids", "file", "needs_update", "days"])
))]
struct Args {
    /// SQLite database holding the artists table
    #[arg(long, env = "ENCORE_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Comma-separated artist ids
    #[arg(long, value_delimiter = ',')]
    artist_ids: Vec<String>,

    /// File with one artist id per line
    #[arg(long)]
    file: Option<PathBuf>,

    /// Artists due under the popularity-tiered staleness rule
    #[arg(long)]
    needs_update: bool,

    /// Artists not enriched in the last N days
    #[arg(long)]
    days: Option<u32>,

    /// Process at most this many artists
    #[arg(short, long)]
    limit: Option<u32>,

    /// Concurrent workers
    #[arg(short = 'w', long, env = "ENCORE_MAX_WORKERS")]
    max_workers: Option<usize>,

    /// Seconds each worker waits after its request
    #[arg(long, env = "ENCORE_DELAY_SECS")]
    delay: Option<f64>,

    /// Directory for the batch results file
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Credential side channel file
    #[arg(long, env = "ENCORE_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// TOML config file (default: ~/.config/encore/enricher.toml)
    #[arg(long, env = "ENCORE_CONFIG")]
    config: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            db_path: self.db_path.clone(),
            max_workers: self.max_workers,
            delay_secs: self.delay,
            token_file: self.token_file.clone(),
            output_dir: self.output_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "encore_enricher=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting encore-enricher v{}", env!("CARGO_PKG_VERSION"));

    let config = EnricherConfig::resolve(args.config.as_deref(), &args.overrides())
        .context("Failed to load configuration")?;

    let db_path = config
        .db_path
        .clone()
        .context("No database configured: pass --db-path or set ENCORE_DB_PATH")?;
    info!("Database: {}", db_path.display());

    let pool = db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;
    let store = Arc::new(SqliteArtistStore::new(pool));

    let ids = select_ids(&store, &args).await?;
    if ids.is_empty() {
        info!("No artists to enrich");
        return Ok(ExitCode::SUCCESS);
    }

    let token_client = WebTokenClient::new(
        config.token_endpoint.clone(),
        config.credential_timeout(),
    )
    .context("Failed to build credential client")?;
    let credential_store = config
        .token_file
        .as_ref()
        .map(|path| Arc::new(FileCredentialStore::new(path)) as Arc<dyn CredentialStore>);
    let token_cache = TokenCache::with_runtime(
        Arc::new(token_client),
        config
            .token_cache_settings()
            .context("Invalid token settings")?,
        credential_store,
        Arc::new(SystemClock),
        Arc::new(TokioSleeper),
    );
    if token_cache.restore().await {
        info!("Reusing credential from side channel");
    }

    let transport = PartnerApiClient::new(
        config.partner_endpoint.clone(),
        config.artist_query_hash.clone(),
        config.request_timeout(),
    )
    .context("Failed to build partner API client")?;
    let mut executor = RequestExecutor::new(
        token_cache.clone(),
        Arc::new(transport),
        config.retry_policy(),
        config.request_timeout(),
    );
    if let Some(rate) = config.rate_limit() {
        info!(requests_per_second = rate.get(), "Global rate cap enabled");
        executor = executor.with_rate_limit(rate);
    }

    let sink = Arc::new(GatewaySink::new(store.clone(), PARTNER_SOURCE_TAG));
    let orchestrator = BatchOrchestrator::new(token_cache, Arc::new(executor), sink);

    let stop = CancellationToken::new();
    spawn_interrupt_handler(stop.clone());

    let job = config.batch_job(ids).context("Invalid batch settings")?;
    let result = orchestrator
        .run(job, stop)
        .await
        .context("Batch run aborted")?;

    log_summary(&result);

    write_batch_results(&config.output_dir, &result)
        .context("Failed to write batch results")?;

    if is_systemic_stop(&result) {
        warn!("Batch stopped on a systemic failure");
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}

/// Resolve the worklist from the selection flags
async fn select_ids(store: &SqliteArtistStore, args: &Args) -> Result<Vec<String>> {
    let now = Utc::now();

    let mut ids = if !args.artist_ids.is_empty() {
        let requested: Vec<String> = args
            .artist_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        store.existing_ids(&requested).await?
    } else if let Some(file) = &args.file {
        let requested = read_id_file(file)?;
        info!(path = %file.display(), count = requested.len(), "Loaded artist ids from file");
        store.existing_ids(&requested).await?
    } else if let Some(days) = args.days {
        let ids = store.ids_not_updated_since(days, now, args.limit).await?;
        info!(days, count = ids.len(), "Selected artists not updated recently");
        ids
    } else {
        let counts = store.due_counts(now).await?;
        info!(
            never_enriched = counts.never_enriched,
            high_tier = counts.high,
            medium_tier = counts.medium,
            low_tier = counts.low,
            "Artists due for enrichment"
        );
        store.ids_needing_update(now, args.limit).await?
    };

    if let Some(limit) = args.limit {
        ids.truncate(limit as usize);
    }

    info!(count = ids.len(), "Artists selected");
    Ok(ids)
}

/// One id per line; blank lines and `#` comments are ignored
fn read_id_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read id file {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn spawn_interrupt_handler(stop: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received Ctrl+C, letting running items finish");
                stop.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });
}

fn log_summary(result: &BatchResult) {
    let skipped = result.skipped_ids().count();
    info!(
        run_id = %result.run_id,
        total = result.total,
        successful = result.success_count(),
        failed = result.failure_count() - skipped,
        skipped,
        "Batch complete"
    );

    if let Some(reason) = &result.stop_reason {
        warn!(reason = %reason, "Batch stopped early");
    }
}

/// Stopped by a credential or authentication failure, not by the operator
fn is_systemic_stop(result: &BatchResult) -> bool {
    result.stopped_early && result.stop_reason.as_deref() != Some(INTERRUPTED_REASON)
}
