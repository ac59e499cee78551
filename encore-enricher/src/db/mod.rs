//! Database access for encore-enricher
//!
//! The artist catalogue lives in one SQLite file shared with the collector
//! that seeds identity fields from the official API.

pub mod artists;

pub use artists::{DueCounts, SqliteArtistStore};

use crate::models::PersistedRecord;
use async_trait::async_trait;
use encore_common::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Read/write access to persisted artist records
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Stored record for `id`, if any
    async fn get(&self, id: &str) -> Result<Option<PersistedRecord>>;

    /// Write the whole record in one statement; `false` when nothing was written
    async fn put(&self, record: &PersistedRecord) -> Result<bool>;
}

/// Initialize database connection pool
///
/// Creates the file (and its parent directory) when missing, then makes sure
/// the tables exist.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&db_url)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the artists table if it doesn't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artists (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            popularity INTEGER,
            genres_json TEXT NOT NULL DEFAULT '[]',
            monthly_listeners INTEGER,
            follower_count INTEGER,
            verified INTEGER,
            top_cities_json TEXT,
            social_links_json TEXT,
            upcoming_events_json TEXT,
            upcoming_events_count INTEGER NOT NULL DEFAULT 0,
            enrichment_updated_at TEXT,
            data_sources TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_artists_enrichment ON artists(enrichment_updated_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (artists)");

    Ok(())
}
