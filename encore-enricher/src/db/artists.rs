//! Artist database operations
//!
//! Enrichment collections and the provenance record are stored as JSON text;
//! scalar enrichment fields get their own columns so selection queries can
//! filter on them.

use super::PersistenceGateway;
use crate::models::{FieldProvenance, PersistedRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use encore_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;

/// Popularity at or above which an artist refreshes after [`HIGH_TIER_DAYS`]
pub const HIGH_TIER_POPULARITY: i64 = 75;
pub const MEDIUM_TIER_POPULARITY: i64 = 50;
pub const HIGH_TIER_DAYS: i64 = 3;
pub const MEDIUM_TIER_DAYS: i64 = 7;
pub const LOW_TIER_DAYS: i64 = 14;

/// Ids bound per `IN (...)` query, well under SQLite's bind-variable limit
const ID_LOOKUP_CHUNK: usize = 500;

const SELECT_COLUMNS: &str = r#"
    SELECT id, name, popularity, genres_json, monthly_listeners, follower_count,
           verified, top_cities_json, social_links_json, upcoming_events_json,
           enrichment_updated_at, data_sources
    FROM artists
"#;

/// Number of artists due for enrichment, per staleness tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueCounts {
    pub never_enriched: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

impl DueCounts {
    pub fn total(&self) -> i64 {
        self.never_enriched + self.high + self.medium + self.low
    }
}

/// SQLite-backed [`PersistenceGateway`]
#[derive(Debug, Clone)]
pub struct SqliteArtistStore {
    pool: SqlitePool,
}

impl SqliteArtistStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or update the identity fields of an artist
    ///
    /// Enrichment columns of an existing row are left untouched.
    pub async fn seed_artist(&self, record: &PersistedRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO artists (id, name, popularity, genres_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                popularity = excluded.popularity,
                genres_json = excluded.genres_json,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(record.popularity)
        .bind(serde_json::to_string(&record.genres)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Artists due for enrichment under the tiered staleness rule
    ///
    /// Popularity >= 75 is due after 3 days, >= 50 after 7 days, everything
    /// else after 14 days. Never-enriched artists are always due. Ordered by
    /// tier, then popularity descending.
    pub async fn ids_needing_update(
        &self,
        now: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<String>> {
        let (high_cutoff, medium_cutoff, low_cutoff) = tier_cutoffs(now);

        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id FROM artists
            WHERE enrichment_updated_at IS NULL
               OR (COALESCE(popularity, 0) >= ? AND enrichment_updated_at < ?)
               OR (COALESCE(popularity, 0) >= ? AND COALESCE(popularity, 0) < ?
                   AND enrichment_updated_at < ?)
               OR (COALESCE(popularity, 0) < ? AND enrichment_updated_at < ?)
            ORDER BY
                CASE
                    WHEN COALESCE(popularity, 0) >= ? THEN 0
                    WHEN COALESCE(popularity, 0) >= ? THEN 1
                    ELSE 2
                END,
                COALESCE(popularity, 0) DESC,
                id
            LIMIT ?
            "#,
        )
        .bind(HIGH_TIER_POPULARITY)
        .bind(high_cutoff)
        .bind(MEDIUM_TIER_POPULARITY)
        .bind(HIGH_TIER_POPULARITY)
        .bind(medium_cutoff)
        .bind(MEDIUM_TIER_POPULARITY)
        .bind(low_cutoff)
        .bind(HIGH_TIER_POPULARITY)
        .bind(MEDIUM_TIER_POPULARITY)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Per-tier counts matching [`ids_needing_update`](Self::ids_needing_update)
    pub async fn due_counts(&self, now: DateTime<Utc>) -> Result<DueCounts> {
        let (high_cutoff, medium_cutoff, low_cutoff) = tier_cutoffs(now);

        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN enrichment_updated_at IS NULL THEN 1 ELSE 0 END), 0) AS never_enriched,
                COALESCE(SUM(CASE WHEN COALESCE(popularity, 0) >= ?
                    AND enrichment_updated_at < ? THEN 1 ELSE 0 END), 0) AS high,
                COALESCE(SUM(CASE WHEN COALESCE(popularity, 0) >= ? AND COALESCE(popularity, 0) < ?
                    AND enrichment_updated_at < ? THEN 1 ELSE 0 END), 0) AS medium,
                COALESCE(SUM(CASE WHEN COALESCE(popularity, 0) < ?
                    AND enrichment_updated_at < ? THEN 1 ELSE 0 END), 0) AS low
            FROM artists
            "#,
        )
        .bind(HIGH_TIER_POPULARITY)
        .bind(high_cutoff)
        .bind(MEDIUM_TIER_POPULARITY)
        .bind(HIGH_TIER_POPULARITY)
        .bind(medium_cutoff)
        .bind(MEDIUM_TIER_POPULARITY)
        .bind(low_cutoff)
        .fetch_one(&self.pool)
        .await?;

        Ok(DueCounts {
            never_enriched: row.try_get("never_enriched")?,
            high: row.try_get("high")?,
            medium: row.try_get("medium")?,
            low: row.try_get("low")?,
        })
    }

    /// Artists never enriched or last enriched more than `days` ago,
    /// most popular first
    pub async fn ids_not_updated_since(
        &self,
        days: u32,
        now: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<String>> {
        let cutoff = now - Duration::days(i64::from(days));

        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id FROM artists
            WHERE enrichment_updated_at IS NULL OR enrichment_updated_at < ?
            ORDER BY COALESCE(popularity, 0) DESC, id
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Keep the ids that exist, in input order; unknown ids are logged and dropped
    pub async fn existing_ids(&self, ids: &[String]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut found: HashSet<String> = HashSet::with_capacity(ids.len());
        for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT id FROM artists WHERE id IN (");
            let mut separated = query.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");

            found.extend(
                query
                    .build_query_scalar::<String>()
                    .fetch_all(&self.pool)
                    .await?,
            );
        }

        let mut kept = Vec::with_capacity(found.len());
        for id in ids {
            if found.contains(id) {
                kept.push(id.clone());
            } else {
                tracing::warn!(artist_id = %id, "Artist not in database, skipping");
            }
        }

        Ok(kept)
    }
}

#[async_trait]
impl PersistenceGateway for SqliteArtistStore {
    async fn get(&self, id: &str) -> Result<Option<PersistedRecord>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn put(&self, record: &PersistedRecord) -> Result<bool> {
        let monthly_listeners =
            count_column(&record.id, "monthly_listeners", record.monthly_listeners)?;
        let follower_count = count_column(&record.id, "follower_count", record.follower_count)?;
        let events_count = count_column(
            &record.id,
            "upcoming_events_count",
            Some(record.upcoming_events_count() as u64),
        )?;

        let result = sqlx::query(
            r#"
            INSERT INTO artists (
                id, name, popularity, genres_json, monthly_listeners, follower_count,
                verified, top_cities_json, social_links_json, upcoming_events_json,
                upcoming_events_count, enrichment_updated_at, data_sources,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                popularity = excluded.popularity,
                genres_json = excluded.genres_json,
                monthly_listeners = excluded.monthly_listeners,
                follower_count = excluded.follower_count,
                verified = excluded.verified,
                top_cities_json = excluded.top_cities_json,
                social_links_json = excluded.social_links_json,
                upcoming_events_json = excluded.upcoming_events_json,
                upcoming_events_count = excluded.upcoming_events_count,
                enrichment_updated_at = excluded.enrichment_updated_at,
                data_sources = excluded.data_sources,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(record.popularity)
        .bind(serde_json::to_string(&record.genres)?)
        .bind(monthly_listeners)
        .bind(follower_count)
        .bind(record.verified)
        .bind(to_json_column(&record.top_cities)?)
        .bind(to_json_column(&record.social_links)?)
        .bind(to_json_column(&record.upcoming_events)?)
        .bind(events_count)
        .bind(record.enrichment_updated_at)
        .bind(serde_json::to_string(&record.field_provenance)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn tier_cutoffs(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>, DateTime<Utc>) {
    (
        now - Duration::days(HIGH_TIER_DAYS),
        now - Duration::days(MEDIUM_TIER_DAYS),
        now - Duration::days(LOW_TIER_DAYS),
    )
}

/// Counts above `i64::MAX` are rejected rather than stored as NULL
fn count_column(id: &str, column: &str, value: Option<u64>) -> Result<Option<i64>> {
    value
        .map(|v| {
            i64::try_from(v).map_err(|_| {
                Error::InvalidInput(format!("{} for artist {} is out of range: {}", column, id, v))
            })
        })
        .transpose()
}

/// SQLite treats a negative LIMIT as unbounded
fn sql_limit(limit: Option<u32>) -> i64 {
    limit.map(i64::from).unwrap_or(-1)
}

fn to_json_column<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    Ok(value.as_ref().map(serde_json::to_string).transpose()?)
}

fn from_json_column<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<Option<T>> {
    let text: Option<String> = row.try_get(column)?;
    Ok(text.as_deref().map(serde_json::from_str::<T>).transpose()?)
}

fn record_from_row(row: &SqliteRow) -> Result<PersistedRecord> {
    let genres_json: String = row.try_get("genres_json")?;
    let sources_json: String = row.try_get("data_sources")?;
    let monthly_listeners: Option<i64> = row.try_get("monthly_listeners")?;
    let follower_count: Option<i64> = row.try_get("follower_count")?;

    Ok(PersistedRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        popularity: row.try_get("popularity")?,
        genres: serde_json::from_str(&genres_json)?,
        monthly_listeners: monthly_listeners.and_then(|v| u64::try_from(v).ok()),
        follower_count: follower_count.and_then(|v| u64::try_from(v).ok()),
        verified: row.try_get("verified")?,
        top_cities: from_json_column(row, "top_cities_json")?,
        social_links: from_json_column(row, "social_links_json")?,
        upcoming_events: from_json_column(row, "upcoming_events_json")?,
        enrichment_updated_at: row.try_get("enrichment_updated_at")?,
        field_provenance: serde_json::from_str::<FieldProvenance>(&sources_json)?,
    })
}
