//! Persisted artist record

use super::enrichment::{City, Event};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source tag recorded for fields supplied by the partner API
pub const PARTNER_SOURCE_TAG: &str = "partner_api";

/// Source tag recorded for identity fields from the official API
pub const OFFICIAL_SOURCE_TAG: &str = "api";

/// Which source last supplied each enrichment field
///
/// One slot per enrichment field of [`PersistedRecord`]; `None` means the
/// field has never been populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub monthly_listeners: Option<String>,
    pub follower_count: Option<String>,
    pub verified: Option<String>,
    pub top_cities: Option<String>,
    pub social_links: Option<String>,
    pub upcoming_events: Option<String>,
}

/// Artist as stored: identity from the official API plus partner enrichment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub id: String,
    pub name: String,
    pub popularity: Option<i64>,
    pub genres: Vec<String>,

    pub monthly_listeners: Option<u64>,
    pub follower_count: Option<u64>,
    pub verified: Option<bool>,
    pub top_cities: Option<Vec<City>>,
    pub social_links: Option<BTreeMap<String, String>>,
    pub upcoming_events: Option<Vec<Event>>,

    /// Last time any enrichment field was supplied
    pub enrichment_updated_at: Option<DateTime<Utc>>,
    pub field_provenance: FieldProvenance,
}

impl PersistedRecord {
    /// Identity-only record, as produced by the official API collaborator
    pub fn seed(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            popularity: None,
            genres: Vec::new(),
            monthly_listeners: None,
            follower_count: None,
            verified: None,
            top_cities: None,
            social_links: None,
            upcoming_events: None,
            enrichment_updated_at: None,
            field_provenance: FieldProvenance::default(),
        }
    }

    pub fn with_popularity(mut self, popularity: i64) -> Self {
        self.popularity = Some(popularity);
        self
    }

    /// Number of upcoming events, zero when unknown
    pub fn upcoming_events_count(&self) -> usize {
        self.upcoming_events.as_ref().map(Vec::len).unwrap_or(0)
    }
}
