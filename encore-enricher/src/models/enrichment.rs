//! Enrichment payload extracted from the partner API

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// City ranked among an artist's top listener locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    pub city: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub listeners: Option<u64>,
}

/// Upcoming concert or festival appearance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub title: Option<String>,
    /// ISO-8601 start date as reported upstream
    pub date: Option<String>,
    pub venue: Option<String>,
    pub city: Option<String>,
    #[serde(default)]
    pub festival: bool,
}

/// Partial snapshot of one artist from the partner API
///
/// `None` means the source said nothing about the field. `Some(vec![])` or
/// `Some(map![])` means the source explicitly reported an empty collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentPayload {
    pub primary_name: String,
    pub monthly_listeners: Option<u64>,
    pub follower_count: Option<u64>,
    pub verified: Option<bool>,
    pub top_cities: Option<Vec<City>>,
    pub social_links: Option<BTreeMap<String, String>>,
    pub upcoming_events: Option<Vec<Event>>,
}

impl EnrichmentPayload {
    /// Payload carrying only a name; every enrichment field unknown
    pub fn named(primary_name: impl Into<String>) -> Self {
        Self {
            primary_name: primary_name.into(),
            ..Self::default()
        }
    }

    /// Whether any enrichment field is supplied
    pub fn supplies_any(&self) -> bool {
        self.monthly_listeners.is_some()
            || self.follower_count.is_some()
            || self.verified.is_some()
            || self.top_cities.is_some()
            || self.social_links.is_some()
            || self.upcoming_events.is_some()
    }
}
