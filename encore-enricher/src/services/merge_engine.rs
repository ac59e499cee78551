//! Field-level merge of partner enrichment into persisted records
//!
//! A field the payload supplies overwrites the stored value and takes the
//! payload's source tag as provenance. A field the payload omits keeps both
//! its stored value and its stored provenance, so a sparse response never
//! erases earlier data.

use crate::models::{EnrichmentPayload, FieldProvenance, PersistedRecord};
use chrono::{DateTime, Utc};

/// Merge `incoming` into `existing` at the current time
pub fn merge(
    entity_id: &str,
    existing: Option<&PersistedRecord>,
    incoming: &EnrichmentPayload,
    source_tag: &str,
) -> PersistedRecord {
    merge_at(entity_id, existing, incoming, source_tag, Utc::now())
}

/// Merge with an explicit merge time
///
/// `enrichment_updated_at` is set to `now` only when the payload supplies at
/// least one enrichment field. Identity fields always come from `existing`;
/// without one, the record is created from `entity_id` and the payload's
/// primary name.
pub fn merge_at(
    entity_id: &str,
    existing: Option<&PersistedRecord>,
    incoming: &EnrichmentPayload,
    source_tag: &str,
    now: DateTime<Utc>,
) -> PersistedRecord {
    let base = match existing {
        Some(record) => record.clone(),
        None => PersistedRecord::seed(entity_id, incoming.primary_name.clone()),
    };

    // Destructure both sides so adding a field without merging it fails to compile
    let PersistedRecord {
        id,
        name,
        popularity,
        genres,
        monthly_listeners,
        follower_count,
        verified,
        top_cities,
        social_links,
        upcoming_events,
        enrichment_updated_at,
        field_provenance,
    } = base;

    let EnrichmentPayload {
        primary_name: _,
        monthly_listeners: new_monthly_listeners,
        follower_count: new_follower_count,
        verified: new_verified,
        top_cities: new_top_cities,
        social_links: new_social_links,
        upcoming_events: new_upcoming_events,
    } = incoming;

    let FieldProvenance {
        monthly_listeners: src_monthly_listeners,
        follower_count: src_follower_count,
        verified: src_verified,
        top_cities: src_top_cities,
        social_links: src_social_links,
        upcoming_events: src_upcoming_events,
    } = field_provenance;

    let (monthly_listeners, src_monthly_listeners) =
        merge_field(monthly_listeners, src_monthly_listeners, new_monthly_listeners, source_tag);
    let (follower_count, src_follower_count) =
        merge_field(follower_count, src_follower_count, new_follower_count, source_tag);
    let (verified, src_verified) = merge_field(verified, src_verified, new_verified, source_tag);
    let (top_cities, src_top_cities) =
        merge_field(top_cities, src_top_cities, new_top_cities, source_tag);
    let (social_links, src_social_links) =
        merge_field(social_links, src_social_links, new_social_links, source_tag);
    let (upcoming_events, src_upcoming_events) =
        merge_field(upcoming_events, src_upcoming_events, new_upcoming_events, source_tag);

    let enrichment_updated_at = if incoming.supplies_any() {
        Some(now)
    } else {
        enrichment_updated_at
    };

    PersistedRecord {
        id,
        name,
        popularity,
        genres,
        monthly_listeners,
        follower_count,
        verified,
        top_cities,
        social_links,
        upcoming_events,
        enrichment_updated_at,
        field_provenance: FieldProvenance {
            monthly_listeners: src_monthly_listeners,
            follower_count: src_follower_count,
            verified: src_verified,
            top_cities: src_top_cities,
            social_links: src_social_links,
            upcoming_events: src_upcoming_events,
        },
    }
}

fn merge_field<T: Clone>(
    current: Option<T>,
    current_source: Option<String>,
    incoming: &Option<T>,
    source_tag: &str,
) -> (Option<T>, Option<String>) {
    match incoming {
        Some(value) => (Some(value.clone()), Some(source_tag.to_string())),
        None => (current, current_source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{City, OFFICIAL_SOURCE_TAG, PARTNER_SOURCE_TAG};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    fn enriched_record() -> PersistedRecord {
        let mut record = PersistedRecord::seed("0OdUWJ0sBjDrqHygGUXeCF", "Band of Horses").with_popularity(62);
        record.genres = vec!["indie folk".to_string()];
        record.monthly_listeners = Some(1000);
        record.follower_count = Some(300);
        record.field_provenance.monthly_listeners = Some(PARTNER_SOURCE_TAG.to_string());
        record.field_provenance.follower_count = Some(OFFICIAL_SOURCE_TAG.to_string());
        record.enrichment_updated_at = Some(t(1));
        record
    }

    #[test]
    fn test_supplied_fields_overwrite_absent_fields_survive() {
        let existing = enriched_record();
        let incoming = EnrichmentPayload {
            monthly_listeners: Some(2000),
            ..EnrichmentPayload::named("Band of Horses")
        };

        let merged = merge_at(&existing.id, Some(&existing), &incoming, PARTNER_SOURCE_TAG, t(5));

        assert_eq!(merged.monthly_listeners, Some(2000));
        assert_eq!(merged.follower_count, Some(300));
        assert_eq!(merged.field_provenance.monthly_listeners.as_deref(), Some(PARTNER_SOURCE_TAG));
        assert_eq!(merged.field_provenance.follower_count.as_deref(), Some(OFFICIAL_SOURCE_TAG));
        assert_eq!(merged.enrichment_updated_at, Some(t(5)));
    }

    #[test]
    fn test_identity_fields_come_from_existing() {
        let existing = enriched_record();
        let incoming = EnrichmentPayload {
            verified: Some(true),
            ..EnrichmentPayload::named("Band Of Horses (Official)")
        };

        let merged = merge_at(&existing.id, Some(&existing), &incoming, PARTNER_SOURCE_TAG, t(5));

        assert_eq!(merged.id, existing.id);
        assert_eq!(merged.name, "Band of Horses");
        assert_eq!(merged.popularity, Some(62));
        assert_eq!(merged.genres, vec!["indie folk".to_string()]);
    }

    #[test]
    fn test_empty_payload_changes_nothing() {
        let existing = enriched_record();
        let incoming = EnrichmentPayload::named("Band of Horses");

        let merged = merge_at(&existing.id, Some(&existing), &incoming, PARTNER_SOURCE_TAG, t(9));

        assert_eq!(merged, existing);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let existing = enriched_record();
        let incoming = EnrichmentPayload {
            top_cities: Some(vec![City {
                city: Some("Seattle".into()),
                country: Some("US".into()),
                region: None,
                listeners: Some(40000),
            }]),
            social_links: Some(BTreeMap::from([(
                "instagram".to_string(),
                "https://instagram.com/bandofhorses".to_string(),
            )])),
            ..EnrichmentPayload::named("Band of Horses")
        };

        let once = merge_at(&existing.id, Some(&existing), &incoming, PARTNER_SOURCE_TAG, t(5));
        let twice = merge_at(&once.id, Some(&once), &incoming, PARTNER_SOURCE_TAG, t(5));

        assert_eq!(once, twice);
    }

    #[test]
    fn test_known_empty_collection_overwrites() {
        let mut existing = enriched_record();
        existing.upcoming_events = Some(vec![]);
        existing.top_cities = Some(vec![City {
            city: Some("Austin".into()),
            country: Some("US".into()),
            region: None,
            listeners: None,
        }]);

        let incoming = EnrichmentPayload {
            top_cities: Some(vec![]),
            ..EnrichmentPayload::named("Band of Horses")
        };
        let merged = merge_at(&existing.id, Some(&existing), &incoming, PARTNER_SOURCE_TAG, t(5));

        assert_eq!(merged.top_cities, Some(vec![]));
        assert_eq!(merged.field_provenance.top_cities.as_deref(), Some(PARTNER_SOURCE_TAG));
    }

    #[test]
    fn test_new_record_from_payload() {
        let incoming = EnrichmentPayload {
            follower_count: Some(12),
            ..EnrichmentPayload::named("Unknown Mortal Orchestra")
        };

        let merged = merge_at("5xLSa7l4IV1gB7ZbyKDVar", None, &incoming, PARTNER_SOURCE_TAG, t(2));

        assert_eq!(merged.id, "5xLSa7l4IV1gB7ZbyKDVar");
        assert_eq!(merged.name, "Unknown Mortal Orchestra");
        assert_eq!(merged.follower_count, Some(12));
        assert_eq!(merged.monthly_listeners, None);
        assert_eq!(merged.field_provenance.monthly_listeners, None);
        assert_eq!(merged.enrichment_updated_at, Some(t(2)));
    }
}
