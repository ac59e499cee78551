//! Artist overview extraction
//!
//! Pulls the enrichment fields out of the partner API's `queryArtistOverview`
//! envelope. Only the envelope (`data.artistUnion`), the `profile` and `stats`
//! sections and the artist name are required; every other missing leaf becomes
//! an absent payload field.

use crate::error::FetchError;
use crate::models::{City, EnrichmentPayload, Event};
use serde_json::Value;
use std::collections::BTreeMap;

const CONCERT_TYPENAME: &str = "ConcertV2";

/// Extract an [`EnrichmentPayload`] from a parsed response body
pub fn extract_artist_overview(body: &Value) -> Result<EnrichmentPayload, FetchError> {
    let artist = body
        .get("data")
        .and_then(|d| d.get("artistUnion"))
        .filter(|a| a.is_object())
        .ok_or_else(|| FetchError::DataShape("response missing data.artistUnion".to_string()))?;

    let profile = artist
        .get("profile")
        .filter(|p| p.is_object())
        .ok_or_else(|| FetchError::DataShape("artistUnion missing profile".to_string()))?;

    let stats = artist
        .get("stats")
        .filter(|s| s.is_object())
        .ok_or_else(|| FetchError::DataShape("artistUnion missing stats".to_string()))?;

    let primary_name = profile
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| FetchError::DataShape("profile missing name".to_string()))?
        .to_string();

    Ok(EnrichmentPayload {
        primary_name,
        monthly_listeners: stats.get("monthlyListeners").and_then(Value::as_u64),
        follower_count: stats.get("followers").and_then(Value::as_u64),
        verified: profile.get("verified").and_then(Value::as_bool),
        top_cities: items(stats.get("topCities")).map(|cities| cities.iter().map(city).collect()),
        social_links: items(profile.get("externalLinks")).map(social_links),
        upcoming_events: upcoming_events(artist),
    })
}

/// `section.items` as a slice; `None` unless the section carries an array
fn items(section: Option<&Value>) -> Option<&[Value]> {
    section
        .and_then(|s| s.get("items"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
}

fn string_at(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn city(item: &Value) -> City {
    City {
        city: string_at(item, "city"),
        country: string_at(item, "country"),
        region: string_at(item, "region"),
        listeners: item.get("numberOfListeners").and_then(Value::as_u64),
    }
}

/// Platform name (lowercased) → URL; entries lacking either are skipped
fn social_links(links: &[Value]) -> BTreeMap<String, String> {
    links
        .iter()
        .filter_map(|link| {
            let name = link.get("name").and_then(Value::as_str)?;
            let url = link.get("url").and_then(Value::as_str)?;
            Some((name.to_lowercase(), url.to_string()))
        })
        .collect()
}

/// Concerts from `goods.concerts.items`, keeping only concert entries
fn upcoming_events(artist: &Value) -> Option<Vec<Event>> {
    let concerts = items(artist.get("goods").and_then(|g| g.get("concerts")))?;

    Some(
        concerts
            .iter()
            .filter_map(|concert| concert.get("data"))
            .filter(|data| data.get("__typename").and_then(Value::as_str) == Some(CONCERT_TYPENAME))
            .map(|data| {
                let location = data.get("location");
                Event {
                    title: string_at(data, "title"),
                    date: string_at(data, "startDateIsoString"),
                    venue: location.and_then(|l| string_at(l, "name")),
                    city: location.and_then(|l| string_at(l, "city")),
                    festival: data.get("festival").and_then(Value::as_bool).unwrap_or(false),
                }
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_overview() -> Value {
        json!({
            "data": {
                "artistUnion": {
                    "profile": {
                        "name": "Tiësto",
                        "verified": true,
                        "externalLinks": {
                            "items": [
                                {"name": "INSTAGRAM", "url": "https://instagram.com/tiesto"},
                                {"name": "Twitter", "url": "https://twitter.com/tiesto"},
                                {"name": "broken"}
                            ]
                        }
                    },
                    "stats": {
                        "monthlyListeners": 41230567,
                        "followers": 7800123,
                        "topCities": {
                            "items": [
                                {"city": "Mexico City", "country": "MX", "region": "CMX", "numberOfListeners": 812345},
                                {"city": "London", "country": "GB"}
                            ]
                        }
                    },
                    "goods": {
                        "concerts": {
                            "items": [
                                {"data": {
                                    "__typename": "ConcertV2",
                                    "title": "Tiësto at Ushuaïa",
                                    "startDateIsoString": "2026-07-04T22:00:00Z",
                                    "festival": false,
                                    "location": {"name": "Ushuaïa Ibiza", "city": "Ibiza"}
                                }},
                                {"data": {"__typename": "Merch", "title": "Hoodie"}}
                            ]
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_full_overview() {
        let payload = extract_artist_overview(&full_overview()).unwrap();

        assert_eq!(payload.primary_name, "Tiësto");
        assert_eq!(payload.monthly_listeners, Some(41230567));
        assert_eq!(payload.follower_count, Some(7800123));
        assert_eq!(payload.verified, Some(true));

        let cities = payload.top_cities.unwrap();
        assert_eq!(cities.len(), 2);
        assert_eq!(cities[0].listeners, Some(812345));
        assert_eq!(cities[1].region, None);

        let links = payload.social_links.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links["instagram"], "https://instagram.com/tiesto");
        assert_eq!(links["twitter"], "https://twitter.com/tiesto");

        let events = payload.upcoming_events.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].venue.as_deref(), Some("Ushuaïa Ibiza"));
        assert_eq!(events[0].city.as_deref(), Some("Ibiza"));
    }

    #[test]
    fn test_missing_envelope_is_data_shape_error() {
        let err = extract_artist_overview(&json!({"errors": [{"message": "bad hash"}]})).unwrap_err();
        assert!(matches!(err, FetchError::DataShape(_)));

        let err = extract_artist_overview(&json!({"data": {"artistUnion": null}})).unwrap_err();
        assert!(matches!(err, FetchError::DataShape(_)));
    }

    #[test]
    fn test_missing_sections_or_name_invalidate_payload() {
        let no_stats = json!({"data": {"artistUnion": {"profile": {"name": "X"}}}});
        assert!(matches!(extract_artist_overview(&no_stats), Err(FetchError::DataShape(_))));

        let no_profile = json!({"data": {"artistUnion": {"stats": {}}}});
        assert!(matches!(extract_artist_overview(&no_profile), Err(FetchError::DataShape(_))));

        let no_name = json!({"data": {"artistUnion": {"profile": {}, "stats": {}}}});
        assert!(matches!(extract_artist_overview(&no_name), Err(FetchError::DataShape(_))));
    }

    #[test]
    fn test_missing_leaves_are_absent() {
        let sparse = json!({"data": {"artistUnion": {"profile": {"name": "X"}, "stats": {}}}});
        let payload = extract_artist_overview(&sparse).unwrap();

        assert_eq!(payload, EnrichmentPayload::named("X"));
        assert!(!payload.supplies_any());
    }

    #[test]
    fn test_empty_collections_are_known_empty() {
        let body = json!({"data": {"artistUnion": {
            "profile": {"name": "X", "externalLinks": {"items": []}},
            "stats": {"topCities": {"items": []}},
            "goods": {"concerts": {"items": []}}
        }}});
        let payload = extract_artist_overview(&body).unwrap();

        assert_eq!(payload.top_cities, Some(vec![]));
        assert_eq!(payload.social_links, Some(BTreeMap::new()));
        assert_eq!(payload.upcoming_events, Some(vec![]));
    }
}
