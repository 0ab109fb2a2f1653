//! Filter normalization into a canonical signature.
//!
//! # Responsibility
//! - Parse a loosely-typed query map into the closed `ListingFilters` shape.
//! - Canonicalize filters so equal intents hash equally.
//!
//! # Invariants
//! - `normalize(f.normalized()) == normalize(f)` for every `f`.
//! - Unrecognized query keys are dropped, never rejected.
//! - Geo coordinates only enter hashes through the rounded `GeoBucket`.
//! - Case folding is ASCII-only, matching SQLite's `LOWER`/`UPPER` on the
//!   query side. Non-ASCII letters compare as stored.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

static REGION_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{2}$").expect("valid region code regex"));

const GEO_DEFAULT_RADIUS_KM: f64 = 5.0;
const GEO_MAX_RADIUS_KM: f64 = 500.0;

/// Query keys understood by `ListingFilters::from_pairs`.
pub const FILTER_KEYS: &[&str] = &[
    "kosher_category",
    "city",
    "state",
    "min_rating",
    "max_rating",
    "price_level",
    "lat",
    "lng",
    "radius_km",
];

/// Closed filter structure for listing collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingFilters {
    pub kosher_category: Option<String>,
    pub city: Option<String>,
    /// Region code; compared upper-cased.
    pub state: Option<String>,
    pub min_rating: Option<f64>,
    pub max_rating: Option<f64>,
    pub price_levels: Vec<i64>,
    pub geo: Option<GeoFilter>,
}

/// Radius search around a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFilter {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: f64,
}

/// Canonical filter name -> normalized value map. Hash input only.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FilterSignature(BTreeMap<&'static str, String>);

impl FilterSignature {
    pub fn entries(&self) -> &BTreeMap<&'static str, String> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Rounded location token; trivial jitter maps to the same bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GeoBucket(String);

impl GeoBucket {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterError {
    pub field: &'static str,
    pub reason: String,
}

impl Display for FilterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid filter `{}`: {}", self.field, self.reason)
    }
}

impl Error for FilterError {}

impl ListingFilters {
    /// Builds filters from raw query pairs.
    ///
    /// Repeated or comma-separated `price_level` values accumulate. Keys not in
    /// `FILTER_KEYS` are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filters = Self::default();
        let mut lat = None;
        let mut lng = None;
        let mut radius_km = None;

        for (key, value) in pairs {
            let value = value.as_ref().trim();
            match key.as_ref().trim() {
                "kosher_category" => filters.kosher_category = non_empty(value),
                "city" => filters.city = non_empty(value),
                "state" => {
                    if !value.is_empty() && !REGION_CODE_RE.is_match(value) {
                        return Err(FilterError {
                            field: "state",
                            reason: "expected a two-letter region code".to_string(),
                        });
                    }
                    filters.state = non_empty(value);
                }
                "min_rating" => filters.min_rating = Some(parse_number("min_rating", value)?),
                "max_rating" => filters.max_rating = Some(parse_number("max_rating", value)?),
                "price_level" => {
                    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                        let level = part.parse::<i64>().map_err(|_| FilterError {
                            field: "price_level",
                            reason: format!("`{part}` is not an integer"),
                        })?;
                        filters.price_levels.push(level);
                    }
                }
                "lat" => lat = Some(parse_number("lat", value)?),
                "lng" => lng = Some(parse_number("lng", value)?),
                "radius_km" => radius_km = Some(parse_number("radius_km", value)?),
                _ => {}
            }
        }

        filters.geo = match (lat, lng) {
            (Some(lat), Some(lng)) => {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                    return Err(FilterError {
                        field: "lat",
                        reason: "coordinates out of range".to_string(),
                    });
                }
                let radius_km = radius_km.unwrap_or(GEO_DEFAULT_RADIUS_KM);
                if radius_km <= 0.0 || radius_km > GEO_MAX_RADIUS_KM {
                    return Err(FilterError {
                        field: "radius_km",
                        reason: format!("must be in (0, {GEO_MAX_RADIUS_KM}]"),
                    });
                }
                Some(GeoFilter {
                    lat,
                    lng,
                    radius_km,
                })
            }
            (None, None) => None,
            _ => {
                return Err(FilterError {
                    field: "lat",
                    reason: "lat and lng must be provided together".to_string(),
                })
            }
        };

        if let (Some(min), Some(max)) = (filters.min_rating, filters.max_rating) {
            if min > max {
                return Err(FilterError {
                    field: "min_rating",
                    reason: "min_rating exceeds max_rating".to_string(),
                });
            }
        }

        Ok(filters)
    }

    /// Returns the canonical form of these filters.
    pub fn normalized(&self) -> Self {
        let mut price_levels = self.price_levels.clone();
        price_levels.sort_unstable();
        price_levels.dedup();

        Self {
            kosher_category: fold_case(self.kosher_category.as_deref()),
            city: fold_case(self.city.as_deref()),
            state: self
                .state
                .as_deref()
                .and_then(non_empty)
                .map(|value| value.to_ascii_uppercase()),
            min_rating: self.min_rating.map(round_one_decimal),
            max_rating: self.max_rating.map(round_one_decimal),
            price_levels,
            geo: self.geo.map(|geo| GeoFilter {
                lat: round_to(geo.lat, 1_000.0),
                lng: round_to(geo.lng, 1_000.0),
                radius_km: round_one_decimal(geo.radius_km),
            }),
        }
    }

    /// Geo-bucket token for the normalized location, if any.
    pub fn geo_bucket(&self) -> Option<GeoBucket> {
        self.normalized().geo.map(|geo| {
            GeoBucket(format!(
                "{:.3}:{:.3}:{:.1}",
                geo.lat, geo.lng, geo.radius_km
            ))
        })
    }
}

/// Canonicalizes `filters` into an order-independent signature.
///
/// The geo component is excluded here and hashed as a `GeoBucket`.
pub fn normalize(filters: &ListingFilters) -> FilterSignature {
    let normalized = filters.normalized();
    let mut entries = BTreeMap::new();

    if let Some(value) = normalized.kosher_category {
        entries.insert("kosher_category", value);
    }
    if let Some(value) = normalized.city {
        entries.insert("city", value);
    }
    if let Some(value) = normalized.state {
        entries.insert("state", value);
    }
    if let Some(value) = normalized.min_rating {
        entries.insert("min_rating", format!("{value:.1}"));
    }
    if let Some(value) = normalized.max_rating {
        entries.insert("max_rating", format!("{value:.1}"));
    }
    if !normalized.price_levels.is_empty() {
        let joined = normalized
            .price_levels
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        entries.insert("price_levels", joined);
    }

    FilterSignature(entries)
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn fold_case(value: Option<&str>) -> Option<String> {
    value.and_then(non_empty).map(|value| value.to_ascii_lowercase())
}

fn parse_number(field: &'static str, value: &str) -> Result<f64, FilterError> {
    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Ok(parsed),
        _ => Err(FilterError {
            field,
            reason: format!("`{value}` is not a finite number"),
        }),
    }
}

fn round_one_decimal(value: f64) -> f64 {
    round_to(value, 10.0)
}

fn round_to(value: f64, scale: f64) -> f64 {
    let rounded = (value * scale).round() / scale;
    // Collapse -0.0 so it formats like 0.0.
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize, GeoFilter, ListingFilters};

    fn sample() -> ListingFilters {
        ListingFilters {
            kosher_category: Some("  Dairy ".to_string()),
            city: Some("Miami Beach".to_string()),
            state: Some("fl".to_string()),
            min_rating: Some(3.46),
            max_rating: None,
            price_levels: vec![3, 1, 3],
            geo: Some(GeoFilter {
                lat: 25.790_41,
                lng: -80.130_04,
                radius_km: 2.04,
            }),
        }
    }

    #[test]
    fn normalize_folds_case_rounds_and_sorts() {
        let signature = normalize(&sample());
        let entries = signature.entries();
        assert_eq!(entries["kosher_category"], "dairy");
        assert_eq!(entries["city"], "miami beach");
        assert_eq!(entries["state"], "FL");
        assert_eq!(entries["min_rating"], "3.5");
        assert_eq!(entries["price_levels"], "1,3");
        assert!(!entries.contains_key("max_rating"));
    }

    #[test]
    fn normalize_is_idempotent() {
        let filters = sample();
        let once = filters.normalized();
        assert_eq!(once.normalized(), once);
        assert_eq!(normalize(&once), normalize(&filters));
    }

    #[test]
    fn location_jitter_stays_in_one_bucket() {
        let mut nearby = sample();
        if let Some(geo) = nearby.geo.as_mut() {
            geo.lat += 0.000_05;
            geo.lng -= 0.000_03;
        }
        assert_eq!(sample().geo_bucket(), nearby.geo_bucket());
        assert_eq!(
            sample().geo_bucket().map(|bucket| bucket.as_str().to_string()),
            Some("25.790:-80.130:2.0".to_string())
        );
    }

    #[test]
    fn from_pairs_drops_unknown_keys_and_is_order_independent() {
        let a = ListingFilters::from_pairs([
            ("state", "FL"),
            ("kosher_category", "dairy"),
            ("utm_source", "newsletter"),
        ])
        .expect("valid filters");
        let b = ListingFilters::from_pairs([("kosher_category", "DAIRY"), ("state", "fl")])
            .expect("valid filters");
        assert_eq!(normalize(&a), normalize(&b));
    }

    #[test]
    fn from_pairs_rejects_malformed_recognized_values() {
        let err = ListingFilters::from_pairs([("min_rating", "high")]).expect_err("bad number");
        assert_eq!(err.field, "min_rating");

        let err = ListingFilters::from_pairs([("lat", "25.7")]).expect_err("lat without lng");
        assert_eq!(err.field, "lat");

        let err = ListingFilters::from_pairs([("state", "Florida")]).expect_err("bad region");
        assert_eq!(err.field, "state");
    }

    #[test]
    fn case_folding_leaves_non_ascii_letters_alone() {
        let filters = ListingFilters::from_pairs([("city", " SÃO PAULO ")]).expect("valid filters");
        assert_eq!(normalize(&filters).entries()["city"], "sÃo paulo");
    }

    #[test]
    fn collection_and_category_keys_are_not_filters() {
        let filters = ListingFilters::from_pairs([
            ("listing_type", "marketplace"),
            ("categories", "bakery,grill"),
        ])
        .expect("unknown keys are ignored");
        assert_eq!(filters, ListingFilters::default());
    }

    #[test]
    fn empty_strings_normalize_to_absent() {
        let filters = ListingFilters::from_pairs([("city", "   "), ("kosher_category", "")])
            .expect("empty values are allowed");
        assert!(normalize(&filters).is_empty());
    }
}
