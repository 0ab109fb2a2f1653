//! Listing domain model.
//!
//! # Responsibility
//! - Define the canonical listing record shared by restaurant and marketplace
//!   collections.
//! - Validate write payloads before they reach storage.
//!
//! # Invariants
//! - `id` is assigned by storage and never reused.
//! - `updated_at` is the mutation timestamp folded into collection watermarks.
//! - Timestamps are Unix epoch milliseconds.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Storage-assigned listing identifier. Also the keyset tie-breaker.
pub type ListingId = i64;

/// Listing collections served by the list endpoints.
///
/// Both collections live in the `listings` table and are discriminated by
/// `listing_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingCollection {
    Restaurants,
    Marketplace,
}

impl ListingCollection {
    /// Public collection name used in routes, cache keys and hashes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restaurants => "restaurants",
            Self::Marketplace => "marketplace",
        }
    }

    /// Value stored in `listings.listing_type`.
    pub fn listing_type(self) -> &'static str {
        match self {
            Self::Restaurants => "restaurant",
            Self::Marketplace => "marketplace",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "restaurants" | "restaurant" => Some(Self::Restaurants),
            "marketplace" => Some(Self::Marketplace),
            _ => None,
        }
    }
}

/// Listing row as returned by collection and entity endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub collection: ListingCollection,
    pub name: String,
    pub city: Option<String>,
    /// Two-letter region code, upper-cased.
    pub state: Option<String>,
    pub kosher_category: Option<String>,
    pub price_level: Option<i64>,
    pub rating: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Opaque hours payload owned by the hours module.
    pub hours_json: Option<String>,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Write payload for creating or replacing a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct NewListing {
    pub collection: ListingCollection,
    pub name: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub kosher_category: Option<String>,
    pub price_level: Option<i64>,
    pub rating: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub hours_json: Option<String>,
    pub status: String,
    /// Explicit creation time for imports; storage time is used when `None`.
    pub created_at: Option<i64>,
}

impl NewListing {
    /// Creates an active listing with only the required fields set.
    pub fn new(collection: ListingCollection, name: impl Into<String>) -> Self {
        Self {
            collection,
            name: name.into(),
            city: None,
            state: None,
            kosher_category: None,
            price_level: None,
            rating: None,
            latitude: None,
            longitude: None,
            hours_json: None,
            status: "active".to_string(),
            created_at: None,
        }
    }

    /// Validates field-level invariants before persistence.
    pub fn validate(&self) -> Result<(), ListingValidationError> {
        if self.name.trim().is_empty() {
            return Err(ListingValidationError::EmptyName);
        }
        if let Some(rating) = self.rating {
            if !(0.0..=5.0).contains(&rating) {
                return Err(ListingValidationError::RatingOutOfRange(rating));
            }
        }
        if let Some(level) = self.price_level {
            if !(1..=4).contains(&level) {
                return Err(ListingValidationError::PriceLevelOutOfRange(level));
            }
        }
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                    return Err(ListingValidationError::InvalidCoordinates);
                }
            }
            (None, None) => {}
            _ => return Err(ListingValidationError::InvalidCoordinates),
        }
        if self.status.trim().is_empty() {
            return Err(ListingValidationError::EmptyStatus);
        }
        Ok(())
    }
}

/// Validation failures for listing write payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingValidationError {
    EmptyName,
    EmptyStatus,
    RatingOutOfRange(f64),
    PriceLevelOutOfRange(i64),
    /// Latitude/longitude must both be present and within range.
    InvalidCoordinates,
}

impl Display for ListingValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "listing name must not be empty"),
            Self::EmptyStatus => write!(f, "listing status must not be empty"),
            Self::RatingOutOfRange(value) => write!(f, "rating {value} is outside 0.0..=5.0"),
            Self::PriceLevelOutOfRange(value) => write!(f, "price level {value} is outside 1..=4"),
            Self::InvalidCoordinates => {
                write!(f, "latitude/longitude must be set together and within range")
            }
        }
    }
}

impl Error for ListingValidationError {}

#[cfg(test)]
mod tests {
    use super::{ListingCollection, ListingValidationError, NewListing};

    #[test]
    fn collection_parse_accepts_singular_and_plural() {
        assert_eq!(
            ListingCollection::parse(" Restaurant "),
            Some(ListingCollection::Restaurants)
        );
        assert_eq!(ListingCollection::parse("users"), None);
    }

    #[test]
    fn validate_rejects_half_set_coordinates() {
        let mut listing = NewListing::new(ListingCollection::Restaurants, "Deli");
        listing.latitude = Some(25.76);
        assert_eq!(
            listing.validate(),
            Err(ListingValidationError::InvalidCoordinates)
        );
    }
}
