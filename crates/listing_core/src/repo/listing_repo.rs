//! Listing CRUD repository and SQLite implementation.
//!
//! # Invariants
//! - Writes call `NewListing::validate()` before SQL mutations.
//! - `updated_at` strictly increases on every listing write, even within one
//!   millisecond.
//! - Review and image writes stamp their own rows only; watermarks fold those
//!   tables in separately.

use crate::model::listing::{Listing, ListingCollection, ListingId, NewListing};
use crate::repo::{RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

/// Column list shared by every listing read, including keyset queries.
pub(crate) const LISTING_SELECT_SQL: &str = "SELECT
    id,
    listing_type,
    name,
    city,
    state,
    kosher_category,
    price_level,
    rating,
    latitude,
    longitude,
    hours_json,
    status,
    created_at,
    updated_at
FROM listings";

/// Current time in epoch milliseconds, evaluated by SQLite.
const NOW_MS_SQL: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

/// Repository interface for listing CRUD and sub-resource writes.
pub trait ListingRepository {
    fn create_listing(&self, listing: &NewListing) -> RepoResult<ListingId>;
    /// Replaces every mutable field of one live listing.
    fn update_listing(&self, id: ListingId, listing: &NewListing) -> RepoResult<()>;
    fn soft_delete_listing(&self, id: ListingId) -> RepoResult<()>;
    fn get_listing(&self, id: ListingId) -> RepoResult<Option<Listing>>;
    fn add_review(&self, listing_id: ListingId, rating: i64, body: &str) -> RepoResult<i64>;
    fn soft_delete_review(&self, review_id: i64) -> RepoResult<()>;
    fn add_image(&self, listing_id: ListingId, url: &str) -> RepoResult<i64>;
}

/// SQLite-backed listing repository.
pub struct SqliteListingRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteListingRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ListingRepository for SqliteListingRepository<'_> {
    fn create_listing(&self, listing: &NewListing) -> RepoResult<ListingId> {
        listing.validate()?;

        self.conn.execute(
            &format!(
                "INSERT INTO listings (
                    listing_type,
                    name,
                    city,
                    state,
                    kosher_category,
                    price_level,
                    rating,
                    latitude,
                    longitude,
                    hours_json,
                    status,
                    created_at,
                    updated_at
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                    COALESCE(?12, {NOW_MS_SQL}),
                    COALESCE(?12, {NOW_MS_SQL})
                );"
            ),
            params![
                listing.collection.listing_type(),
                listing.name.trim(),
                listing.city.as_deref(),
                listing.state.as_deref(),
                listing.kosher_category.as_deref(),
                listing.price_level,
                listing.rating,
                listing.latitude,
                listing.longitude,
                listing.hours_json.as_deref(),
                listing.status.trim(),
                listing.created_at,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn update_listing(&self, id: ListingId, listing: &NewListing) -> RepoResult<()> {
        listing.validate()?;

        let changed = self.conn.execute(
            &format!(
                "UPDATE listings
                 SET
                    name = ?2,
                    city = ?3,
                    state = ?4,
                    kosher_category = ?5,
                    price_level = ?6,
                    rating = ?7,
                    latitude = ?8,
                    longitude = ?9,
                    hours_json = ?10,
                    status = ?11,
                    updated_at = MAX(updated_at + 1, {NOW_MS_SQL})
                 WHERE id = ?1
                   AND listing_type = ?12
                   AND is_deleted = 0;"
            ),
            params![
                id,
                listing.name.trim(),
                listing.city.as_deref(),
                listing.state.as_deref(),
                listing.kosher_category.as_deref(),
                listing.price_level,
                listing.rating,
                listing.latitude,
                listing.longitude,
                listing.hours_json.as_deref(),
                listing.status.trim(),
                listing.collection.listing_type(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn soft_delete_listing(&self, id: ListingId) -> RepoResult<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE listings
                 SET
                    is_deleted = 1,
                    updated_at = MAX(updated_at + 1, {NOW_MS_SQL})
                 WHERE id = ?1
                   AND is_deleted = 0;"
            ),
            [id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn get_listing(&self, id: ListingId) -> RepoResult<Option<Listing>> {
        let mut stmt = self.conn.prepare(&format!(
            "{LISTING_SELECT_SQL}
             WHERE id = ?1
               AND is_deleted = 0;"
        ))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_listing_row(row)?));
        }
        Ok(None)
    }

    fn add_review(&self, listing_id: ListingId, rating: i64, body: &str) -> RepoResult<i64> {
        if !(1..=5).contains(&rating) {
            return Err(RepoError::InvalidData(format!(
                "review rating {rating} is outside 1..=5"
            )));
        }
        ensure_live_listing(self.conn, listing_id)?;

        self.conn.execute(
            &format!(
                "INSERT INTO reviews (listing_id, rating, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, {NOW_MS_SQL}, {NOW_MS_SQL});"
            ),
            params![listing_id, rating, body],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn soft_delete_review(&self, review_id: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE reviews
                 SET
                    is_deleted = 1,
                    updated_at = MAX(updated_at + 1, {NOW_MS_SQL})
                 WHERE id = ?1
                   AND is_deleted = 0;"
            ),
            [review_id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(review_id));
        }
        Ok(())
    }

    fn add_image(&self, listing_id: ListingId, url: &str) -> RepoResult<i64> {
        if url.trim().is_empty() {
            return Err(RepoError::InvalidData("image url must not be empty".to_string()));
        }
        ensure_live_listing(self.conn, listing_id)?;

        self.conn.execute(
            &format!(
                "INSERT INTO listing_images (listing_id, url, created_at, updated_at)
                 VALUES (?1, ?2, {NOW_MS_SQL}, {NOW_MS_SQL});"
            ),
            params![listing_id, url.trim()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

/// Decodes one row selected with `LISTING_SELECT_SQL`.
pub(crate) fn parse_listing_row(row: &Row<'_>) -> RepoResult<Listing> {
    let type_text: String = row.get("listing_type")?;
    let collection = parse_listing_type(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid listing type `{type_text}` in listings.listing_type"
        ))
    })?;

    Ok(Listing {
        id: row.get("id")?,
        collection,
        name: row.get("name")?,
        city: row.get("city")?,
        state: row.get("state")?,
        kosher_category: row.get("kosher_category")?,
        price_level: row.get("price_level")?,
        rating: row.get("rating")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        hours_json: row.get("hours_json")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_listing_type(value: &str) -> Option<ListingCollection> {
    match value {
        "restaurant" => Some(ListingCollection::Restaurants),
        "marketplace" => Some(ListingCollection::Marketplace),
        _ => None,
    }
}

fn ensure_live_listing(conn: &Connection, id: ListingId) -> RepoResult<()> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM listings
            WHERE id = ?1
              AND is_deleted = 0
        );",
        [id],
        |row| row.get(0),
    )?;
    if exists == 1 {
        Ok(())
    } else {
        Err(RepoError::NotFound(id))
    }
}
