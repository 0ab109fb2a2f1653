//! Read-side store capabilities used by the listing service.
//!
//! # Responsibility
//! - Execute planned keyset queries.
//! - Report mutation markers for watermark resolution.
//! - Load single listings and their relation fingerprints.
//!
//! # Invariants
//! - Every query runs under a deadline enforced by SQLite's progress
//!   handler; an overrun surfaces as `RepoError::Timeout`.

use crate::model::listing::{Listing, ListingCollection, ListingId};
use crate::pagination::etag::RelationsFingerprint;
use crate::pagination::keyset::KeysetPlan;
use crate::pagination::watermark::{MutationMarker, MutationSource, WatermarkScope};
use crate::repo::listing_repo::{parse_listing_row, LISTING_SELECT_SQL};
use crate::db::DEFAULT_QUERY_TIMEOUT;
use crate::repo::{RepoError, RepoResult};
use rusqlite::{params, params_from_iter, Connection};
use std::time::{Duration, Instant};

// VM instructions between deadline checks.
const PROGRESS_CHECK_OPS: i32 = 1_000;

/// Everything the listing service reads from storage.
pub trait ListingStore: MutationSource {
    /// Runs one planned keyset query; rows come back in fetch order.
    fn fetch_page(&self, plan: &KeysetPlan) -> RepoResult<Vec<Listing>>;
    /// Loads one live listing of `collection`.
    fn get_listing(
        &self,
        collection: ListingCollection,
        id: ListingId,
    ) -> RepoResult<Option<Listing>>;
    /// Review/image counts and hours digest for one live listing.
    fn relations_fingerprint(
        &self,
        collection: ListingCollection,
        id: ListingId,
    ) -> RepoResult<RelationsFingerprint>;
}

// Primary rows plus both dependent tables. `?1` is the listing type, `?2`
// narrows to one listing when not NULL.
const MUTATION_MARKER_SQL: &str = "SELECT MAX(ts), COALESCE(SUM(cnt), 0)
FROM (
    SELECT MAX(l.updated_at) AS ts, COUNT(*) AS cnt
    FROM listings l
    WHERE l.listing_type = ?1
      AND (?2 IS NULL OR l.id = ?2)
    UNION ALL
    SELECT MAX(r.updated_at), COUNT(r.id)
    FROM reviews r
    JOIN listings l ON l.id = r.listing_id
    WHERE l.listing_type = ?1
      AND (?2 IS NULL OR l.id = ?2)
    UNION ALL
    SELECT MAX(i.updated_at), COUNT(i.id)
    FROM listing_images i
    JOIN listings l ON l.id = i.listing_id
    WHERE l.listing_type = ?1
      AND (?2 IS NULL OR l.id = ?2)
);";

/// SQLite-backed listing store.
pub struct SqliteListingStore<'conn> {
    conn: &'conn Connection,
    query_timeout: Duration,
}

impl<'conn> SqliteListingStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self::with_query_timeout(conn, DEFAULT_QUERY_TIMEOUT)
    }

    pub fn with_query_timeout(conn: &'conn Connection, query_timeout: Duration) -> Self {
        Self {
            conn,
            query_timeout,
        }
    }

    /// Runs `query` with a progress handler that interrupts it at the deadline.
    fn bounded<T>(
        &self,
        operation: &'static str,
        query: impl FnOnce(&Connection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let deadline = Instant::now() + self.query_timeout;
        self.conn
            .progress_handler(PROGRESS_CHECK_OPS, Some(move || Instant::now() >= deadline));
        let result = query(self.conn);
        self.conn.progress_handler(0, None::<fn() -> bool>);

        result.map_err(|err| match err {
            RepoError::Db(db) if db.is_interrupted() => RepoError::Timeout {
                operation,
                limit: self.query_timeout,
            },
            other => other,
        })
    }
}

impl MutationSource for SqliteListingStore<'_> {
    fn mutation_marker(&self, scope: &WatermarkScope) -> RepoResult<MutationMarker> {
        let (collection, id) = match scope {
            WatermarkScope::Collection(collection) => (*collection, None),
            WatermarkScope::Entity(collection, id) => (*collection, Some(*id)),
        };

        self.bounded("mutation_marker", |conn| {
            let marker = conn.query_row(
                MUTATION_MARKER_SQL,
                params![collection.listing_type(), id],
                |row| {
                    Ok(MutationMarker {
                        max_updated_at: row.get(0)?,
                        row_count: row.get(1)?,
                    })
                },
            )?;
            Ok(marker)
        })
    }
}

impl ListingStore for SqliteListingStore<'_> {
    fn fetch_page(&self, plan: &KeysetPlan) -> RepoResult<Vec<Listing>> {
        self.bounded("fetch_page", |conn| {
            let mut stmt = conn.prepare(&plan.sql)?;
            let mut rows = stmt.query(params_from_iter(plan.bind_values.iter()))?;
            let mut listings = Vec::new();
            while let Some(row) = rows.next()? {
                listings.push(parse_listing_row(row)?);
            }
            Ok(listings)
        })
    }

    fn get_listing(
        &self,
        collection: ListingCollection,
        id: ListingId,
    ) -> RepoResult<Option<Listing>> {
        self.bounded("get_listing", |conn| {
            let mut stmt = conn.prepare(&format!(
                "{LISTING_SELECT_SQL}
                 WHERE id = ?1
                   AND listing_type = ?2
                   AND is_deleted = 0;"
            ))?;
            let mut rows = stmt.query(params![id, collection.listing_type()])?;
            if let Some(row) = rows.next()? {
                return Ok(Some(parse_listing_row(row)?));
            }
            Ok(None)
        })
    }

    fn relations_fingerprint(
        &self,
        collection: ListingCollection,
        id: ListingId,
    ) -> RepoResult<RelationsFingerprint> {
        self.bounded("relations_fingerprint", |conn| {
            let mut stmt = conn.prepare(
                "SELECT
                    (SELECT COUNT(*) FROM reviews WHERE listing_id = l.id AND is_deleted = 0),
                    (SELECT COUNT(*) FROM listing_images WHERE listing_id = l.id AND is_deleted = 0),
                    l.hours_json
                 FROM listings l
                 WHERE l.id = ?1
                   AND l.listing_type = ?2
                   AND l.is_deleted = 0;",
            )?;
            let mut rows = stmt.query(params![id, collection.listing_type()])?;
            let Some(row) = rows.next()? else {
                return Err(RepoError::NotFound(id));
            };

            let review_count: i64 = row.get(0)?;
            let image_count: i64 = row.get(1)?;
            let hours_json: Option<String> = row.get(2)?;
            Ok(RelationsFingerprint::new(
                review_count,
                image_count,
                hours_json.as_deref(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ListingStore, SqliteListingStore};
    use crate::db::open_db_in_memory;
    use crate::model::listing::{ListingCollection, NewListing};
    use crate::pagination::keyset::{KeysetPlan, PageDirection, SortStrategy};
    use crate::pagination::watermark::{MutationSource, WatermarkScope};
    use crate::repo::listing_repo::{ListingRepository, SqliteListingRepository};
    use crate::repo::RepoError;
    use std::time::Duration;

    fn plan_with_sql(sql: &str) -> KeysetPlan {
        KeysetPlan {
            sql: sql.to_string(),
            bind_values: Vec::new(),
            strategy: SortStrategy::CreatedAtDesc,
            direction: PageDirection::Next,
            page_size: 1,
            fetch_limit: 2,
            reverse_results: false,
            has_cursor: false,
        }
    }

    #[test]
    fn runaway_query_is_interrupted_at_deadline() {
        let conn = open_db_in_memory().expect("open db");
        let store = SqliteListingStore::with_query_timeout(&conn, Duration::from_millis(50));

        let endless = plan_with_sql(
            "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n)
             SELECT COUNT(*) FROM n;",
        );
        let err = store.fetch_page(&endless).expect_err("query must not run forever");
        assert!(matches!(
            err,
            RepoError::Timeout {
                operation: "fetch_page",
                ..
            }
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn deadline_is_lifted_after_each_query() {
        let conn = open_db_in_memory().expect("open db");
        let repo = SqliteListingRepository::new(&conn);
        repo.create_listing(&NewListing::new(ListingCollection::Restaurants, "Deli"))
            .expect("create listing");
        let store = SqliteListingStore::with_query_timeout(&conn, Duration::from_millis(50));

        let marker = store
            .mutation_marker(&WatermarkScope::Collection(ListingCollection::Restaurants))
            .expect("marker query");
        assert_eq!(marker.row_count, 1);

        std::thread::sleep(Duration::from_millis(80));
        let count: i64 = conn
            .query_row(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n LIMIT 100000)
                 SELECT COUNT(*) FROM n;",
                [],
                |row| row.get(0),
            )
            .expect("unbounded connection use after the store query");
        assert_eq!(count, 100_000);
    }
}
