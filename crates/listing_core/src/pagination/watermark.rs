//! Watermark resolution for collections and single entities.
//!
//! # Responsibility
//! - Turn the store's latest mutation state into a compact freshness token.
//! - Cache tokens in the injected `KeyValueCache` for a short TTL.
//!
//! # Invariants
//! - Resolution never fails. A store failure yields a `Degraded` minute-bucket
//!   token cached for the shorter degraded TTL, and is logged.
//! - At most one store query per call; no retry.
//! - Concurrent misses recompute independently and overwrite each other.
//!   Recomputation is idempotent for an unchanged store.

use super::cache::KeyValueCache;
use super::clock::{minute_bucket, Clock};
use crate::model::listing::{ListingCollection, ListingId};
use crate::repo::RepoResult;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

const CACHE_KEY_PREFIX: &str = "wm";
const FRESH_TAG: &str = "f";
const DEGRADED_TAG: &str = "d";

/// What a watermark covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatermarkScope {
    /// Every listing of the collection plus their reviews and images.
    Collection(ListingCollection),
    /// One listing plus its reviews and images.
    Entity(ListingCollection, ListingId),
}

impl WatermarkScope {
    pub fn cache_key(&self) -> String {
        match self {
            Self::Collection(collection) => {
                format!("{CACHE_KEY_PREFIX}:{}", collection.as_str())
            }
            Self::Entity(collection, id) => {
                format!("{CACHE_KEY_PREFIX}:{}:{id}", collection.as_str())
            }
        }
    }
}

/// Latest mutation state observed by the store for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MutationMarker {
    /// Max `updated_at` across the primary rows and dependent sub-resources.
    pub max_updated_at: Option<i64>,
    /// Rows in scope, soft-deleted included. Moves on hard deletes.
    pub row_count: i64,
}

/// Store capability the resolver reads from.
pub trait MutationSource {
    /// Runs one aggregate query for the scope's latest mutation state.
    fn mutation_marker(&self, scope: &WatermarkScope) -> RepoResult<MutationMarker>;
}

/// Whether a derived value reflects the store or a time-bucket fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    Fresh,
    Degraded,
}

impl Freshness {
    pub fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }
}

/// Opaque "as of" token for a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Watermark {
    token: String,
    freshness: Freshness,
}

impl Watermark {
    pub fn fresh(marker: MutationMarker) -> Self {
        let max = marker.max_updated_at.unwrap_or(0).max(0);
        let count = marker.row_count.max(0);
        Self {
            token: format!(
                "{}.{}",
                to_base36(max.unsigned_abs()),
                to_base36(count.unsigned_abs())
            ),
            freshness: Freshness::Fresh,
        }
    }

    /// Fallback token that changes once per minute.
    pub fn degraded(now_ms: i64) -> Self {
        Self {
            token: format!("m{}", to_base36(minute_bucket(now_ms).max(0).unsigned_abs())),
            freshness: Freshness::Degraded,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    fn to_cache_value(&self) -> String {
        let tag = match self.freshness {
            Freshness::Fresh => FRESH_TAG,
            Freshness::Degraded => DEGRADED_TAG,
        };
        format!("{tag}|{}", self.token)
    }

    fn from_cache_value(value: &str) -> Option<Self> {
        let (tag, token) = value.split_once('|')?;
        if token.is_empty() {
            return None;
        }
        let freshness = match tag {
            FRESH_TAG => Freshness::Fresh,
            DEGRADED_TAG => Freshness::Degraded,
            _ => return None,
        };
        Some(Self {
            token: token.to_string(),
            freshness,
        })
    }
}

/// Cached watermark lookup over an injected cache and clock.
#[derive(Clone)]
pub struct WatermarkResolver {
    cache: Arc<dyn KeyValueCache>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    degraded_ttl: Duration,
}

impl WatermarkResolver {
    pub fn new(
        cache: Arc<dyn KeyValueCache>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        degraded_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            clock,
            ttl,
            degraded_ttl,
        }
    }

    /// Collection-wide watermark.
    pub fn watermark<S>(&self, source: &S, collection: ListingCollection) -> Watermark
    where
        S: MutationSource + ?Sized,
    {
        self.resolve(source, &WatermarkScope::Collection(collection))
    }

    /// Watermark for one listing and its sub-resources.
    pub fn entity_watermark<S>(
        &self,
        source: &S,
        collection: ListingCollection,
        id: ListingId,
    ) -> Watermark
    where
        S: MutationSource + ?Sized,
    {
        self.resolve(source, &WatermarkScope::Entity(collection, id))
    }

    pub fn resolve<S>(&self, source: &S, scope: &WatermarkScope) -> Watermark
    where
        S: MutationSource + ?Sized,
    {
        let key = scope.cache_key();
        if let Some(cached) = self.cache.get(&key) {
            if let Some(watermark) = Watermark::from_cache_value(&cached) {
                debug!(
                    "event=watermark_resolve module=pagination status=hit key={key} token={}",
                    watermark.token()
                );
                return watermark;
            }
            warn!("event=watermark_resolve module=pagination status=corrupt_cache_entry key={key}");
        }

        let (watermark, ttl) = match source.mutation_marker(scope) {
            Ok(marker) => (Watermark::fresh(marker), self.ttl),
            Err(err) => {
                let fallback = Watermark::degraded(self.clock.now_millis());
                warn!(
                    "event=watermark_resolve module=pagination status=degraded key={key} token={} error={}",
                    fallback.token(),
                    err
                );
                (fallback, self.degraded_ttl)
            }
        };

        debug!(
            "event=watermark_resolve module=pagination status=computed key={key} token={}",
            watermark.token()
        );
        self.cache.set(&key, watermark.to_cache_value(), ttl);
        watermark
    }

    /// Drops the cached watermark so the next lookup recomputes it.
    pub fn invalidate(&self, scope: &WatermarkScope) {
        self.cache.remove(&scope.cache_key());
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::{
        to_base36, Freshness, MutationMarker, MutationSource, Watermark, WatermarkResolver,
        WatermarkScope,
    };
    use crate::model::listing::ListingCollection;
    use crate::pagination::cache::MemoryCache;
    use crate::pagination::clock::ManualClock;
    use crate::repo::{RepoError, RepoResult};
    use std::cell::Cell;
    use std::sync::Arc;
    use std::time::Duration;

    struct FakeSource {
        marker: Cell<MutationMarker>,
        fail: Cell<bool>,
        calls: Cell<u32>,
    }

    impl FakeSource {
        fn new(max_updated_at: i64, row_count: i64) -> Self {
            Self {
                marker: Cell::new(MutationMarker {
                    max_updated_at: Some(max_updated_at),
                    row_count,
                }),
                fail: Cell::new(false),
                calls: Cell::new(0),
            }
        }
    }

    impl MutationSource for FakeSource {
        fn mutation_marker(&self, _scope: &WatermarkScope) -> RepoResult<MutationMarker> {
            self.calls.set(self.calls.get() + 1);
            if self.fail.get() {
                return Err(RepoError::Unavailable("store offline".to_string()));
            }
            Ok(self.marker.get())
        }
    }

    fn resolver(clock: Arc<ManualClock>) -> WatermarkResolver {
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        WatermarkResolver::new(cache, clock, Duration::from_secs(60), Duration::from_secs(10))
    }

    #[test]
    fn base36_is_compact() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn cached_token_is_reused_until_ttl_expires() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let resolver = resolver(clock.clone());
        let source = FakeSource::new(5_000, 3);

        let first = resolver.watermark(&source, ListingCollection::Restaurants);
        source.marker.set(MutationMarker {
            max_updated_at: Some(9_000),
            row_count: 3,
        });
        let second = resolver.watermark(&source, ListingCollection::Restaurants);
        assert_eq!(first, second);
        assert_eq!(source.calls.get(), 1);

        clock.advance(Duration::from_secs(61));
        let third = resolver.watermark(&source, ListingCollection::Restaurants);
        assert_ne!(first, third);
        assert_eq!(third.freshness(), Freshness::Fresh);
        assert_eq!(source.calls.get(), 2);
    }

    #[test]
    fn store_failure_degrades_to_minute_bucket_once() {
        let clock = Arc::new(ManualClock::new(120_000));
        let resolver = resolver(clock.clone());
        let source = FakeSource::new(5_000, 1);
        source.fail.set(true);

        let degraded = resolver.entity_watermark(&source, ListingCollection::Restaurants, 7);
        assert_eq!(degraded, Watermark::degraded(120_000));
        assert!(degraded.freshness().is_degraded());
        assert_eq!(source.calls.get(), 1);

        source.fail.set(false);
        clock.advance(Duration::from_secs(11));
        let recovered = resolver.entity_watermark(&source, ListingCollection::Restaurants, 7);
        assert_eq!(recovered.freshness(), Freshness::Fresh);
    }

    #[test]
    fn row_count_change_moves_token() {
        let a = Watermark::fresh(MutationMarker {
            max_updated_at: Some(10),
            row_count: 4,
        });
        let b = Watermark::fresh(MutationMarker {
            max_updated_at: Some(10),
            row_count: 3,
        });
        assert_ne!(a.token(), b.token());
        assert_eq!(
            Watermark::fresh(MutationMarker::default()).token(),
            "0.0"
        );
    }

    #[test]
    fn scopes_use_distinct_cache_keys() {
        assert_eq!(
            WatermarkScope::Collection(ListingCollection::Marketplace).cache_key(),
            "wm:marketplace"
        );
        assert_eq!(
            WatermarkScope::Entity(ListingCollection::Restaurants, 42).cache_key(),
            "wm:restaurants:42"
        );
    }
}
