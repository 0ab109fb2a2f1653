//! Listing pagination and cache-validation engine.
//!
//! Keyset cursors, watermark-driven data versions and ETag evaluation for
//! restaurant and marketplace listing endpoints.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod pagination;
pub mod repo;
pub mod service;

pub use config::{ConfigError, EngineConfig};
pub use db::{open_db, open_db_in_memory, open_db_with_timeout, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::listing::{Listing, ListingCollection, ListingId, NewListing};
pub use pagination::cache::{KeyValueCache, MemoryCache};
pub use pagination::clock::{Clock, ManualClock, SystemClock};
pub use pagination::etag::{ConditionalHeaders, ETag};
pub use pagination::filters::ListingFilters;
pub use pagination::keyset::{PageDirection, SortStrategy};
pub use pagination::version::{UserContext, VersionTolerance};
pub use repo::listing_repo::{ListingRepository, SqliteListingRepository};
pub use repo::listing_store::{ListingStore, SqliteListingStore};
pub use repo::{RepoError, RepoResult};
pub use service::error::{ListingError, ListingResult};
pub use service::listing_service::{
    CollectionOutcome, CollectionPage, EntityOutcome, EntityView, ListingService, Outcome,
};
pub use service::request::{CollectionRequest, EntityRequest};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
