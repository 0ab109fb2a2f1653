//! Repository layer over the listing store.
//!
//! # Responsibility
//! - CRUD contracts for listings and their dependent sub-resources.
//! - Read-side store capabilities consumed by the pagination engine.
//!
//! # Invariants
//! - Write paths validate payloads before SQL mutations.
//! - Every write stamps `updated_at` so watermarks observe it.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::DbError;
use crate::model::listing::{ListingId, ListingValidationError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub mod listing_repo;
pub mod listing_store;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for listing persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ListingValidationError),
    Db(DbError),
    NotFound(ListingId),
    InvalidData(String),
    /// Backing store could not be reached (non-SQLite stores, fakes).
    Unavailable(String),
    /// Query interrupted at its deadline.
    Timeout {
        operation: &'static str,
        limit: Duration,
    },
}

impl RepoError {
    /// Store-side failure worth retrying later, as opposed to bad input or data.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Db(err) => err.is_transient(),
            Self::Unavailable(_) | Self::Timeout { .. } => true,
            Self::Validation(_) | Self::NotFound(_) | Self::InvalidData(_) => false,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "listing not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted listing data: {message}"),
            Self::Unavailable(message) => write!(f, "listing store unavailable: {message}"),
            Self::Timeout { operation, limit } => {
                write!(f, "{operation} exceeded {} ms", limit.as_millis())
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_)
            | Self::InvalidData(_)
            | Self::Unavailable(_)
            | Self::Timeout { .. } => None,
        }
    }
}

impl From<ListingValidationError> for RepoError {
    fn from(value: ListingValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
