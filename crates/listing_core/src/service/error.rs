//! Request-boundary error taxonomy.
//!
//! Every variant maps to one HTTP status and one generic public message. Root
//! causes stay in logs and in `source()`; they never reach the response body.

use crate::model::listing::{ListingCollection, ListingId};
use crate::pagination::filters::FilterError;
use crate::repo::RepoError;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ListingResult<T> = Result<T, ListingError>;

#[derive(Debug)]
pub enum ListingError {
    /// Cursor token could not be decoded or does not fit the request.
    InvalidCursor(String),
    /// Filter, sort, limit or direction parameter is malformed.
    InvalidFilter(FilterError),
    /// Cursor was minted under another data version.
    VersionMismatch { current: String, cursor: String },
    NotFound {
        collection: ListingCollection,
        id: ListingId,
    },
    /// Store could not serve the page or entity.
    InfrastructureUnavailable(RepoError),
    /// `If-Match` did not match the current validator.
    PreconditionFailed { current: String },
}

impl ListingError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidCursor(_) | Self::InvalidFilter(_) | Self::VersionMismatch { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::PreconditionFailed { .. } => 412,
            Self::InfrastructureUnavailable(_) => 503,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCursor(_) => "INVALID_CURSOR",
            Self::InvalidFilter(_) => "INVALID_FILTER",
            Self::VersionMismatch { .. } => "VERSION_MISMATCH",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InfrastructureUnavailable(_) => "INFRASTRUCTURE_UNAVAILABLE",
            Self::PreconditionFailed { .. } => "PRECONDITION_FAILED",
        }
    }

    /// Client-facing message; carries no internal detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidCursor(_) => "The pagination cursor is invalid.",
            Self::InvalidFilter(_) => "One or more query parameters are invalid.",
            Self::VersionMismatch { .. } => {
                "The listing data changed since this cursor was issued. Restart from the first page."
            }
            Self::NotFound { .. } => "The requested listing was not found.",
            Self::InfrastructureUnavailable(_) => {
                "The listing service is temporarily unavailable. Try again later."
            }
            Self::PreconditionFailed { .. } => "The resource does not match the supplied precondition.",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.public_message(),
            },
        }
    }
}

impl Display for ListingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCursor(reason) => write!(f, "invalid cursor: {reason}"),
            Self::InvalidFilter(err) => write!(f, "{err}"),
            Self::VersionMismatch { current, cursor } => write!(
                f,
                "cursor data version `{cursor}` does not match current `{current}`"
            ),
            Self::NotFound { collection, id } => {
                write!(f, "{} listing not found: {id}", collection.as_str())
            }
            Self::InfrastructureUnavailable(err) => write!(f, "store unavailable: {err}"),
            Self::PreconditionFailed { current } => {
                write!(f, "if-match precondition failed; current etag {current}")
            }
        }
    }
}

impl Error for ListingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidFilter(err) => Some(err),
            Self::InfrastructureUnavailable(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FilterError> for ListingError {
    fn from(value: FilterError) -> Self {
        Self::InvalidFilter(value)
    }
}

/// JSON error envelope: `{"error": {"code": …, "message": …}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: &'static str,
}
