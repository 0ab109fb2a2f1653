//! Cursor pagination and cache-validation engine.
//!
//! # Responsibility
//! - Normalize filters, resolve watermarks and derive data versions.
//! - Plan keyset queries and encode/decode their cursors.
//! - Derive ETags and evaluate conditional requests.
//!
//! # Invariants
//! - Every value produced here is request-scoped and derived from read-only
//!   queries. Nothing in this module mutates the store.
//! - Watermark and data-version derivation never fail; they degrade.

pub mod cache;
pub mod clock;
pub mod cursor;
pub mod etag;
pub mod filters;
pub mod keyset;
pub mod version;
pub mod watermark;
