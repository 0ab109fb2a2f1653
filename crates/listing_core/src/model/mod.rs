//! Domain model for listing collections.
//!
//! # Invariants
//! - Restaurants and marketplace listings share one storage shape.
//! - Deletion is a soft-delete tombstone so watermarks observe it.

pub mod listing;
