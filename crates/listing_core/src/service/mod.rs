//! Request-boundary services.
//!
//! # Responsibility
//! - Turn collection/entity requests into conditional responses.
//! - Keep transport layers decoupled from storage and pagination details.

pub mod error;
pub mod listing_service;
pub mod request;
