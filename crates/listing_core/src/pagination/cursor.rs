//! Opaque pagination cursor codec.
//!
//! Token layout: lowercase hex of `[format version byte] ++ JSON envelope`.
//! The envelope is a fixed, structured shape; decoding never evaluates caller
//! input beyond parsing it.
//!
//! # Invariants
//! - `decode(&encode(p)) == Ok(p)` for every position with a well-formed
//!   data version.
//! - Every decode failure is a `CursorError`; decoding never panics.

use super::keyset::{PageDirection, SortKeyValue, SortStrategy};
use super::version::DataVersion;
use crate::model::listing::ListingId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter, Write as _};

const CURSOR_FORMAT_VERSION: u8 = 1;
// Decode bound for untrusted token input.
const MAX_CURSOR_TOKEN_HEX_LEN: usize = 4 * 1024;

/// Decoded pagination position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    #[serde(rename = "k")]
    pub sort_key_value: SortKeyValue,
    #[serde(rename = "i")]
    pub tie_break_id: ListingId,
    #[serde(rename = "d")]
    pub direction: PageDirection,
    #[serde(rename = "v")]
    pub data_version: String,
    #[serde(rename = "s")]
    pub sort_strategy: SortStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    Empty,
    TooLong { len: usize, max: usize },
    OddLength,
    InvalidHex { position: usize },
    UnsupportedFormat(u8),
    Malformed(String),
    InvalidDataVersion,
}

impl Display for CursorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "cursor token is empty"),
            Self::TooLong { len, max } => {
                write!(f, "cursor token exceeds max length: {len} hex chars (max {max})")
            }
            Self::OddLength => write!(f, "cursor token must have an even number of hex characters"),
            Self::InvalidHex { position } => write!(f, "invalid hex character at position {position}"),
            Self::UnsupportedFormat(version) => write!(f, "unsupported cursor format {version}"),
            Self::Malformed(message) => write!(f, "malformed cursor envelope: {message}"),
            Self::InvalidDataVersion => write!(f, "cursor carries a malformed data version"),
        }
    }
}

impl Error for CursorError {}

/// Encodes a position into an opaque token.
pub fn encode(position: &CursorPosition) -> String {
    let mut bytes = vec![CURSOR_FORMAT_VERSION];
    // Serializing this plain struct into a Vec cannot fail.
    if let Ok(json) = serde_json::to_vec(position) {
        bytes.extend_from_slice(&json);
    }
    encode_hex(&bytes)
}

/// Decodes an opaque token into a position.
pub fn decode(token: &str) -> Result<CursorPosition, CursorError> {
    let bytes = decode_hex(token)?;
    let (format, envelope) = bytes.split_first().ok_or(CursorError::Empty)?;
    if *format != CURSOR_FORMAT_VERSION {
        return Err(CursorError::UnsupportedFormat(*format));
    }

    let position: CursorPosition = serde_json::from_slice(envelope)
        .map_err(|err| CursorError::Malformed(err.to_string()))?;
    if !DataVersion::is_well_formed(&position.data_version) {
        return Err(CursorError::InvalidDataVersion);
    }
    Ok(position)
}

/// Lowercase hex rendering of `bytes`.
pub fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn decode_hex(token: &str) -> Result<Vec<u8>, CursorError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(CursorError::Empty);
    }
    if token.len() > MAX_CURSOR_TOKEN_HEX_LEN {
        return Err(CursorError::TooLong {
            len: token.len(),
            max: MAX_CURSOR_TOKEN_HEX_LEN,
        });
    }
    if token.len() % 2 != 0 {
        return Err(CursorError::OddLength);
    }

    let raw = token.as_bytes();
    let mut out = Vec::with_capacity(raw.len() / 2);
    for idx in (0..raw.len()).step_by(2) {
        let hi = hex_nibble(raw[idx]).ok_or(CursorError::InvalidHex { position: idx + 1 })?;
        let lo = hex_nibble(raw[idx + 1]).ok_or(CursorError::InvalidHex { position: idx + 2 })?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

const fn hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
