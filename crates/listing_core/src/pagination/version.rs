//! Data-version calculation and cursor-version validation.
//!
//! # Responsibility
//! - Hash every input that changes what a page contains into one short,
//!   fixed-length `DataVersion`.
//! - Decide whether a cursor minted under an older version is still usable.
//!
//! # Invariants
//! - Identical inputs produce identical hashes across processes.
//! - Flag and cohort order never affects the hash.
//! - `compute` never fails; an internal failure yields a minute-bucket
//!   fallback marked `Degraded`.

use super::clock::{minute_bucket, Clock};
use super::cursor::encode_hex;
use super::filters::{FilterSignature, GeoBucket};
use super::keyset::SortStrategy;
use super::watermark::{Freshness, Watermark};
use crate::config::EngineConfig;
use crate::model::listing::{ListingCollection, ListingId};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Bytes of the SHA-256 digest kept in a data version.
pub const DATA_VERSION_BYTES: usize = 8;

/// Policy for cursors whose data version differs from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionTolerance {
    /// Reject mismatched cursors; clients restart from page one.
    #[default]
    Strict,
    /// Accept mismatched cursors and log a warning.
    AcceptStale,
}

/// Per-request context that changes what a caller may see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserContext {
    pub feature_flags: BTreeSet<String>,
    pub cohort_tags: BTreeSet<String>,
}

impl UserContext {
    pub fn with_flags<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            feature_flags: flags.into_iter().map(Into::into).collect(),
            cohort_tags: BTreeSet::new(),
        }
    }

    pub fn with_cohort(mut self, tag: impl Into<String>) -> Self {
        self.cohort_tags.insert(tag.into());
        self
    }
}

/// Deterministic hash gating cursor and cache validity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataVersion {
    hash: String,
    freshness: Freshness,
}

impl DataVersion {
    pub fn as_str(&self) -> &str {
        &self.hash
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    /// Whether `value` has the shape of a data version hash.
    pub fn is_well_formed(value: &str) -> bool {
        value.len() == DATA_VERSION_BYTES * 2
            && value
                .bytes()
                .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
    }
}

#[derive(Serialize)]
struct VersionInput<'a> {
    schema: u32,
    sort_algorithm: u32,
    scope: &'a str,
    sort_key: &'a str,
    filters: &'a BTreeMap<&'static str, String>,
    geo: Option<&'a str>,
    watermark: &'a str,
    flags: Vec<&'a str>,
    cohort: Vec<&'a str>,
}

/// Computes data versions for collections and entities.
#[derive(Clone)]
pub struct DataVersionCalculator {
    schema_version: u32,
    sort_algorithm_version: u32,
    deployment_flags: BTreeSet<String>,
    clock: Arc<dyn Clock>,
}

impl DataVersionCalculator {
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            schema_version: config.schema_version,
            sort_algorithm_version: config.sort_algorithm_version,
            deployment_flags: config
                .feature_flags
                .iter()
                .map(|flag| flag.trim().to_string())
                .collect(),
            clock,
        }
    }

    /// Version for one collection view.
    pub fn compute(
        &self,
        collection: ListingCollection,
        signature: &FilterSignature,
        geo: Option<&GeoBucket>,
        sort_key: SortStrategy,
        watermark: &Watermark,
        user: &UserContext,
    ) -> DataVersion {
        self.hash_input(
            collection.as_str(),
            sort_key.as_str(),
            signature.entries(),
            geo.map(GeoBucket::as_str),
            watermark,
            user,
        )
    }

    /// Version for one entity representation.
    pub fn compute_entity(
        &self,
        collection: ListingCollection,
        id: ListingId,
        watermark: &Watermark,
        user: &UserContext,
    ) -> DataVersion {
        let scope = format!("{}:{id}", collection.as_str());
        self.hash_input(
            &scope,
            "entity",
            FilterSignature::default().entries(),
            None,
            watermark,
            user,
        )
    }

    fn hash_input(
        &self,
        scope: &str,
        sort_key: &str,
        filters: &BTreeMap<&'static str, String>,
        geo: Option<&str>,
        watermark: &Watermark,
        user: &UserContext,
    ) -> DataVersion {
        let flags = self
            .deployment_flags
            .iter()
            .chain(user.feature_flags.iter())
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        let input = VersionInput {
            schema: self.schema_version,
            sort_algorithm: self.sort_algorithm_version,
            scope,
            sort_key,
            filters,
            geo,
            watermark: watermark.token(),
            flags,
            cohort: user.cohort_tags.iter().map(String::as_str).collect(),
        };

        match serde_json::to_vec(&input) {
            Ok(bytes) => DataVersion {
                hash: short_hash(&bytes),
                freshness: watermark.freshness(),
            },
            Err(err) => {
                let bucket = minute_bucket(self.clock.now_millis());
                warn!(
                    "event=data_version module=pagination status=degraded scope={scope} bucket={bucket} error={err}"
                );
                DataVersion {
                    hash: short_hash(format!("fallback|{scope}|{bucket}").as_bytes()),
                    freshness: Freshness::Degraded,
                }
            }
        }
    }
}

/// Checks a cursor's data version against the current one.
///
/// Exact matches are always valid. Under `AcceptStale` a mismatch is accepted
/// and logged.
pub fn validate(current: &DataVersion, cursor_version: &str, tolerance: VersionTolerance) -> bool {
    if current.as_str() == cursor_version {
        return true;
    }
    match tolerance {
        VersionTolerance::Strict => {
            debug!(
                "event=version_validate module=pagination status=mismatch current={} cursor={cursor_version}",
                current.as_str()
            );
            false
        }
        VersionTolerance::AcceptStale => {
            warn!(
                "event=version_validate module=pagination status=tolerated current={} cursor={cursor_version}",
                current.as_str()
            );
            true
        }
    }
}

/// First `DATA_VERSION_BYTES` of SHA-256 as lowercase hex.
pub(crate) fn short_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    encode_hex(&digest[..DATA_VERSION_BYTES])
}
