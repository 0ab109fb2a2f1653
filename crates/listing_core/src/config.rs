//! Engine configuration.
//!
//! # Responsibility
//! - Hold every deployment knob of the pagination/cache-validation engine.
//! - Load overrides from JSON; absent keys fall back to defaults.
//!
//! # Invariants
//! - `degraded_ttl_secs <= watermark_ttl_secs`.
//! - `1 <= default_limit <= max_limit`.

use crate::pagination::version::VersionTolerance;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

const DEFAULT_WATERMARK_TTL_SECS: u64 = 60;
const DEFAULT_DEGRADED_TTL_SECS: u64 = 10;
const DEFAULT_PAGE_LIMIT: u32 = 20;
const MAX_PAGE_LIMIT: u32 = 100;
const DEFAULT_CACHE_MAX_AGE_SECS: u64 = 300;
const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5_000;

/// Bumped when the persisted listing shape changes what clients see.
pub const SCHEMA_VERSION: u32 = 1;
/// Bumped when keyset ordering or tie-breaking rules change.
pub const SORT_ALGORITHM_VERSION: u32 = 2;

/// Runtime configuration for `ListingService`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Lifetime of a fresh watermark in the shared cache.
    pub watermark_ttl_secs: u64,
    /// Lifetime of a degraded (fallback) watermark. Also used as the
    /// `Cache-Control` max-age of responses built on one.
    pub degraded_ttl_secs: u64,
    /// Policy for cursors whose data version no longer matches.
    pub version_tolerance: VersionTolerance,
    pub default_limit: u32,
    pub max_limit: u32,
    pub schema_version: u32,
    pub sort_algorithm_version: u32,
    /// `max-age` advertised on fresh responses.
    pub cache_max_age_secs: u64,
    /// Deadline for one store query; also the SQLite busy timeout.
    pub query_timeout_ms: u64,
    /// Feature flags active for every request in this deployment.
    pub feature_flags: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            watermark_ttl_secs: DEFAULT_WATERMARK_TTL_SECS,
            degraded_ttl_secs: DEFAULT_DEGRADED_TTL_SECS,
            version_tolerance: VersionTolerance::Strict,
            default_limit: DEFAULT_PAGE_LIMIT,
            max_limit: MAX_PAGE_LIMIT,
            schema_version: SCHEMA_VERSION,
            sort_algorithm_version: SORT_ALGORITHM_VERSION,
            cache_max_age_secs: DEFAULT_CACHE_MAX_AGE_SECS,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            feature_flags: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            source: err,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watermark_ttl_secs == 0 {
            return Err(ConfigError::Invalid("watermark_ttl_secs must be > 0"));
        }
        if self.degraded_ttl_secs == 0 || self.degraded_ttl_secs > self.watermark_ttl_secs {
            return Err(ConfigError::Invalid(
                "degraded_ttl_secs must be in 1..=watermark_ttl_secs",
            ));
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(ConfigError::Invalid("default_limit must be in 1..=max_limit"));
        }
        if self.query_timeout_ms == 0 {
            return Err(ConfigError::Invalid("query_timeout_ms must be > 0"));
        }
        if self.feature_flags.iter().any(|flag| flag.trim().is_empty()) {
            return Err(ConfigError::Invalid("feature_flags must not contain empty names"));
        }
        Ok(())
    }

    pub fn watermark_ttl(&self) -> Duration {
        Duration::from_secs(self.watermark_ttl_secs)
    }

    pub fn degraded_ttl(&self) -> Duration {
        Duration::from_secs(self.degraded_ttl_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Clamps a requested page size: `None`/`0` -> default, above max -> max.
    pub fn effective_limit(&self, requested: Option<u32>) -> u32 {
        match requested {
            None | Some(0) => self.default_limit,
            Some(value) if value > self.max_limit => self.max_limit,
            Some(value) => value,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "failed to read config `{path}`: {source}"),
            Self::Parse(err) => write!(f, "invalid config document: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig};
    use crate::pagination::version::VersionTolerance;

    #[test]
    fn partial_document_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"watermark_ttl_secs": 120, "version_tolerance": "accept_stale"}"#,
        )
        .expect("partial config should parse");
        assert_eq!(config.watermark_ttl_secs, 120);
        assert_eq!(config.version_tolerance, VersionTolerance::AcceptStale);
        assert_eq!(config.max_limit, EngineConfig::default().max_limit);
    }

    #[test]
    fn unknown_keys_and_bad_ranges_are_rejected() {
        let unknown = EngineConfig::from_json_str(r#"{"ttl": 5}"#).expect_err("unknown key");
        assert!(matches!(unknown, ConfigError::Parse(_)));

        let bad = EngineConfig::from_json_str(r#"{"degraded_ttl_secs": 600}"#)
            .expect_err("degraded ttl above watermark ttl");
        assert!(matches!(bad, ConfigError::Invalid(_)));
    }

    #[test]
    fn effective_limit_clamps_requested_values() {
        let config = EngineConfig::default();
        assert_eq!(config.effective_limit(None), 20);
        assert_eq!(config.effective_limit(Some(0)), 20);
        assert_eq!(config.effective_limit(Some(7)), 7);
        assert_eq!(config.effective_limit(Some(1_000)), 100);
    }
}
