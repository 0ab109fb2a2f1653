//! Response validators and conditional-request evaluation.
//!
//! # Responsibility
//! - Derive collection and entity ETags from data versions.
//! - Evaluate `If-None-Match` / `If-Match` against the current ETag.
//! - Produce the cache headers of full responses.
//!
//! # Invariants
//! - Collection ETags hash the cursor token bytes, never decoded cursor state.
//! - ETags built on degraded data versions are weak (`W/"…"`).
//! - Validator comparison ignores the weak prefix and surrounding quotes.

use super::version::{short_hash, DataVersion};
use log::debug;
use std::fmt::{Display, Formatter};

pub const HEADER_ETAG: &str = "ETag";
pub const HEADER_CACHE_CONTROL: &str = "Cache-Control";
pub const HEADER_VARY: &str = "Vary";
pub const VARY_VALUE: &str = "Accept, Authorization, Accept-Encoding";

/// HTTP entity tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ETag {
    opaque: String,
    weak: bool,
}

impl ETag {
    pub fn opaque(&self) -> &str {
        &self.opaque
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    /// Header rendering, quoted and weak-prefixed as needed.
    pub fn header_value(&self) -> String {
        if self.weak {
            format!("W/\"{}\"", self.opaque)
        } else {
            format!("\"{}\"", self.opaque)
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        strip_validator(candidate) == self.opaque
    }
}

impl Display for ETag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.header_value())
    }
}

/// Dependent sub-resource state folded into entity ETags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RelationsFingerprint {
    pub review_count: i64,
    pub image_count: i64,
    /// Short hash of the hours payload; `None` when no hours are set.
    pub hours_fingerprint: Option<String>,
}

impl RelationsFingerprint {
    pub fn new(review_count: i64, image_count: i64, hours_json: Option<&str>) -> Self {
        Self {
            review_count,
            image_count,
            hours_fingerprint: hours_json
                .map(str::trim)
                .filter(|hours| !hours.is_empty())
                .map(|hours| short_hash(hours.as_bytes())),
        }
    }

    fn token(&self) -> String {
        format!(
            "r{}.i{}.h{}",
            self.review_count,
            self.image_count,
            self.hours_fingerprint.as_deref().unwrap_or("-")
        )
    }
}

/// ETag for one collection page.
pub fn collection_etag(version: &DataVersion, page_size: u32, cursor_token: Option<&str>) -> ETag {
    let cursor_hash = cursor_token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map_or_else(|| "-".to_string(), |token| short_hash(token.as_bytes()));
    let material = format!("collection|{}|{page_size}|{cursor_hash}", version.as_str());
    ETag {
        opaque: short_hash(material.as_bytes()),
        weak: version.freshness().is_degraded(),
    }
}

/// ETag for one entity representation.
///
/// `fields` lists representation-affecting field names (sparse fieldsets);
/// order and duplicates do not matter.
pub fn entity_etag(
    version: &DataVersion,
    fields: Option<&[String]>,
    relations: Option<&RelationsFingerprint>,
) -> ETag {
    let mut field_list = fields
        .unwrap_or_default()
        .iter()
        .map(|field| field.trim().to_ascii_lowercase())
        .filter(|field| !field.is_empty())
        .collect::<Vec<_>>();
    field_list.sort_unstable();
    field_list.dedup();

    let relations_token = relations.map_or_else(|| "-".to_string(), RelationsFingerprint::token);
    let material = format!(
        "entity|{}|{}|{relations_token}",
        version.as_str(),
        field_list.join(",")
    );
    ETag {
        opaque: short_hash(material.as_bytes()),
        weak: version.freshness().is_degraded(),
    }
}

/// Conditional request headers as received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalHeaders {
    pub if_none_match: Option<String>,
    pub if_match: Option<String>,
}

impl ConditionalHeaders {
    pub fn if_none_match(value: impl Into<String>) -> Self {
        Self {
            if_none_match: Some(value.into()),
            if_match: None,
        }
    }

    pub fn if_match(value: impl Into<String>) -> Self {
        Self {
            if_none_match: None,
            if_match: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalOutcome {
    /// Build and send the full response.
    Proceed,
    /// 304, empty body.
    NotModified,
    /// 412.
    PreconditionFailed,
}

impl ConditionalOutcome {
    pub fn short_circuits(self) -> bool {
        !matches!(self, Self::Proceed)
    }

    pub fn status_code(self) -> u16 {
        match self {
            Self::Proceed => 200,
            Self::NotModified => 304,
            Self::PreconditionFailed => 412,
        }
    }
}

/// Evaluates conditional headers against the current validator.
pub fn process_conditional(current: &ETag, headers: &ConditionalHeaders) -> ConditionalOutcome {
    if let Some(if_none_match) = non_blank(headers.if_none_match.as_deref()) {
        if if_none_match == "*" || validators(if_none_match).any(|tag| current.matches(tag)) {
            debug!(
                "event=conditional module=pagination status=not_modified etag={}",
                current.opaque()
            );
            return ConditionalOutcome::NotModified;
        }
    }

    if let Some(if_match) = non_blank(headers.if_match.as_deref()) {
        if if_match != "*" && !validators(if_match).any(|tag| current.matches(tag)) {
            debug!(
                "event=conditional module=pagination status=precondition_failed etag={}",
                current.opaque()
            );
            return ConditionalOutcome::PreconditionFailed;
        }
    }

    ConditionalOutcome::Proceed
}

/// `Cache-Control` max-age settings for full responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_age_secs: u64,
    /// Used instead of `max_age_secs` when the validator is weak.
    pub degraded_max_age_secs: u64,
}

/// Headers attached to full (and 304) responses.
pub fn response_headers(etag: &ETag, policy: CachePolicy) -> Vec<(&'static str, String)> {
    let max_age = if etag.is_weak() {
        policy.degraded_max_age_secs
    } else {
        policy.max_age_secs
    };
    vec![
        (HEADER_ETAG, etag.header_value()),
        (HEADER_CACHE_CONTROL, format!("public, max-age={max_age}")),
        (HEADER_VARY, VARY_VALUE.to_string()),
    ]
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn validators<'a>(list: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    list.split(',').map(str::trim).filter(|tag| !tag.is_empty())
}

fn strip_validator(tag: &str) -> &str {
    let tag = tag.trim();
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::{
        collection_etag, entity_etag, process_conditional, response_headers, CachePolicy,
        ConditionalHeaders, ConditionalOutcome, RelationsFingerprint,
    };
    use crate::config::EngineConfig;
    use crate::model::listing::ListingCollection;
    use crate::pagination::clock::ManualClock;
    use crate::pagination::version::{DataVersion, DataVersionCalculator, UserContext};
    use crate::pagination::watermark::{MutationMarker, Watermark};
    use std::sync::Arc;

    fn version(watermark: Watermark) -> DataVersion {
        DataVersionCalculator::new(&EngineConfig::default(), Arc::new(ManualClock::new(0)))
            .compute_entity(ListingCollection::Restaurants, 1, &watermark, &UserContext::default())
    }

    fn fresh() -> DataVersion {
        version(Watermark::fresh(MutationMarker {
            max_updated_at: Some(100),
            row_count: 1,
        }))
    }

    #[test]
    fn collection_etag_depends_on_page_size_and_cursor_bytes() {
        let v = fresh();
        let base = collection_etag(&v, 20, None);
        assert_eq!(base, collection_etag(&v, 20, Some("  ")));
        assert_ne!(base, collection_etag(&v, 21, None));
        assert_ne!(base, collection_etag(&v, 20, Some("01ab")));
        assert!(!base.is_weak());
        assert!(base.header_value().starts_with('"'));
    }

    #[test]
    fn entity_etag_folds_fields_and_relations() {
        let v = fresh();
        let fields = vec!["name".to_string(), "Hours".to_string()];
        let reordered = vec!["hours".to_string(), "name".to_string(), "name".to_string()];
        let relations = RelationsFingerprint::new(3, 1, Some("{\"mon\":\"9-5\"}"));

        let a = entity_etag(&v, Some(&fields), Some(&relations));
        assert_eq!(a, entity_etag(&v, Some(&reordered), Some(&relations)));

        let more_reviews = RelationsFingerprint::new(4, 1, Some("{\"mon\":\"9-5\"}"));
        assert_ne!(a, entity_etag(&v, Some(&fields), Some(&more_reviews)));
        let new_hours = RelationsFingerprint::new(3, 1, Some("{\"mon\":\"9-6\"}"));
        assert_ne!(a, entity_etag(&v, Some(&fields), Some(&new_hours)));
    }

    #[test]
    fn degraded_versions_yield_weak_etags() {
        let etag = collection_etag(&version(Watermark::degraded(0)), 20, None);
        assert!(etag.is_weak());
        assert!(etag.header_value().starts_with("W/\""));
    }

    #[test]
    fn if_none_match_star_or_listed_match_is_not_modified() {
        let etag = collection_etag(&fresh(), 20, None);
        assert_eq!(
            process_conditional(&etag, &ConditionalHeaders::if_none_match("*")),
            ConditionalOutcome::NotModified
        );
        let listed = format!("\"other\", W/{}", etag.header_value());
        assert_eq!(
            process_conditional(&etag, &ConditionalHeaders::if_none_match(listed)),
            ConditionalOutcome::NotModified
        );
        assert_eq!(
            process_conditional(&etag, &ConditionalHeaders::if_none_match("\"other\"")),
            ConditionalOutcome::Proceed
        );
    }

    #[test]
    fn if_match_mismatch_is_precondition_failed() {
        let etag = collection_etag(&fresh(), 20, None);
        assert_eq!(
            process_conditional(&etag, &ConditionalHeaders::if_match("\"stale\"")),
            ConditionalOutcome::PreconditionFailed
        );
        assert_eq!(
            process_conditional(&etag, &ConditionalHeaders::if_match(etag.header_value())),
            ConditionalOutcome::Proceed
        );
        assert_eq!(
            process_conditional(&etag, &ConditionalHeaders::if_match("*")),
            ConditionalOutcome::Proceed
        );
        assert_eq!(
            process_conditional(&etag, &ConditionalHeaders::default()),
            ConditionalOutcome::Proceed
        );
    }

    #[test]
    fn response_headers_shorten_max_age_for_weak_tags() {
        let policy = CachePolicy {
            max_age_secs: 300,
            degraded_max_age_secs: 10,
        };
        let strong = response_headers(&collection_etag(&fresh(), 20, None), policy);
        assert_eq!(strong[1].1, "public, max-age=300");
        assert_eq!(strong[2].1, "Accept, Authorization, Accept-Encoding");

        let weak = response_headers(
            &collection_etag(&version(Watermark::degraded(0)), 20, None),
            policy,
        );
        assert_eq!(weak[1].1, "public, max-age=10");
    }
}
