//! Listing collection/entity use-case service.
//!
//! # Responsibility
//! - Compose watermark, data version, cursor, keyset and ETag components into
//!   one request flow per endpoint.
//! - Map component failures onto the `ListingError` taxonomy.
//!
//! # Invariants
//! - The validator is computed before the page query runs. A 304 or 412
//!   never executes the keyset query.
//! - Watermark and data-version failures degrade; they never fail a request.
//! - Keyset query failures fail closed with `InfrastructureUnavailable`.
//! - Every log line of one request carries the same `request_id`.

use crate::config::EngineConfig;
use crate::model::listing::{Listing, ListingCollection, ListingId};
use crate::pagination::cache::{KeyValueCache, MemoryCache};
use crate::pagination::clock::{Clock, SystemClock};
use crate::pagination::cursor::{self, CursorPosition};
use crate::pagination::etag::{
    collection_etag, entity_etag, process_conditional, response_headers, CachePolicy,
    ConditionalHeaders, ConditionalOutcome, ETag, RelationsFingerprint,
};
use crate::pagination::filters::{normalize, FilterError};
use crate::pagination::keyset::{self, assemble_page, KeysetPlan, KeysetRequest, PlanError, SortStrategy};
use crate::pagination::version::{self, DataVersion, DataVersionCalculator};
use crate::pagination::watermark::{WatermarkResolver, WatermarkScope};
use crate::repo::listing_store::ListingStore;
use crate::repo::RepoError;
use crate::service::error::{ListingError, ListingResult};
use crate::service::request::{CollectionRequest, EntityRequest};
use log::{debug, error, info};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Response of a conditional GET.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// 200 with a body.
    Full {
        body: T,
        etag: ETag,
        headers: Vec<(&'static str, String)>,
    },
    /// 304; the client copy is current.
    NotModified {
        etag: ETag,
        headers: Vec<(&'static str, String)>,
    },
}

impl<T> Outcome<T> {
    pub fn status(&self) -> u16 {
        match self {
            Self::Full { .. } => ConditionalOutcome::Proceed.status_code(),
            Self::NotModified { .. } => ConditionalOutcome::NotModified.status_code(),
        }
    }

    pub fn etag(&self) -> &ETag {
        match self {
            Self::Full { etag, .. } | Self::NotModified { etag, .. } => etag,
        }
    }

    pub fn headers(&self) -> &[(&'static str, String)] {
        match self {
            Self::Full { headers, .. } | Self::NotModified { headers, .. } => headers,
        }
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers()
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> Option<&T> {
        match self {
            Self::Full { body, .. } => Some(body),
            Self::NotModified { .. } => None,
        }
    }

    pub fn into_body(self) -> Option<T> {
        match self {
            Self::Full { body, .. } => Some(body),
            Self::NotModified { .. } => None,
        }
    }
}

pub type CollectionOutcome = Outcome<CollectionPage>;
pub type EntityOutcome = Outcome<EntityView>;

/// Body of a collection response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionPage {
    pub items: Vec<Listing>,
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
    /// Page size actually applied.
    pub limit: u32,
    pub sort: SortStrategy,
    pub data_version: String,
    /// Built on a fallback watermark.
    pub degraded: bool,
}

/// Body of an entity response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityView {
    pub listing: Listing,
    pub review_count: i64,
    pub image_count: i64,
    pub data_version: String,
    pub degraded: bool,
    #[serde(skip)]
    fields: Option<Vec<String>>,
}

impl EntityView {
    /// JSON body honoring the requested sparse fieldset. `id` is always kept.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        let mut listing = serde_json::to_value(&self.listing)?;
        if let (Some(fields), Value::Object(map)) = (self.fields.as_ref(), &mut listing) {
            let wanted = fields
                .iter()
                .map(|field| field.trim().to_ascii_lowercase())
                .collect::<Vec<_>>();
            map.retain(|key, _| key == "id" || wanted.iter().any(|field| field == key));
        }

        let mut body = Map::new();
        body.insert("listing".to_string(), listing);
        body.insert("review_count".to_string(), Value::from(self.review_count));
        body.insert("image_count".to_string(), Value::from(self.image_count));
        body.insert(
            "data_version".to_string(),
            Value::from(self.data_version.clone()),
        );
        body.insert("degraded".to_string(), Value::from(self.degraded));
        Ok(Value::Object(body))
    }
}

struct PreparedCollection {
    strategy: SortStrategy,
    plan: KeysetPlan,
    version: DataVersion,
    etag: ETag,
}

struct PreparedEntity {
    version: DataVersion,
    relations: RelationsFingerprint,
    etag: ETag,
}

/// Listing read service over one store.
pub struct ListingService<S: ListingStore> {
    store: S,
    config: EngineConfig,
    watermarks: WatermarkResolver,
    versions: DataVersionCalculator,
}

impl<S: ListingStore> ListingService<S> {
    /// Creates a service with injected cache and clock.
    pub fn new(
        store: S,
        config: EngineConfig,
        cache: Arc<dyn KeyValueCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let watermarks = WatermarkResolver::new(
            cache,
            clock.clone(),
            config.watermark_ttl(),
            config.degraded_ttl(),
        );
        let versions = DataVersionCalculator::new(&config, clock);
        Self {
            store,
            config,
            watermarks,
            versions,
        }
    }

    /// Creates a service with the system clock and a process-local cache.
    pub fn with_config(store: S, config: EngineConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        Self::new(store, config, cache, clock)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Forces the next collection request to recompute its watermark.
    pub fn invalidate_collection(&self, collection: ListingCollection) {
        self.watermarks
            .invalidate(&WatermarkScope::Collection(collection));
    }

    /// Forces the next entity request to recompute its watermark.
    pub fn invalidate_entity(&self, collection: ListingCollection, id: ListingId) {
        self.watermarks
            .invalidate(&WatermarkScope::Entity(collection, id));
    }

    /// Current validator of a collection page, without running the page query.
    pub fn collection_etag(&self, request: &CollectionRequest) -> ListingResult<ETag> {
        let request_id = Uuid::new_v4();
        self.prepare_collection(request_id, request)
            .map(|prepared| prepared.etag)
            .map_err(|err| log_rejection(request_id, "collection_etag", err))
    }

    /// Current validator of an entity representation.
    pub fn entity_etag(&self, request: &EntityRequest) -> ListingResult<ETag> {
        let request_id = Uuid::new_v4();
        self.prepare_entity(request)
            .map(|prepared| prepared.etag)
            .map_err(|err| log_rejection(request_id, "entity_etag", err))
    }

    /// Serves one collection page, honoring conditional headers.
    pub fn list_collection(&self, request: &CollectionRequest) -> ListingResult<CollectionOutcome> {
        let request_id = Uuid::new_v4();
        debug!(
            "event=collection_request module=service status=start request_id={request_id} collection={} has_cursor={}",
            request.collection.as_str(),
            request.cursor.is_some()
        );

        let prepared = self
            .prepare_collection(request_id, request)
            .map_err(|err| log_rejection(request_id, "collection_request", err))?;
        let headers = response_headers(&prepared.etag, self.cache_policy());

        log_stage(request_id, "match_conditional");
        match self.evaluate_conditional(request_id, &prepared.etag, &request.conditional) {
            Ok(ConditionalOutcome::NotModified) => {
                return Ok(Outcome::NotModified {
                    etag: prepared.etag,
                    headers,
                });
            }
            Ok(_) => {}
            Err(err) => return Err(log_rejection(request_id, "collection_request", err)),
        }

        log_stage(request_id, "execute");
        let rows = self.store.fetch_page(&prepared.plan).map_err(|err| {
            log_rejection(
                request_id,
                "collection_request",
                ListingError::InfrastructureUnavailable(err),
            )
        })?;
        let page = assemble_page(&prepared.plan, rows, prepared.version.as_str());

        info!(
            "event=collection_request module=service status=ok request_id={request_id} collection={} sort={} items={} has_next={} has_prev={} degraded={}",
            request.collection.as_str(),
            prepared.strategy.as_str(),
            page.items.len(),
            page.next.is_some(),
            page.prev.is_some(),
            prepared.version.freshness().is_degraded()
        );

        let body = CollectionPage {
            items: page.items,
            next_cursor: page.next.as_ref().map(cursor::encode),
            prev_cursor: page.prev.as_ref().map(cursor::encode),
            limit: prepared.plan.page_size,
            sort: prepared.strategy,
            data_version: prepared.version.as_str().to_string(),
            degraded: prepared.version.freshness().is_degraded(),
        };
        Ok(Outcome::Full {
            body,
            etag: prepared.etag,
            headers,
        })
    }

    /// Serves one listing, honoring conditional headers.
    pub fn get_entity(&self, request: &EntityRequest) -> ListingResult<EntityOutcome> {
        let request_id = Uuid::new_v4();
        debug!(
            "event=entity_request module=service status=start request_id={request_id} collection={} id={}",
            request.collection.as_str(),
            request.id
        );

        let prepared = self
            .prepare_entity(request)
            .map_err(|err| log_rejection(request_id, "entity_request", err))?;
        let headers = response_headers(&prepared.etag, self.cache_policy());

        match self.evaluate_conditional(request_id, &prepared.etag, &request.conditional) {
            Ok(ConditionalOutcome::NotModified) => {
                return Ok(Outcome::NotModified {
                    etag: prepared.etag,
                    headers,
                });
            }
            Ok(_) => {}
            Err(err) => return Err(log_rejection(request_id, "entity_request", err)),
        }

        let listing = self
            .store
            .get_listing(request.collection, request.id)
            .map_err(ListingError::InfrastructureUnavailable)
            .and_then(|listing| {
                listing.ok_or(ListingError::NotFound {
                    collection: request.collection,
                    id: request.id,
                })
            })
            .map_err(|err| log_rejection(request_id, "entity_request", err))?;

        info!(
            "event=entity_request module=service status=ok request_id={request_id} collection={} id={} degraded={}",
            request.collection.as_str(),
            request.id,
            prepared.version.freshness().is_degraded()
        );

        let body = EntityView {
            listing,
            review_count: prepared.relations.review_count,
            image_count: prepared.relations.image_count,
            data_version: prepared.version.as_str().to_string(),
            degraded: prepared.version.freshness().is_degraded(),
            fields: request.fields.clone(),
        };
        Ok(Outcome::Full {
            body,
            etag: prepared.etag,
            headers,
        })
    }

    fn prepare_collection(
        &self,
        request_id: Uuid,
        request: &CollectionRequest,
    ) -> ListingResult<PreparedCollection> {
        log_stage(request_id, "decode_cursor");
        let mut position = request
            .cursor
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| {
                cursor::decode(token).map_err(|err| ListingError::InvalidCursor(err.to_string()))
            })
            .transpose()?;

        let mut cursor_token = request.cursor.clone();
        if let (Some(position), Some(direction)) = (position.as_mut(), request.direction) {
            if position.direction != direction {
                position.direction = direction;
                cursor_token = Some(cursor::encode(position));
            }
        }

        let strategy = request
            .sort
            .or_else(|| position.as_ref().map(|position| position.sort_strategy))
            .unwrap_or_default();
        let limit = self.config.effective_limit(request.limit);

        log_stage(request_id, "build_query");
        let plan = keyset::plan(&KeysetRequest {
            collection: request.collection,
            strategy,
            cursor: position.as_ref(),
            limit,
            filters: &request.filters,
        })
        .map_err(plan_error)?;

        log_stage(request_id, "resolve_watermark");
        let watermark = self.watermarks.watermark(&self.store, request.collection);
        log_stage(request_id, "compute_version");
        let version = self.versions.compute(
            request.collection,
            &normalize(&request.filters),
            request.filters.geo_bucket().as_ref(),
            strategy,
            &watermark,
            &request.user,
        );

        if let Some(position) = position.as_ref() {
            log_stage(request_id, "validate_version");
            check_cursor_version(&version, position, self.config.version_tolerance)?;
        }

        log_stage(request_id, "compute_etag");
        let etag = collection_etag(&version, limit, cursor_token.as_deref());
        Ok(PreparedCollection {
            strategy,
            plan,
            version,
            etag,
        })
    }

    fn prepare_entity(&self, request: &EntityRequest) -> ListingResult<PreparedEntity> {
        let watermark =
            self.watermarks
                .entity_watermark(&self.store, request.collection, request.id);
        let version =
            self.versions
                .compute_entity(request.collection, request.id, &watermark, &request.user);

        let relations = self
            .store
            .relations_fingerprint(request.collection, request.id)
            .map_err(|err| match err {
                RepoError::NotFound(_) => ListingError::NotFound {
                    collection: request.collection,
                    id: request.id,
                },
                other => ListingError::InfrastructureUnavailable(other),
            })?;

        let etag = entity_etag(&version, request.fields.as_deref(), Some(&relations));
        Ok(PreparedEntity {
            version,
            relations,
            etag,
        })
    }

    fn evaluate_conditional(
        &self,
        request_id: Uuid,
        etag: &ETag,
        headers: &ConditionalHeaders,
    ) -> ListingResult<ConditionalOutcome> {
        let outcome = process_conditional(etag, headers);
        match outcome {
            ConditionalOutcome::PreconditionFailed => Err(ListingError::PreconditionFailed {
                current: etag.header_value(),
            }),
            ConditionalOutcome::NotModified => {
                info!(
                    "event=conditional_request module=service status=not_modified request_id={request_id} etag={}",
                    etag.opaque()
                );
                Ok(outcome)
            }
            ConditionalOutcome::Proceed => Ok(outcome),
        }
    }

    fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            max_age_secs: self.config.cache_max_age_secs,
            degraded_max_age_secs: self.config.degraded_ttl_secs,
        }
    }
}

fn check_cursor_version(
    current: &DataVersion,
    position: &CursorPosition,
    tolerance: version::VersionTolerance,
) -> ListingResult<()> {
    if version::validate(current, &position.data_version, tolerance) {
        return Ok(());
    }
    Err(ListingError::VersionMismatch {
        current: current.as_str().to_string(),
        cursor: position.data_version.clone(),
    })
}

fn plan_error(err: PlanError) -> ListingError {
    match err {
        PlanError::ZeroLimit => ListingError::InvalidFilter(FilterError {
            field: "limit",
            reason: err.to_string(),
        }),
        PlanError::StrategyMismatch { .. } | PlanError::SortKeyTypeMismatch(_) => {
            ListingError::InvalidCursor(err.to_string())
        }
    }
}

fn log_stage(request_id: Uuid, stage: &str) {
    debug!("event=collection_stage module=service status=enter request_id={request_id} stage={stage}");
}

fn log_rejection(request_id: Uuid, event: &str, err: ListingError) -> ListingError {
    if let ListingError::InfrastructureUnavailable(cause) = &err {
        error!(
            "event={event} module=service status=error request_id={request_id} code={} transient={} error={err}",
            err.code(),
            cause.is_transient()
        );
    } else {
        info!(
            "event={event} module=service status=rejected request_id={request_id} code={} error={err}",
            err.code()
        );
    }
    err
}
