//! Keyset (seek) query planning and page assembly.
//!
//! # Responsibility
//! - Turn (sort strategy, cursor, direction, limit, filters) into one range
//!   query over `listings`.
//! - Assemble fetched rows into a page with boundary cursors.
//!
//! # Invariants
//! - Ordering is always `(sort key, id)` with the same direction for both.
//! - The seek predicate is `(key <op> ?) OR (key = ? AND id <op> ?)`, where
//!   `<op>` comes from the explicit `seek_rule` table.
//! - For a fixed filter set and strategy, forward pagination visits every
//!   qualifying row exactly once, in order. Inserts and deletes elsewhere in
//!   the keyspace do not shift page boundaries.
//!
//! A row whose own sort key moves across the cursor boundary between two page
//! requests can be skipped or seen twice. Only `name` sorts are exposed to
//! this (creation time never changes); callers detect it through the data
//! version mismatch on the next page.

use super::cursor::CursorPosition;
use super::filters::{GeoFilter, ListingFilters};
use crate::model::listing::{Listing, ListingCollection};
use crate::repo::listing_repo::LISTING_SELECT_SQL;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Status values that never appear in collection pages.
pub const EXCLUDED_STATUSES: &[&str] = &["placeholder", "test"];

const KM_PER_DEGREE_LAT: f64 = 111.32;

/// Supported collection orderings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortStrategy {
    /// Newest first.
    #[default]
    CreatedAtDesc,
    /// Oldest first.
    CreatedAtAsc,
    NameAsc,
    NameDesc,
}

impl SortStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedAtDesc => "created_at_desc",
            Self::CreatedAtAsc => "created_at_asc",
            Self::NameAsc => "name_asc",
            Self::NameDesc => "name_desc",
        }
    }

    /// Parses a sort selector; accepts the `newest`/`oldest` aliases.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "created_at_desc" | "newest" => Some(Self::CreatedAtDesc),
            "created_at_asc" | "oldest" => Some(Self::CreatedAtAsc),
            "name_asc" | "name" => Some(Self::NameAsc),
            "name_desc" => Some(Self::NameDesc),
            _ => None,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::CreatedAtDesc | Self::CreatedAtAsc => "created_at",
            Self::NameAsc | Self::NameDesc => "name",
        }
    }

    /// Sort key of `listing` under this strategy.
    pub fn sort_key_of(self, listing: &Listing) -> SortKeyValue {
        match self {
            Self::CreatedAtDesc | Self::CreatedAtAsc => SortKeyValue::Int(listing.created_at),
            Self::NameAsc | Self::NameDesc => SortKeyValue::Text(listing.name.clone()),
        }
    }

    fn accepts(self, value: &SortKeyValue) -> bool {
        matches!(
            (self, value),
            (Self::CreatedAtDesc | Self::CreatedAtAsc, SortKeyValue::Int(_))
                | (Self::NameAsc | Self::NameDesc, SortKeyValue::Text(_))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageDirection {
    Next,
    Prev,
}

/// Value of the sort column at a cursor position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortKeyValue {
    Int(i64),
    Text(String),
}

impl SortKeyValue {
    fn to_sql(&self) -> Value {
        match self {
            Self::Int(value) => Value::Integer(*value),
            Self::Text(value) => Value::Text(value.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// How one (strategy, direction) pair seeks and orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeekRule {
    /// Fetch order. Opposite of display order for `Prev`.
    order: SortOrder,
    /// Comparison against the cursor for both key and tie-break id.
    op: &'static str,
    /// Whether fetched rows must be reversed into display order.
    reverse: bool,
}

fn seek_rule(strategy: SortStrategy, direction: PageDirection) -> SeekRule {
    use PageDirection::{Next, Prev};
    use SortStrategy::{CreatedAtAsc, CreatedAtDesc, NameAsc, NameDesc};

    let (order, op, reverse) = match (strategy, direction) {
        (CreatedAtDesc, Next) => (SortOrder::Desc, "<", false),
        (CreatedAtDesc, Prev) => (SortOrder::Asc, ">", true),
        (CreatedAtAsc, Next) => (SortOrder::Asc, ">", false),
        (CreatedAtAsc, Prev) => (SortOrder::Desc, "<", true),
        (NameAsc, Next) => (SortOrder::Asc, ">", false),
        (NameAsc, Prev) => (SortOrder::Desc, "<", true),
        (NameDesc, Next) => (SortOrder::Desc, "<", false),
        (NameDesc, Prev) => (SortOrder::Asc, ">", true),
    };
    SeekRule { order, op, reverse }
}

/// Inputs of one keyset query.
#[derive(Debug, Clone)]
pub struct KeysetRequest<'a> {
    pub collection: ListingCollection,
    pub strategy: SortStrategy,
    pub cursor: Option<&'a CursorPosition>,
    /// Page size already clamped by the caller.
    pub limit: u32,
    pub filters: &'a ListingFilters,
}

/// Planned range query plus what page assembly needs to know about it.
#[derive(Debug, Clone, PartialEq)]
pub struct KeysetPlan {
    pub sql: String,
    pub bind_values: Vec<Value>,
    pub strategy: SortStrategy,
    pub direction: PageDirection,
    pub page_size: u32,
    /// Rows requested; one more than `page_size` to detect a further page.
    pub fetch_limit: u32,
    pub reverse_results: bool,
    pub has_cursor: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Cursor was minted for another sort strategy.
    StrategyMismatch {
        cursor: SortStrategy,
        requested: SortStrategy,
    },
    /// Cursor sort key type does not fit the strategy column.
    SortKeyTypeMismatch(SortStrategy),
    ZeroLimit,
}

impl Display for PlanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrategyMismatch { cursor, requested } => write!(
                f,
                "cursor sort `{}` does not match requested sort `{}`",
                cursor.as_str(),
                requested.as_str()
            ),
            Self::SortKeyTypeMismatch(strategy) => {
                write!(f, "cursor sort key type does not fit `{}`", strategy.as_str())
            }
            Self::ZeroLimit => write!(f, "page size must be positive"),
        }
    }
}

impl Error for PlanError {}

/// Builds the range query for one page.
pub fn plan(request: &KeysetRequest<'_>) -> Result<KeysetPlan, PlanError> {
    if request.limit == 0 {
        return Err(PlanError::ZeroLimit);
    }
    if let Some(cursor) = request.cursor {
        if cursor.sort_strategy != request.strategy {
            return Err(PlanError::StrategyMismatch {
                cursor: cursor.sort_strategy,
                requested: request.strategy,
            });
        }
        if !request.strategy.accepts(&cursor.sort_key_value) {
            return Err(PlanError::SortKeyTypeMismatch(request.strategy));
        }
    }

    let direction = request
        .cursor
        .map_or(PageDirection::Next, |cursor| cursor.direction);
    let rule = seek_rule(request.strategy, direction);
    let column = request.strategy.column();

    let mut sql = format!("{LISTING_SELECT_SQL} WHERE listing_type = ? AND is_deleted = 0");
    let mut bind_values = vec![Value::Text(request.collection.listing_type().to_string())];

    sql.push_str(" AND status NOT IN (");
    sql.push_str(&placeholders(EXCLUDED_STATUSES.len()));
    sql.push(')');
    bind_values.extend(
        EXCLUDED_STATUSES
            .iter()
            .map(|status| Value::Text((*status).to_string())),
    );

    push_filter_predicates(&request.filters.normalized(), &mut sql, &mut bind_values);

    if let Some(cursor) = request.cursor {
        let op = rule.op;
        sql.push_str(&format!(
            " AND ({column} {op} ? OR ({column} = ? AND id {op} ?))"
        ));
        bind_values.push(cursor.sort_key_value.to_sql());
        bind_values.push(cursor.sort_key_value.to_sql());
        bind_values.push(Value::Integer(cursor.tie_break_id));
    }

    let order = rule.order.sql();
    let fetch_limit = request.limit.saturating_add(1);
    sql.push_str(&format!(" ORDER BY {column} {order}, id {order} LIMIT ?"));
    bind_values.push(Value::Integer(i64::from(fetch_limit)));

    Ok(KeysetPlan {
        sql,
        bind_values,
        strategy: request.strategy,
        direction,
        page_size: request.limit,
        fetch_limit,
        reverse_results: rule.reverse,
        has_cursor: request.cursor.is_some(),
    })
}

/// One page of listings with boundary cursors.
#[derive(Debug, Clone, PartialEq)]
pub struct KeysetPage {
    pub items: Vec<Listing>,
    /// Absent when no row follows the page.
    pub next: Option<CursorPosition>,
    /// Absent when no row precedes the page.
    pub prev: Option<CursorPosition>,
}

/// Turns rows fetched for `plan` into a page in display order.
///
/// An empty page carries no cursors.
pub fn assemble_page(plan: &KeysetPlan, mut rows: Vec<Listing>, data_version: &str) -> KeysetPage {
    let page_size = plan.page_size as usize;
    let has_more = rows.len() > page_size;
    rows.truncate(page_size);
    if plan.reverse_results {
        rows.reverse();
    }

    let (more_after, more_before) = match plan.direction {
        PageDirection::Next => (has_more, plan.has_cursor),
        PageDirection::Prev => (true, has_more),
    };

    let position = |listing: &Listing, direction: PageDirection| CursorPosition {
        sort_key_value: plan.strategy.sort_key_of(listing),
        tie_break_id: listing.id,
        direction,
        data_version: data_version.to_string(),
        sort_strategy: plan.strategy,
    };

    let next = rows
        .last()
        .filter(|_| more_after)
        .map(|listing| position(listing, PageDirection::Next));
    let prev = rows
        .first()
        .filter(|_| more_before)
        .map(|listing| position(listing, PageDirection::Prev));

    KeysetPage {
        items: rows,
        next,
        prev,
    }
}

fn push_filter_predicates(filters: &ListingFilters, sql: &mut String, binds: &mut Vec<Value>) {
    if let Some(value) = filters.kosher_category.as_ref() {
        sql.push_str(" AND LOWER(kosher_category) = ?");
        binds.push(Value::Text(value.clone()));
    }
    if let Some(value) = filters.city.as_ref() {
        sql.push_str(" AND LOWER(city) = ?");
        binds.push(Value::Text(value.clone()));
    }
    if let Some(value) = filters.state.as_ref() {
        sql.push_str(" AND UPPER(state) = ?");
        binds.push(Value::Text(value.clone()));
    }
    if let Some(value) = filters.min_rating {
        sql.push_str(" AND rating >= ?");
        binds.push(Value::Real(value));
    }
    if let Some(value) = filters.max_rating {
        sql.push_str(" AND rating <= ?");
        binds.push(Value::Real(value));
    }
    if !filters.price_levels.is_empty() {
        sql.push_str(" AND price_level IN (");
        sql.push_str(&placeholders(filters.price_levels.len()));
        sql.push(')');
        binds.extend(filters.price_levels.iter().map(|level| Value::Integer(*level)));
    }
    if let Some(geo) = filters.geo {
        push_geo_predicate(geo, sql, binds);
    }
}

/// Bounding box around the bucket centre; the radius is not checked exactly.
///
/// Latitude is clamped to the poles. A longitude span crossing +/-180 degrees
/// is split into two ranges, and a span covering the whole circle drops the
/// longitude predicate.
fn push_geo_predicate(geo: GeoFilter, sql: &mut String, binds: &mut Vec<Value>) {
    let lat_delta = geo.radius_km / KM_PER_DEGREE_LAT;
    let lng_scale = geo.lat.to_radians().cos() * KM_PER_DEGREE_LAT;
    sql.push_str(" AND latitude BETWEEN ? AND ?");
    binds.push(Value::Real((geo.lat - lat_delta).max(-90.0)));
    binds.push(Value::Real((geo.lat + lat_delta).min(90.0)));

    if lng_scale <= 0.01 || geo.radius_km / lng_scale >= 180.0 {
        sql.push_str(" AND longitude IS NOT NULL");
        return;
    }
    let lng_delta = geo.radius_km / lng_scale;
    let (west, east) = (geo.lng - lng_delta, geo.lng + lng_delta);
    if west < -180.0 {
        sql.push_str(" AND (longitude BETWEEN ? AND 180.0 OR longitude BETWEEN -180.0 AND ?)");
        binds.push(Value::Real(west + 360.0));
        binds.push(Value::Real(east));
    } else if east > 180.0 {
        sql.push_str(" AND (longitude BETWEEN ? AND 180.0 OR longitude BETWEEN -180.0 AND ?)");
        binds.push(Value::Real(west));
        binds.push(Value::Real(east - 360.0));
    } else {
        sql.push_str(" AND longitude BETWEEN ? AND ?");
        binds.push(Value::Real(west));
        binds.push(Value::Real(east));
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
