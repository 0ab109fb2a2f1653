//! Request shapes accepted by `ListingService`.

use crate::model::listing::{ListingCollection, ListingId};
use crate::pagination::etag::ConditionalHeaders;
use crate::pagination::filters::{FilterError, ListingFilters};
use crate::pagination::keyset::{PageDirection, SortStrategy};
use crate::pagination::version::UserContext;

/// One collection page request.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRequest {
    pub collection: ListingCollection,
    /// Opaque token from a previous page, as received.
    pub cursor: Option<String>,
    /// Requested page size; clamped by the engine config.
    pub limit: Option<u32>,
    /// Explicit sort. Defaults to the cursor's sort, then `created_at_desc`.
    pub sort: Option<SortStrategy>,
    /// Overrides the direction stored in the cursor.
    pub direction: Option<PageDirection>,
    pub filters: ListingFilters,
    pub user: UserContext,
    pub conditional: ConditionalHeaders,
}

impl CollectionRequest {
    pub fn new(collection: ListingCollection) -> Self {
        Self {
            collection,
            cursor: None,
            limit: None,
            sort: None,
            direction: None,
            filters: ListingFilters::default(),
            user: UserContext::default(),
            conditional: ConditionalHeaders::default(),
        }
    }

    /// Parses a raw query map.
    ///
    /// `cursor`, `limit`, `sort` and `direction` are read here; every other key
    /// goes to `ListingFilters::from_pairs`, which drops the unknown ones.
    pub fn from_query_pairs<I, K, V>(
        collection: ListingCollection,
        pairs: I,
    ) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut request = Self::new(collection);
        let mut filter_pairs = Vec::new();

        for (key, value) in pairs {
            let key = key.as_ref().trim();
            let value = value.as_ref().trim();
            match key {
                "cursor" => request.cursor = Some(value.to_string()).filter(|v| !v.is_empty()),
                "limit" => {
                    if value.is_empty() {
                        continue;
                    }
                    let limit = value.parse::<u32>().map_err(|_| FilterError {
                        field: "limit",
                        reason: format!("`{value}` is not a non-negative integer"),
                    })?;
                    request.limit = Some(limit);
                }
                "sort" => {
                    if value.is_empty() {
                        continue;
                    }
                    request.sort = Some(SortStrategy::parse(value).ok_or_else(|| FilterError {
                        field: "sort",
                        reason: format!("unsupported sort `{value}`"),
                    })?);
                }
                "direction" => {
                    request.direction = match value.to_ascii_lowercase().as_str() {
                        "" => None,
                        "next" => Some(PageDirection::Next),
                        "prev" | "previous" => Some(PageDirection::Prev),
                        other => {
                            return Err(FilterError {
                                field: "direction",
                                reason: format!("unsupported direction `{other}`"),
                            })
                        }
                    };
                }
                _ => filter_pairs.push((key.to_string(), value.to_string())),
            }
        }

        request.filters = ListingFilters::from_pairs(filter_pairs)?;
        Ok(request)
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_sort(mut self, sort: SortStrategy) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_filters(mut self, filters: ListingFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_user(mut self, user: UserContext) -> Self {
        self.user = user;
        self
    }

    pub fn with_conditional(mut self, conditional: ConditionalHeaders) -> Self {
        self.conditional = conditional;
        self
    }
}

/// One entity request.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRequest {
    pub collection: ListingCollection,
    pub id: ListingId,
    /// Sparse fieldset; `None` returns every field.
    pub fields: Option<Vec<String>>,
    pub user: UserContext,
    pub conditional: ConditionalHeaders,
}

impl EntityRequest {
    pub fn new(collection: ListingCollection, id: ListingId) -> Self {
        Self {
            collection,
            id,
            fields: None,
            user: UserContext::default(),
            conditional: ConditionalHeaders::default(),
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_user(mut self, user: UserContext) -> Self {
        self.user = user;
        self
    }

    pub fn with_conditional(mut self, conditional: ConditionalHeaders) -> Self {
        self.conditional = conditional;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::CollectionRequest;
    use crate::model::listing::ListingCollection;
    use crate::pagination::keyset::{PageDirection, SortStrategy};

    #[test]
    fn query_pairs_split_paging_and_filter_keys() {
        let request = CollectionRequest::from_query_pairs(
            ListingCollection::Restaurants,
            [
                ("limit", "5"),
                ("sort", "name"),
                ("direction", "prev"),
                ("state", "fl"),
                ("utm_source", "mail"),
                ("cursor", ""),
            ],
        )
        .expect("query should parse");

        assert_eq!(request.limit, Some(5));
        assert_eq!(request.sort, Some(SortStrategy::NameAsc));
        assert_eq!(request.direction, Some(PageDirection::Prev));
        assert_eq!(request.filters.state.as_deref(), Some("fl"));
        assert!(request.cursor.is_none());
    }

    #[test]
    fn malformed_paging_values_are_filter_errors() {
        for (key, value) in [("limit", "-1"), ("sort", "rating"), ("direction", "up")] {
            let err = CollectionRequest::from_query_pairs(
                ListingCollection::Restaurants,
                [(key, value)],
            )
            .expect_err("malformed value");
            assert_eq!(err.field, key);
        }
    }
}
