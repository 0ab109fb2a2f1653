use listing_core::config::EngineConfig;
use listing_core::db::open_db_in_memory;
use listing_core::model::listing::{ListingCollection, NewListing};
use listing_core::repo::listing_repo::{ListingRepository, SqliteListingRepository};
use listing_core::repo::listing_store::SqliteListingStore;
use listing_core::service::listing_service::ListingService;
use listing_core::service::request::CollectionRequest;
use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;
use std::sync::Mutex;

struct CapturingLogger {
    lines: Mutex<Vec<String>>,
}

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

static LOGGER: Lazy<CapturingLogger> = Lazy::new(|| CapturingLogger {
    lines: Mutex::new(Vec::new()),
});

fn stage_of(line: &str) -> Option<&str> {
    line.split_whitespace()
        .find_map(|field| field.strip_prefix("stage="))
}

#[test]
fn collection_request_logs_each_stage_in_order() {
    log::set_logger(&*LOGGER).unwrap();
    log::set_max_level(LevelFilter::Debug);

    let conn = open_db_in_memory().unwrap();
    let repo = SqliteListingRepository::new(&conn);
    for name in ["Bagel Boss", "Chickpea", "Deli"] {
        repo.create_listing(&NewListing::new(ListingCollection::Restaurants, name))
            .unwrap();
    }
    let service = ListingService::with_config(SqliteListingStore::new(&conn), EngineConfig::default());

    let first_request = CollectionRequest::new(ListingCollection::Restaurants).with_limit(2);
    let first = service
        .list_collection(&first_request)
        .unwrap()
        .into_body()
        .unwrap();
    LOGGER.lines.lock().unwrap().clear();

    let token = first.next_cursor.unwrap();
    service
        .list_collection(&first_request.with_cursor(token))
        .unwrap();

    let lines = LOGGER.lines.lock().unwrap().clone();
    let stage_lines = lines
        .iter()
        .filter(|line| line.starts_with("event=collection_stage "))
        .collect::<Vec<_>>();
    let stages = stage_lines
        .iter()
        .filter_map(|line| stage_of(line))
        .collect::<Vec<_>>();
    assert_eq!(
        stages,
        vec![
            "decode_cursor",
            "build_query",
            "resolve_watermark",
            "compute_version",
            "validate_version",
            "compute_etag",
            "match_conditional",
            "execute",
        ]
    );

    let request_ids = stage_lines
        .iter()
        .filter_map(|line| {
            line.split_whitespace()
                .find_map(|field| field.strip_prefix("request_id="))
        })
        .collect::<std::collections::HashSet<_>>();
    assert_eq!(request_ids.len(), 1);
}
