//! Command-line entry point for the listing engine.
//!
//! Runs one collection request against the database and prints status,
//! headers and body as JSON. Trailing `key=value` arguments are the
//! collection query (`cursor`, `limit`, `sort`, `direction`, filters).

use clap::Parser;
use listing_core::{
    default_log_level, init_logging, open_db_with_timeout, CollectionRequest, ConditionalHeaders,
    EngineConfig, ListingCollection, ListingError, ListingService, SqliteListingStore,
};
use log::info;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "listing_cli")]
#[command(about = "Run one listing collection request and print the response as JSON")]
struct Cli {
    /// SQLite database file; created and migrated when missing.
    db_path: PathBuf,

    /// JSON engine config; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "restaurants", value_parser = parse_collection)]
    collection: ListingCollection,

    #[arg(long)]
    if_none_match: Option<String>,

    #[arg(long)]
    if_match: Option<String>,

    /// Enables rotating file logs in this directory.
    #[arg(long)]
    log_dir: Option<String>,

    /// Query pairs such as `limit=10` or `state=FL`.
    #[arg(value_name = "KEY=VALUE", value_parser = parse_query_pair)]
    query: Vec<(String, String)>,
}

fn parse_collection(raw: &str) -> Result<ListingCollection, String> {
    ListingCollection::parse(raw).ok_or_else(|| format!("unknown collection `{raw}`"))
}

fn parse_query_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("listing_cli: {message}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, String> {
    if let Some(log_dir) = cli.log_dir.as_deref() {
        init_logging(default_log_level(), log_dir).map_err(|err| err.to_string())?;
    }

    let config = match cli.config.as_deref() {
        Some(path) => EngineConfig::load(path).map_err(|err| err.to_string())?,
        None => EngineConfig::default(),
    };
    let conn = open_db_with_timeout(&cli.db_path, config.query_timeout())
        .map_err(|err| format!("failed to open `{}`: {err}", cli.db_path.display()))?;
    info!(
        "event=cli_request module=cli status=start collection={}",
        cli.collection.as_str()
    );

    let conditional = ConditionalHeaders {
        if_none_match: cli.if_none_match,
        if_match: cli.if_match,
    };
    let request = CollectionRequest::from_query_pairs(cli.collection, cli.query)
        .map_err(ListingError::from)
        .map(|request| request.with_conditional(conditional));
    let store = SqliteListingStore::with_query_timeout(&conn, config.query_timeout());
    let service = ListingService::with_config(store, config);
    let response = request.and_then(|request| service.list_collection(&request));

    let (status, output) = match response {
        Ok(outcome) => {
            let headers = outcome
                .headers()
                .iter()
                .map(|(name, value)| ((*name).to_string(), Value::from(value.clone())))
                .collect::<Map<_, _>>();
            let body = match outcome.body() {
                Some(page) => serde_json::to_value(page).map_err(|err| err.to_string())?,
                None => Value::Null,
            };
            (
                outcome.status(),
                json!({ "status": outcome.status(), "headers": headers, "body": body }),
            )
        }
        Err(err) => (
            err.status_code(),
            json!({ "status": err.status_code(), "body": err.to_body() }),
        ),
    };

    let rendered = serde_json::to_string_pretty(&output).map_err(|err| err.to_string())?;
    println!("{rendered}");
    Ok(if status < 400 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
