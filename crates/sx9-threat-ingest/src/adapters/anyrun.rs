//! AnyRun malware-trends page scrape.
//!
//! The HTML itself is untrusted and unstable — [`crate::parsers::html_anyrun`]
//! owns the fallback chain down to a static baseline, so this adapter never
//! fails purely because the markup changed shape (spec.md §9).

use serde_json::json;

use crate::adapters::{fetch_text, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::FeedResult;
use crate::parsers::html_anyrun::{self, AnyRunExtraction};
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "anyrun";
const SOURCE_FALLBACK: &str = "anyrun-fallback";
const URL: &str = "https://any.run/malware-trends/";
const BATCH_SIZE: usize = 50;

pub async fn ingest(store: &StoreClient, budget: &Budget, config: &Config) -> FeedResult {
    ingest_from(store, budget, config, URL).await
}

fn strategy_name(extraction: &AnyRunExtraction) -> &'static str {
    match extraction {
        AnyRunExtraction::JsonLd(_) => "json_ld",
        AnyRunExtraction::DataAttribute(_) => "data_attribute",
        AnyRunExtraction::KeywordScan(_) => "keyword_scan",
        AnyRunExtraction::Baseline => "baseline",
    }
}

async fn ingest_from(store: &StoreClient, budget: &Budget, _config: &Config, url: &str) -> FeedResult {
    let client = http_client();
    let extraction = match fetch_text(&client, budget, SOURCE, url).await {
        Ok(body) => html_anyrun::extract(&body),
        Err(crate::error::IngestError::BudgetExhausted) => return FeedResult::partial(SOURCE, "budget"),
        Err(_) => AnyRunExtraction::Baseline,
    };

    let families = extraction.families();
    if families.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let source = if matches!(extraction, AnyRunExtraction::Baseline) {
        SOURCE_FALLBACK
    } else {
        SOURCE
    };

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in families.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|family| {
                json!({
                    "name": family,
                    "source": source,
                    "trending": true,
                    "metadata": {"extraction_strategy": strategy_name(&extraction)},
                })
            })
            .collect();

        match store
            .upsert("malware_families", &records, UpsertOptions::on_conflict("name"))
            .await
        {
            Ok(()) => updated += records.len() as u32,
            Err(err) if err.is_missing_table() => {
                return FeedResult::skipped(SOURCE);
            }
            Err(err) => {
                failed += records.len() as u32;
                last_error = Some(err.to_string());
            }
        }
    }

    let mut extra = std::collections::HashMap::new();
    extra.insert("extraction_strategy".to_string(), json!(strategy_name(&extraction)));

    FeedResult::Success {
        source: SOURCE.to_string(),
        updated,
        added: updated,
        failed,
        last_error,
        extra,
    }
}
