//! BGPStream hijack/leak event feed (bgpstream.com JSON event export).
//!
//! Upstream publishes routing anomalies, not indicators in the usual
//! sense — each hijacked or leaked prefix is normalized into an `ip`-typed
//! IOC the same way [`crate::adapters::feodo`] and
//! [`crate::adapters::tor_exits`] normalize their IP lists, tagged with the
//! BGPStream event type so downstream consumers can tell it apart from a
//! malware blocklist hit.

use serde::Deserialize;
use serde_json::json;

use crate::adapters::{dedup_by_key, fetch_text, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::{Confidence, FeedResult, Ioc, IocType};
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "bgpstream";
const URL: &str = "https://bgpstream.com/json/events?type=hijack&type=leak";
const BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct BgpEvent {
    prefix: String,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    expected_origin_as: Option<i64>,
    #[serde(default)]
    detected_origin_as: Option<i64>,
    #[serde(default)]
    start_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BgpStreamResponse {
    events: Vec<BgpEvent>,
}

pub async fn ingest(store: &StoreClient, budget: &Budget, config: &Config) -> FeedResult {
    ingest_from(store, budget, config, URL).await
}

async fn ingest_from(store: &StoreClient, budget: &Budget, _config: &Config, url: &str) -> FeedResult {
    let client = http_client();
    let body = match fetch_text(&client, budget, SOURCE, url).await {
        Ok(body) => body,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let response: BgpStreamResponse = match crate::parsers::json::decode(&body) {
        Ok(response) => response,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    if response.events.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let deduped = dedup_by_key(response.events, |event| event.prefix.clone());

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|event| {
                let event_type = event.event_type.clone().unwrap_or_else(|| "hijack".to_string());
                Ioc {
                    ioc_type: IocType::Ip,
                    value: event.prefix.clone(),
                    confidence: Confidence::Medium,
                    source: SOURCE.to_string(),
                    malware_family: None,
                    first_seen: event.start_time.clone(),
                    last_seen: None,
                    source_url: None,
                    tags: vec!["bgp".to_string(), event_type],
                    metadata: json!({
                        "expected_origin_as": event.expected_origin_as,
                        "detected_origin_as": event.detected_origin_as,
                    }),
                }
            })
            .collect();

        match store
            .upsert("iocs", &records, UpsertOptions::on_conflict("type,value"))
            .await
        {
            Ok(()) => updated += records.len() as u32,
            Err(err) => {
                failed += records.len() as u32;
                last_error = Some(err.to_string());
            }
        }
    }

    FeedResult::Success {
        source: SOURCE.to_string(),
        updated,
        added: updated,
        failed,
        last_error,
        extra: Default::default(),
    }
}
