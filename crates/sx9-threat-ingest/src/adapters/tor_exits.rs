//! Tor bulk exit-list feed. Plain-text IPv4-per-line, no secret required.

use regex::Regex;
use serde_json::json;

use crate::adapters::{dedup_by_key, fetch_text, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::{Confidence, FeedResult, Ioc, IocType};
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "tor-exits";
const URL: &str = "https://check.torproject.org/torbulkexitlist";
const BATCH_SIZE: usize = 200;

pub async fn ingest(store: &StoreClient, budget: &Budget, config: &Config) -> FeedResult {
    ingest_from(store, budget, config, URL).await
}

fn ipv4_regex() -> Regex {
    Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").expect("static regex is valid")
}

async fn ingest_from(store: &StoreClient, budget: &Budget, _config: &Config, url: &str) -> FeedResult {
    let client = http_client();
    let body = match fetch_text(&client, budget, SOURCE, url).await {
        Ok(body) => body,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let re = ipv4_regex();
    let ips: Vec<String> = body
        .lines()
        .map(str::trim)
        .filter(|line| re.is_match(line))
        .map(str::to_string)
        .collect();

    if ips.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let deduped = dedup_by_key(ips, |ip| ip.clone());

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|ip| {
                Ioc {
                    ioc_type: IocType::Ip,
                    value: ip.clone(),
                    confidence: Confidence::High,
                    source: SOURCE.to_string(),
                    malware_family: None,
                    first_seen: None,
                    last_seen: None,
                    source_url: None,
                    tags: vec!["tor".to_string(), "exit-node".to_string(), "anonymization".to_string()],
                    metadata: json!({}),
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
