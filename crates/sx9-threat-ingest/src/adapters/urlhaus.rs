//! URLhaus recent-URLs feed (abuse.ch).

use serde::Deserialize;
use serde_json::json;

use crate::adapters::{dedup_by_key, fetch_text_with_header, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::{Confidence, FeedResult, Ioc, IocType};
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "urlhaus";
const URL: &str = "https://urlhaus-api.abuse.ch/v1/urls/recent/";
const BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct UrlhausEntry {
    id: serde_json::Value,
    url: String,
    threat: Option<String>,
    date_added: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UrlhausResponse {
    urls: Option<Vec<UrlhausEntry>>,
}

pub async fn ingest(store: &StoreClient, budget: &Budget, config: &Config) -> FeedResult {
    ingest_from(store, budget, config, URL).await
}

async fn ingest_from(store: &StoreClient, budget: &Budget, config: &Config, url: &str) -> FeedResult {
    let Some(auth_key) = config.abusech_api_key() else {
        return FeedResult::skipped(SOURCE);
    };

    let client = http_client();
    let body = match fetch_text_with_header(&client, budget, SOURCE, url, "Auth-Key", auth_key).await {
        Ok(body) => body,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let parsed: UrlhausResponse = match crate::parsers::json::decode(&body) {
        Ok(parsed) => parsed,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let entries = parsed.urls.unwrap_or_default();
    if entries.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let deduped = dedup_by_key(entries, |entry| entry.url.clone());

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|entry| {
                Ioc {
                    ioc_type: IocType::Url,
                    value: entry.url.clone(),
                    confidence: Confidence::High,
                    source: SOURCE.to_string(),
                    malware_family: entry.threat.clone(),
                    first_seen: entry.date_added.clone(),
                    last_seen: None,
                    source_url: None,
                    tags: Vec::new(),
                    metadata: json!({"urlhaus_id": entry.id}),
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
