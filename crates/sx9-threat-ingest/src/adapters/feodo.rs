//! Feodo Tracker recommended IP blocklist (abuse.ch). No secret required.

use serde::Deserialize;
use serde_json::json;

use crate::adapters::{dedup_by_key, fetch_text, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::{Confidence, FeedResult, Ioc, IocType};
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "feodo";
const URL: &str = "https://feodotracker.abuse.ch/downloads/ipblocklist_recommended.json";
const BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct FeodoEntry {
    ip_address: String,
    #[serde(default)]
    malware: Option<String>,
    #[serde(default)]
    first_seen: Option<String>,
    #[serde(default)]
    last_seen: Option<String>,
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

    let entries: Vec<FeodoEntry> = match crate::parsers::json::decode(&body) {
        Ok(entries) => entries,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    if entries.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let deduped = dedup_by_key(entries, |entry| entry.ip_address.clone());

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|entry| {
                Ioc {
                    ioc_type: IocType::Ip,
                    value: entry.ip_address.clone(),
                    confidence: Confidence::High,
                    source: SOURCE.to_string(),
                    malware_family: entry.malware.clone(),
                    first_seen: entry.first_seen.clone(),
                    last_seen: entry.last_seen.clone(),
                    source_url: None,
                    tags: vec!["botnet-c2".to_string()],
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn requires_no_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"ip_address": "1.2.3.4", "malware": "Dridex", "first_seen": "2026-01-01"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        let config = Config::from_env().unwrap();

        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        match result {
            FeedResult::Success { updated, .. } => assert_eq!(updated, 1),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dedups_repeated_ip_within_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"ip_address": "1.2.3.4", "malware": "Dridex"},
                {"ip_address": "1.2.3.4", "malware": "Dridex"},
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        let config = Config::from_env().unwrap();

        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        match result {
            FeedResult::Success { updated, .. } => assert_eq!(updated, 1),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
