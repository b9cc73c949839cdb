//! ThreatFox IOC feed (abuse.ch).

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::adapters::{dedup_by_key, http_client};
use crate::budget::{Budget, BudgetOutcome};
use crate::config::Config;
use crate::error::IngestError;
use crate::models::{FeedResult, Ioc};
use crate::normalize::{confidence_from_numeric, ioc_type_from_threatfox};
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "threatfox";
const URL: &str = "https://threatfox-api.abuse.ch/api/v1/";
const BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct ThreatFoxIoc {
    id: serde_json::Value,
    ioc: String,
    ioc_type: String,
    malware_printable: Option<String>,
    confidence_level: u8,
    first_seen: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreatFoxResponse {
    data: Option<Vec<ThreatFoxIoc>>,
}

pub async fn ingest(store: &StoreClient, budget: &Budget, config: &Config) -> FeedResult {
    ingest_from(store, budget, config, URL).await
}

async fn ingest_from(store: &StoreClient, budget: &Budget, config: &Config, url: &str) -> FeedResult {
    let Some(auth_key) = config.abusech_api_key() else {
        return FeedResult::skipped(SOURCE);
    };

    let client = http_client();
    let body = match fetch(&client, budget, url, auth_key).await {
        Ok(body) => body,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let parsed: ThreatFoxResponse = match crate::parsers::json::decode(&body) {
        Ok(parsed) => parsed,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let iocs = parsed.data.unwrap_or_default();
    if iocs.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let deduped = dedup_by_key(iocs, |entry| (entry.ioc_type.clone(), entry.ioc.clone()));

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|entry| {
                Ioc {
                    ioc_type: ioc_type_from_threatfox(&entry.ioc_type),
                    value: entry.ioc.clone(),
                    confidence: confidence_from_numeric(entry.confidence_level),
                    source: SOURCE.to_string(),
                    malware_family: entry.malware_printable.clone(),
                    first_seen: entry.first_seen.clone(),
                    last_seen: None,
                    source_url: Some(format!(
                        "https://threatfox.abuse.ch/ioc/{}/",
                        stringify_id(&entry.id)
                    )),
                    tags: Vec::new(),
                    metadata: json!({"threatfox_id": entry.id}),
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

fn stringify_id(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn fetch(client: &Client, budget: &Budget, url: &str, auth_key: &str) -> crate::error::Result<String> {
    match budget.take(1) {
        BudgetOutcome::Ok => {}
        BudgetOutcome::Exhausted => return Err(IngestError::BudgetExhausted),
    }
    let response = client
        .post(url)
        .header("Auth-Key", auth_key)
        .json(&json!({"query": "get_iocs", "days": 1}))
        .send()
        .await?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(IngestError::Source {
            source_name: SOURCE.to_string(),
            status,
            body,
        });
    }
    Ok(response.text().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn set_env(server_uri: &str) -> Config {
        std::env::set_var("SUPABASE_URL", server_uri);
        std::env::set_var("SUPABASE_KEY", "svc-key");
        std::env::set_var("ABUSECH_API_KEY", "abuse-key");
        let config = Config::from_env().unwrap();
        std::env::remove_var("ABUSECH_API_KEY");
        config
    }

    #[tokio::test]
    async fn skips_without_secret() {
        let server = MockServer::start().await;
        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        std::env::remove_var("ABUSECH_API_KEY");
        let config = Config::from_env().unwrap();

        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        assert!(matches!(result, FeedResult::Skipped { .. }));
        assert_eq!(budget.remaining(), 10);
    }

    #[tokio::test]
    async fn normalizes_ioc_per_s3_scenario() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Auth-Key", "abuse-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "id": 42,
                    "ioc": "8.8.8.8",
                    "ioc_type": "ip:port",
                    "malware_printable": "Emotet",
                    "confidence_level": 90,
                    "first_seen": "2026-01-15T00:00:00Z",
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let config = set_env(&server.uri());
        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        match result {
            FeedResult::Success { updated, .. } => assert_eq!(updated, 1),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
