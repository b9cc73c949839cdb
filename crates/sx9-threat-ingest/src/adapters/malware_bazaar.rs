//! MalwareBazaar recent-samples feed (abuse.ch).

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::adapters::{dedup_by_key, http_client};
use crate::budget::{Budget, BudgetOutcome};
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::models::{Confidence, FeedResult, Ioc, IocType};
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "malware_bazaar";
const URL: &str = "https://mb-api.abuse.ch/api/v1/";
const BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct BazaarSample {
    sha256_hash: String,
    signature: Option<String>,
    first_seen: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BazaarResponse {
    data: Option<Vec<BazaarSample>>,
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

    let parsed: BazaarResponse = match crate::parsers::json::decode(&body) {
        Ok(parsed) => parsed,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let samples = parsed.data.unwrap_or_default();
    if samples.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let deduped = dedup_by_key(samples, |sample| sample.sha256_hash.clone());

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|sample| {
                Ioc {
                    ioc_type: IocType::HashSha256,
                    value: sample.sha256_hash.clone(),
                    confidence: Confidence::High,
                    source: SOURCE.to_string(),
                    malware_family: sample.signature.clone(),
                    first_seen: sample.first_seen.clone(),
                    last_seen: None,
                    source_url: None,
                    tags: Vec::new(),
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

async fn fetch(client: &Client, budget: &Budget, url: &str, auth_key: &str) -> Result<String> {
    match budget.take(1) {
        BudgetOutcome::Ok => {}
        BudgetOutcome::Exhausted => return Err(IngestError::BudgetExhausted),
    }
    let response = client
        .post(url)
        .header("Auth-Key", auth_key)
        .form(&[("query", "get_recent"), ("selector", "time")])
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
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn upserts_sha256_iocs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"sha256_hash": "a".repeat(64), "signature": "AgentTesla", "first_seen": "2026-01-01 00:00:00"}]
            })))
            .mount(&server)
            .await;

        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        std::env::set_var("ABUSECH_API_KEY", "abuse-key");
        let config = Config::from_env().unwrap();
        std::env::remove_var("ABUSECH_API_KEY");

        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        match result {
            FeedResult::Success { updated, .. } => assert_eq!(updated, 1),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
