//! Pulsedive threat-indicator enrichment feed.
//!
//! One category query per IOC type, with an explicit ≥1.5s sleep between
//! category fetches (spec §5 backpressure contract).

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;

use crate::adapters::{dedup_by_key, http_client};
use crate::budget::{Budget, BudgetOutcome};
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::models::{Confidence, FeedResult, Ioc};
use crate::normalize::ioc_type_from_pulsedive;
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "pulsedive";
const BASE_URL: &str = "https://pulsedive.com/api/explore.php";
const CATEGORIES: &[&str] = &["ip", "domain", "url"];
const BATCH_SIZE: usize = 100;
const CATEGORY_BACKPRESSURE: Duration = Duration::from_millis(1500);

#[derive(Debug, Deserialize)]
struct PulsediveIndicator {
    indicator: String,
    #[serde(rename = "type")]
    indicator_type: String,
    #[serde(default)]
    risk: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PulsediveResponse {
    results: Option<Vec<PulsediveIndicator>>,
}

pub async fn ingest(store: &StoreClient, budget: &Budget, config: &Config) -> FeedResult {
    ingest_from(store, budget, config, BASE_URL).await
}

async fn ingest_from(store: &StoreClient, budget: &Budget, config: &Config, base_url: &str) -> FeedResult {
    let Some(api_key) = config.pulsedive_api_key() else {
        return FeedResult::skipped(SOURCE);
    };

    let client = http_client();
    let mut all_indicators = Vec::new();

    for (i, category) in CATEGORIES.iter().enumerate() {
        match fetch_category(&client, budget, base_url, category, api_key).await {
            Ok(mut indicators) => all_indicators.append(&mut indicators),
            Err(IngestError::BudgetExhausted) => {
                return FeedResult::partial(SOURCE, "budget");
            }
            Err(err) => {
                tracing::warn!(error = %err, category = %category, "pulsedive category fetch failed");
            }
        }
        if i + 1 < CATEGORIES.len() {
            sleep(CATEGORY_BACKPRESSURE).await;
        }
    }

    if all_indicators.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let deduped = dedup_by_key(all_indicators, |entry| {
        (entry.indicator_type.clone(), entry.indicator.clone())
    });

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|entry| {
                Ioc {
                    ioc_type: ioc_type_from_pulsedive(&entry.indicator_type),
                    value: entry.indicator.clone(),
                    confidence: risk_to_confidence(entry.risk.as_deref()),
                    source: SOURCE.to_string(),
                    malware_family: None,
                    first_seen: None,
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

fn risk_to_confidence(risk: Option<&str>) -> Confidence {
    match risk {
        Some("high") | Some("critical") => Confidence::High,
        Some("low") | Some("none") => Confidence::Low,
        _ => Confidence::Medium,
    }
}

async fn fetch_category(
    client: &reqwest::Client,
    budget: &Budget,
    base_url: &str,
    category: &str,
    api_key: &str,
) -> Result<Vec<PulsediveIndicator>> {
    match budget.take(1) {
        BudgetOutcome::Ok => {}
        BudgetOutcome::Exhausted => return Err(IngestError::BudgetExhausted),
    }
    let url = format!("{base_url}?q=risk%3Dhigh+type%3D{category}&key={api_key}");
    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(IngestError::Source {
            source_name: SOURCE.to_string(),
            status,
            body,
        });
    }
    let parsed: PulsediveResponse = response.json().await?;
    Ok(parsed.results.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn skips_without_api_key() {
        let server = MockServer::start().await;
        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        std::env::remove_var("PULSEDIVE_API_KEY");
        let config = Config::from_env().unwrap();

        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        assert!(matches!(result, FeedResult::Skipped { .. }));
        assert_eq!(budget.remaining(), 10);
    }

    #[tokio::test]
    async fn queries_each_category_and_upserts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"indicator": "1.2.3.4", "type": "ip", "risk": "high"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        std::env::set_var("PULSEDIVE_API_KEY", "pd-key");
        let config = Config::from_env().unwrap();
        std::env::remove_var("PULSEDIVE_API_KEY");

        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        match result {
            FeedResult::Success { updated, .. } => assert_eq!(updated, 1),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
