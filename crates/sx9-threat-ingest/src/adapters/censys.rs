//! Censys per-IP enrichment of existing IOCs.
//!
//! Reads up to 50 `type='ip'` IOCs that have not yet been enriched, looks
//! each one up individually with an explicit ≥1s spacing (spec §5
//! backpressure contract), and writes the result back onto
//! `metadata.censys_enriched`. A 404 marks the IOC as looked-up-but-empty
//! (`metadata.censys_no_data`); a 429 halts the whole invocation rather
//! than retrying (spec §4.4 Censys policy).

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::adapters::http_client;
use crate::budget::{Budget, BudgetOutcome};
use crate::config::Config;
use crate::models::FeedResult;
use crate::rest_client::StoreClient;

const SOURCE: &str = "censys";
const BASE_URL: &str = "https://api.platform.censys.io/v3/global/asset/host";
const MAX_LOOKUPS: usize = 50;
const LOOKUP_BACKPRESSURE: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct IocRow {
    value: String,
    #[serde(default)]
    metadata: Option<Value>,
}

fn already_enriched(row: &IocRow) -> bool {
    row.metadata
        .as_ref()
        .and_then(|m| m.get("censys_enriched"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub async fn ingest(store: &StoreClient, budget: &Budget, config: &Config) -> FeedResult {
    ingest_from(store, budget, config, BASE_URL).await
}

async fn ingest_from(store: &StoreClient, budget: &Budget, config: &Config, base_url: &str) -> FeedResult {
    let Some(api_key) = config.censys_api_key() else {
        return FeedResult::skipped(SOURCE);
    };

    let rows = match store.select_raw("iocs", "select=value,metadata&type=eq.ip").await {
        Ok(rows) => rows,
        Err(err) if err.is_missing_table() => return FeedResult::skipped(SOURCE),
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let candidates: Vec<IocRow> = rows
        .into_iter()
        .filter_map(|row| serde_json::from_value::<IocRow>(row).ok())
        .filter(|row| !already_enriched(row))
        .take(MAX_LOOKUPS)
        .collect();

    if candidates.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let client = http_client();
    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for (i, row) in candidates.iter().enumerate() {
        match lookup(&client, budget, base_url, &row.value, api_key).await {
            Ok(LookupOutcome::Found(enrichment)) => {
                match store
                    .update(
                        "iocs",
                        json!({"metadata": merge_metadata(&row.metadata, json!({"censys_enriched": true, "censys": enrichment}))}),
                    )
                    .eq("value", &row.value)
                    .execute()
                    .await
                {
                    Ok(()) => updated += 1,
                    Err(err) => {
                        failed += 1;
                        last_error = Some(err.to_string());
                    }
                }
            }
            Ok(LookupOutcome::NotFound) => {
                match store
                    .update(
                        "iocs",
                        json!({"metadata": merge_metadata(&row.metadata, json!({"censys_enriched": true, "censys_no_data": true}))}),
                    )
                    .eq("value", &row.value)
                    .execute()
                    .await
                {
                    Ok(()) => updated += 1,
                    Err(err) => {
                        failed += 1;
                        last_error = Some(err.to_string());
                    }
                }
            }
            Err(LookupError::RateLimited) => {
                return FeedResult::partial(SOURCE, "rate_limited");
            }
            Err(LookupError::Budget) => {
                return FeedResult::partial(SOURCE, "budget");
            }
            Err(LookupError::Other(message)) => {
                failed += 1;
                last_error = Some(message);
            }
        }

        if i + 1 < candidates.len() {
            sleep(LOOKUP_BACKPRESSURE).await;
        }
    }

    FeedResult::Success {
        source: SOURCE.to_string(),
        updated,
        added: 0,
        failed,
        last_error,
        extra: Default::default(),
    }
}

fn merge_metadata(existing: &Option<Value>, additions: Value) -> Value {
    let mut merged = existing.clone().unwrap_or_else(|| json!({}));
    if let (Some(merged_obj), Some(additions_obj)) = (merged.as_object_mut(), additions.as_object()) {
        for (key, value) in additions_obj {
            merged_obj.insert(key.clone(), value.clone());
        }
    }
    merged
}

enum LookupOutcome {
    Found(Value),
    NotFound,
}

enum LookupError {
    RateLimited,
    Budget,
    Other(String),
}

async fn lookup(
    client: &reqwest::Client,
    budget: &Budget,
    base_url: &str,
    ip: &str,
    api_key: &str,
) -> Result<LookupOutcome, LookupError> {
    match budget.take(1) {
        BudgetOutcome::Ok => {}
        BudgetOutcome::Exhausted => return Err(LookupError::Budget),
    }

    let url = format!("{base_url}/{ip}");
    let response = client
        .get(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .send()
        .await
        .map_err(|err| LookupError::Other(err.to_string()))?;

    match response.status().as_u16() {
        200 => {
            let body: Value = response.json().await.map_err(|err| LookupError::Other(err.to_string()))?;
            Ok(LookupOutcome::Found(body))
        }
        404 => Ok(LookupOutcome::NotFound),
        429 => Err(LookupError::RateLimited),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(LookupError::Other(format!("censys returned {status}: {body}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn skips_without_api_key() {
        let server = MockServer::start().await;
        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        std::env::remove_var("CENSYS_API_KEY");
        let config = Config::from_env().unwrap();

        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        assert!(matches!(result, FeedResult::Skipped { .. }));
    }

    #[tokio::test]
    async fn halts_invocation_on_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/iocs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"value": "1.2.3.4", "metadata": {}},
                {"value": "5.6.7.8", "metadata": {}},
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1.2.3.4"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        std::env::set_var("CENSYS_API_KEY", "censys-key");
        let config = Config::from_env().unwrap();
        std::env::remove_var("CENSYS_API_KEY");

        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        match result {
            FeedResult::Partial { reason, .. } => assert_eq!(reason, "rate_limited"),
            other => panic!("expected partial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn marks_404_as_no_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/iocs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"value": "1.2.3.4", "metadata": {}},
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1.2.3.4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/iocs"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        std::env::set_var("CENSYS_API_KEY", "censys-key");
        let config = Config::from_env().unwrap();
        std::env::remove_var("CENSYS_API_KEY");

        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        match result {
            FeedResult::Success { updated, .. } => assert_eq!(updated, 1),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
