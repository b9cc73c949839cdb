//! EPSS enrichment — scores existing vulnerabilities, never inserts new ones.
//!
//! Per spec §4.4: collect up to 40 existing `cve_id`s from the store, query
//! `first.org` in batches of 100 (the 40-id cap keeps this to one query
//! call), then `update` each CVE individually — one subrequest per CVE,
//! which is why the id cap exists (spec §8 P5: `≤ 1 + ceil(cves/100) + cves`).

use serde::Deserialize;
use serde_json::json;

use crate::adapters::{fetch_text, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::FeedResult;
use crate::rest_client::StoreClient;

const SOURCE: &str = "epss";
const BASE_URL: &str = "https://api.first.org/data/v1/epss";
const MAX_CVES: usize = 40;
const QUERY_BATCH: usize = 100;

#[derive(Debug, Deserialize)]
struct EpssRow {
    cve: String,
    epss: String,
    percentile: String,
}

#[derive(Debug, Deserialize, Default)]
struct EpssResponse {
    #[serde(default)]
    data: Vec<EpssRow>,
}

pub async fn ingest(store: &StoreClient, budget: &Budget, config: &Config) -> FeedResult {
    ingest_from(store, budget, config, BASE_URL).await
}

async fn ingest_from(store: &StoreClient, budget: &Budget, _config: &Config, base_url: &str) -> FeedResult {
    let rows = match store.select("vulnerabilities", "cve_id").await {
        Ok(rows) => rows,
        Err(err) if err.is_missing_table() => return FeedResult::skipped(SOURCE),
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let cve_ids: Vec<String> = rows
        .iter()
        .filter_map(|row| row.get("cve_id").and_then(|v| v.as_str()).map(str::to_string))
        .take(MAX_CVES)
        .collect();

    if cve_ids.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let client = http_client();
    let mut scores = Vec::new();
    for chunk in cve_ids.chunks(QUERY_BATCH) {
        let csv = chunk.join(",");
        let url = format!("{base_url}?cve={csv}");
        let body = match fetch_text(&client, budget, SOURCE, &url).await {
            Ok(body) => body,
            Err(crate::error::IngestError::BudgetExhausted) => return FeedResult::partial(SOURCE, "budget"),
            Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
        };
        let parsed: EpssResponse = match crate::parsers::json::decode(&body) {
            Ok(parsed) => parsed,
            Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
        };
        scores.extend(parsed.data);
    }

    if scores.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for row in &scores {
        let epss_score: Option<f32> = row.epss.parse().ok();
        let epss_percentile: Option<f32> = row.percentile.parse().ok();
        let patch = json!({
            "epss_score": epss_score,
            "epss_percentile": epss_percentile,
        });
        match store.update("vulnerabilities", patch).eq("cve_id", &row.cve).execute().await {
            Ok(()) => updated += 1,
            Err(crate::error::IngestError::BudgetExhausted) => {
                return FeedResult::Success {
                    source: SOURCE.to_string(),
                    updated,
                    added: 0,
                    failed,
                    last_error: Some("budget exhausted mid-batch".to_string()),
                    extra: Default::default(),
                };
            }
            Err(err) => {
                failed += 1;
                last_error = Some(err.to_string());
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn scores_existing_cves_without_inserting() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/vulnerabilities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"cve_id": "CVE-2024-1234"}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"cve": "CVE-2024-1234", "epss": "0.55", "percentile": "0.90"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        let config = Config::from_env().unwrap();

        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        match result {
            FeedResult::Success { updated, added, .. } => {
                assert_eq!(updated, 1);
                assert_eq!(added, 0);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_existing_cves_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        let config = Config::from_env().unwrap();

        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        assert!(matches!(result, FeedResult::Skipped { .. }));
    }
}
