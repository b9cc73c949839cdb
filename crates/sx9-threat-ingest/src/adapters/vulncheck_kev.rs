//! VulnCheck KEV catalog — cursor-paginated, bearer-authenticated.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapters::{dedup_by_key, http_client};
use crate::budget::{Budget, BudgetOutcome};
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::models::{FeedResult, Vulnerability};
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "vulncheck-kev";
const URL: &str = "https://api.vulncheck.com/v3/index/vulncheck-kev";
const BATCH_SIZE: usize = 50;
const MAX_PAGES: usize = 5;

#[derive(Debug, Deserialize)]
struct VulnCheckEntry {
    cve: Value,
    #[serde(default)]
    vendor_project: Option<String>,
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    date_added: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct VulnCheckMeta {
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VulnCheckPage {
    #[serde(default)]
    data: Vec<VulnCheckEntry>,
    #[serde(rename = "_meta", default)]
    meta: VulnCheckMeta,
}

pub async fn ingest(store: &StoreClient, budget: &Budget, config: &Config) -> FeedResult {
    ingest_from(store, budget, config, URL).await
}

/// `cve` may arrive as a single string or an array of strings — the first
/// entry is the canonical id (spec §4.4 VulnCheck KEV policy).
fn first_cve_id(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

async fn fetch_page(
    client: &Client,
    budget: &Budget,
    base_url: &str,
    bearer: &str,
    cursor: Option<&str>,
) -> Result<VulnCheckPage> {
    match budget.take(1) {
        BudgetOutcome::Ok => {}
        BudgetOutcome::Exhausted => return Err(IngestError::BudgetExhausted),
    }
    let url = match cursor {
        Some(cursor) => format!("{base_url}?cursor={cursor}"),
        None => base_url.to_string(),
    };
    let response = client
        .get(&url)
        .header("Authorization", format!("Bearer {bearer}"))
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
    Ok(response.json().await?)
}

async fn ingest_from(store: &StoreClient, budget: &Budget, config: &Config, base_url: &str) -> FeedResult {
    let Some(bearer) = config.vulncheck_api_key() else {
        return FeedResult::skipped(SOURCE);
    };

    let client = http_client();
    let mut entries = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let page = match fetch_page(&client, budget, base_url, bearer, cursor.as_deref()).await {
            Ok(page) => page,
            Err(IngestError::BudgetExhausted) => return FeedResult::partial(SOURCE, "budget"),
            Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
        };
        entries.extend(page.data);
        match page.meta.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }

    if entries.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let deduped = dedup_by_key(entries, |entry| first_cve_id(&entry.cve).unwrap_or_default());

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .filter_map(|entry| {
                let cve_id = first_cve_id(&entry.cve)?;
                Some(Vulnerability {
                    cve_id,
                    description: None,
                    cvss_score: None,
                    cvss_vector: None,
                    epss_score: None,
                    epss_percentile: None,
                    affected_vendors: entry.vendor_project.clone().into_iter().collect(),
                    affected_products: entry.product.clone().into_iter().collect(),
                    kev_date: entry.date_added.clone(),
                    kev_due_date: None,
                    exploited_in_wild: true,
                    ransomware_campaign_use: false,
                    has_public_exploit: false,
                    source: SOURCE.to_string(),
                    metadata: json!({}),
                })
            })
            .collect();

        match store
            .upsert("vulnerabilities", &records, UpsertOptions::on_conflict("cve_id"))
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
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn skips_without_bearer() {
        let server = MockServer::start().await;
        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        std::env::remove_var("VULNCHECK_API_KEY");
        let config = Config::from_env().unwrap();

        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        assert!(matches!(result, FeedResult::Skipped { .. }));
    }

    #[tokio::test]
    async fn takes_first_cve_when_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer vc-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"cve": ["CVE-2024-1111", "CVE-2024-2222"], "vendor_project": "Acme", "product": "Widget", "date_added": "2024-02-01"}],
                "_meta": {"next_cursor": null}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        std::env::set_var("VULNCHECK_API_KEY", "vc-key");
        let config = Config::from_env().unwrap();
        std::env::remove_var("VULNCHECK_API_KEY");

        let budget = Arc::new(Budget::new(10));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        match result {
            FeedResult::Success { updated, .. } => assert_eq!(updated, 1),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stops_after_max_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Authorization", "Bearer vc-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"cve": "CVE-2024-0001"}],
                "_meta": {"next_cursor": "more"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        std::env::set_var("SUPABASE_URL", server.uri());
        std::env::set_var("SUPABASE_KEY", "svc-key");
        std::env::set_var("VULNCHECK_API_KEY", "vc-key");
        let config = Config::from_env().unwrap();
        std::env::remove_var("VULNCHECK_API_KEY");

        let budget = Arc::new(Budget::new(20));
        let store = StoreClient::new(server.uri(), "svc-key", budget.clone());
        let result = ingest_from(&store, &budget, &config, &server.uri()).await;
        assert!(matches!(result, FeedResult::Success { .. }));
        // 5 GET pages + 1 POST upsert = 6 subrequests.
        assert_eq!(budget.remaining(), 14);
    }
}
