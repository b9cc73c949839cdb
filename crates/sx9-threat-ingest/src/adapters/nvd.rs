//! NVD CVE feed — rolling 7-day publication window.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::adapters::{dedup_by_key, fetch_text, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::{FeedResult, Vulnerability};
use crate::normalize::severity_from_cvss;
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "nvd";
const BASE_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
const BATCH_SIZE: usize = 50;
const WINDOW_DAYS: i64 = 7;

#[derive(Debug, Deserialize)]
struct NvdDescription {
    lang: String,
    value: String,
}

#[derive(Debug, Deserialize, Default)]
struct NvdCvssData {
    #[serde(default, rename = "baseScore")]
    base_score: Option<f32>,
    #[serde(default, rename = "vectorString")]
    vector_string: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct NvdCvssMetric {
    #[serde(rename = "cvssData")]
    cvss_data: NvdCvssData,
}

#[derive(Debug, Deserialize, Default)]
struct NvdMetrics {
    #[serde(default, rename = "cvssMetricV31")]
    v31: Vec<NvdCvssMetric>,
    #[serde(default, rename = "cvssMetricV30")]
    v30: Vec<NvdCvssMetric>,
    #[serde(default, rename = "cvssMetricV2")]
    v2: Vec<NvdCvssMetric>,
}

#[derive(Debug, Deserialize, Default)]
struct NvdCpeMatch {
    criteria: String,
}

#[derive(Debug, Deserialize, Default)]
struct NvdNode {
    #[serde(default, rename = "cpeMatch")]
    cpe_match: Vec<NvdCpeMatch>,
}

#[derive(Debug, Deserialize, Default)]
struct NvdConfiguration {
    #[serde(default)]
    nodes: Vec<NvdNode>,
}

#[derive(Debug, Deserialize)]
struct NvdCve {
    id: String,
    #[serde(default)]
    descriptions: Vec<NvdDescription>,
    #[serde(default)]
    metrics: NvdMetrics,
    #[serde(default)]
    configurations: Vec<NvdConfiguration>,
}

#[derive(Debug, Deserialize)]
struct NvdVulnerability {
    cve: NvdCve,
}

#[derive(Debug, Deserialize, Default)]
struct NvdResponse {
    #[serde(default)]
    vulnerabilities: Vec<NvdVulnerability>,
}

pub async fn ingest(store: &StoreClient, budget: &Budget, config: &Config) -> FeedResult {
    let now = Utc::now();
    let start = now - ChronoDuration::days(WINDOW_DAYS);
    let url = format!(
        "{}?pubStartDate={}&pubEndDate={}",
        BASE_URL,
        start.format("%Y-%m-%dT%H:%M:%S.000"),
        now.format("%Y-%m-%dT%H:%M:%S.000"),
    );
    ingest_from(store, budget, config, &url).await
}

/// `cpe:2.3:a:vendor:product:version:...` → `(vendor, product)`.
fn vendor_product_from_cpe(criteria: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = criteria.split(':').collect();
    if parts.len() < 5 {
        return None;
    }
    Some((parts[3].to_string(), parts[4].to_string()))
}

fn cvss(metrics: &NvdMetrics) -> (Option<f32>, Option<String>) {
    if let Some(m) = metrics.v31.first() {
        return (m.cvss_data.base_score, m.cvss_data.vector_string.clone());
    }
    if let Some(m) = metrics.v30.first() {
        return (m.cvss_data.base_score, m.cvss_data.vector_string.clone());
    }
    if let Some(m) = metrics.v2.first() {
        return (m.cvss_data.base_score, m.cvss_data.vector_string.clone());
    }
    (None, None)
}

async fn ingest_from(store: &StoreClient, budget: &Budget, _config: &Config, url: &str) -> FeedResult {
    let client = http_client();
    let body = match fetch_text(&client, budget, SOURCE, url).await {
        Ok(body) => body,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let parsed: NvdResponse = match crate::parsers::json::decode(&body) {
        Ok(parsed) => parsed,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    if parsed.vulnerabilities.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let deduped = dedup_by_key(parsed.vulnerabilities, |entry| entry.cve.id.clone());

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|entry| {
                let description = entry
                    .cve
                    .descriptions
                    .iter()
                    .find(|d| d.lang == "en")
                    .map(|d| d.value.clone());
                let (score, vector) = cvss(&entry.cve.metrics);
                let severity = severity_from_cvss(score);
                let (vendor, product) = entry
                    .cve
                    .configurations
                    .iter()
                    .flat_map(|c| c.nodes.iter())
                    .flat_map(|n| n.cpe_match.iter())
                    .find_map(|m| vendor_product_from_cpe(&m.criteria))
                    .unwrap_or_default();
                Vulnerability {
                    cve_id: entry.cve.id.clone(),
                    description,
                    cvss_score: score,
                    cvss_vector: vector,
                    epss_score: None,
                    epss_percentile: None,
                    affected_vendors: if vendor.is_empty() { vec![] } else { vec![vendor] },
                    affected_products: if product.is_empty() { vec![] } else { vec![product] },
                    kev_date: None,
                    kev_due_date: None,
                    exploited_in_wild: false,
                    ransomware_campaign_use: false,
                    has_public_exploit: false,
                    source: SOURCE.to_string(),
                    metadata: json!({"severity": serde_json::to_value(severity).unwrap_or(json!("medium"))}),
                }
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
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn prefers_v31_cvss_and_extracts_cpe_vendor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vulnerabilities": [{
                    "cve": {
                        "id": "CVE-2024-9999",
                        "descriptions": [{"lang": "en", "value": "Heap overflow"}],
                        "metrics": {
                            "cvssMetricV31": [{"cvssData": {"baseScore": 9.8, "vectorString": "CVSS:3.1/..."}}],
                            "cvssMetricV2": [{"cvssData": {"baseScore": 5.0, "vectorString": "v2"}}]
                        },
                        "configurations": [{"nodes": [{"cpeMatch": [{"criteria": "cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*"}]}]}]
                    }
                }]
            })))
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
