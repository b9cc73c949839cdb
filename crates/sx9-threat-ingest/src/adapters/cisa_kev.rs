//! CISA Known Exploited Vulnerabilities catalog.

use serde::Deserialize;
use serde_json::json;

use crate::adapters::{dedup_by_key, fetch_text, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::{FeedResult, Vulnerability};
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "cisa-kev";
const URL: &str = "https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json";
const BATCH_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct KevEntry {
    #[serde(rename = "cveID")]
    cve_id: String,
    #[serde(rename = "vendorProject")]
    vendor_project: String,
    product: String,
    #[serde(rename = "dateAdded")]
    date_added: String,
    #[serde(rename = "knownRansomwareCampaignUse")]
    known_ransomware_campaign_use: Option<String>,
    #[serde(rename = "shortDescription")]
    short_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KevCatalog {
    vulnerabilities: Option<Vec<KevEntry>>,
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

    let catalog: KevCatalog = match crate::parsers::json::decode(&body) {
        Ok(catalog) => catalog,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let entries = catalog.vulnerabilities.unwrap_or_default();
    if entries.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let deduped = dedup_by_key(entries, |entry| entry.cve_id.clone());

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|entry| {
                let ransomware_use =
                    entry.known_ransomware_campaign_use.as_deref() == Some("Known");
                Vulnerability {
                    cve_id: entry.cve_id.clone(),
                    description: entry.short_description.clone(),
                    cvss_score: None,
                    cvss_vector: None,
                    epss_score: None,
                    epss_percentile: None,
                    affected_vendors: vec![entry.vendor_project.clone()],
                    affected_products: vec![entry.product.clone()],
                    kev_date: Some(entry.date_added.clone()),
                    kev_due_date: None,
                    exploited_in_wild: true,
                    ransomware_campaign_use: ransomware_use,
                    has_public_exploit: false,
                    source: SOURCE.to_string(),
                    metadata: json!({}),
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
