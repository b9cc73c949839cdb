//! CISA Industrial Control Systems advisories RSS feed.

use regex::Regex;
use serde_json::json;

use crate::adapters::{dedup_by_key, fetch_text, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::{FeedResult, IcsAdvisory, Severity};
use crate::parsers::rss::{self, RssItem};
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "cisa-ics";
const URL: &str = "https://www.cisa.gov/cybersecurity-advisories/ics-advisories.xml";
const BATCH_SIZE: usize = 50;

pub async fn ingest(store: &StoreClient, budget: &Budget, config: &Config) -> FeedResult {
    ingest_from(store, budget, config, URL).await
}

fn advisory_id_regex() -> Regex {
    Regex::new(r"(?i)(ICSA-\d{2}-\d{3}-\d{2})").expect("static regex is valid")
}

fn cve_regex() -> Regex {
    Regex::new(r"CVE-\d{4}-\d{4,}").expect("static regex is valid")
}

/// Synthesize an advisory id from the item's link/title, falling back to a
/// timestamp-indexed placeholder when no `ICSA-YY-DDD-NN` pattern is found
/// (spec §4.4 CISA ICS policy).
fn advisory_id(item: &RssItem, index: usize, fallback_ts: i64) -> String {
    let haystack = format!(
        "{} {}",
        item.link.as_deref().unwrap_or(""),
        item.title.as_deref().unwrap_or("")
    );
    advisory_id_regex()
        .captures(&haystack)
        .map(|caps| caps[1].to_uppercase())
        .unwrap_or_else(|| format!("ICS-{fallback_ts}-{index}"))
}

fn extract_cve_ids(item: &RssItem) -> Vec<String> {
    let haystack = format!(
        "{} {}",
        item.title.as_deref().unwrap_or(""),
        item.description.as_deref().unwrap_or("")
    );
    let re = cve_regex();
    let mut ids: Vec<String> = re.find_iter(&haystack).map(|m| m.as_str().to_string()).collect();
    ids.sort();
    ids.dedup();
    ids
}

async fn ingest_from(store: &StoreClient, budget: &Budget, _config: &Config, url: &str) -> FeedResult {
    let client = http_client();
    let body = match fetch_text(&client, budget, SOURCE, url).await {
        Ok(body) => body,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let items = rss::extract_items(&body);
    if items.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let fallback_ts = chrono::Utc::now().timestamp();
    let records_raw: Vec<_> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (advisory_id(item, i, fallback_ts), item))
        .collect();
    let deduped = dedup_by_key(records_raw, |(id, _)| id.clone());

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|(advisory_id, item)| {
                IcsAdvisory {
                    advisory_id: advisory_id.clone(),
                    title: item.title.clone().unwrap_or_default(),
                    description: item.description.clone(),
                    severity: Severity::High,
                    source_url: item.link.clone(),
                    published_date: item.pub_date.as_deref().and_then(rss::parse_date_permissive),
                    cve_ids: extract_cve_ids(item),
                    affected_products: Vec::new(),
                    affected_vendors: Vec::new(),
                    metadata: json!({}),
                }
            })
            .collect();

        match store
            .upsert("ics_advisories", &records, UpsertOptions::on_conflict("advisory_id"))
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
