//! Ransomwhere ransom-payment tracker.
//!
//! Clamps to the most recent 2000 payments, emits one `crypto_wallet` IOC
//! per distinct Bitcoin address, and separately aggregates per-family
//! totals into an optional `ransomware_payments` table (spec §4.4
//! Ransomwhere policy) — a missing table there downgrades gracefully.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;

use crate::adapters::{dedup_by_key, fetch_text, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::{Confidence, FeedResult, Ioc, IocType, RansomwarePaymentStats};
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "ransomwhere";
const URL: &str = "https://api.ransomwhe.re/export";
const MAX_PAYMENTS: usize = 2000;
const BATCH_SIZE: usize = 500;

#[derive(Debug, Deserialize, Clone)]
struct RansomPayment {
    address: String,
    #[serde(default)]
    family: Option<String>,
    #[serde(rename = "amount", default)]
    amount_usd: Option<f64>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RansomwhereResponse {
    result: Vec<RansomPayment>,
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

    let response: RansomwhereResponse = match crate::parsers::json::decode(&body) {
        Ok(response) => response,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    if response.result.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let mut payments = response.result;
    if payments.len() > MAX_PAYMENTS {
        payments.truncate(MAX_PAYMENTS);
    }

    let deduped = dedup_by_key(payments, |payment| payment.address.clone());

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|payment| {
                Ioc {
                    ioc_type: IocType::CryptoWallet,
                    value: payment.address.clone(),
                    confidence: Confidence::Medium,
                    source: SOURCE.to_string(),
                    malware_family: payment.family.clone(),
                    first_seen: payment.date.clone(),
                    last_seen: None,
                    source_url: None,
                    tags: vec!["ransomware".to_string()],
                    metadata: json!({"amount_usd": payment.amount_usd}),
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

    let mut family_totals: HashMap<String, (f64, u32)> = HashMap::new();
    for payment in &deduped {
        let family = payment.family.clone().unwrap_or_else(|| "unknown".to_string());
        let entry = family_totals.entry(family).or_insert((0.0, 0));
        entry.0 += payment.amount_usd.unwrap_or(0.0);
        entry.1 += 1;
    }

    let mut payments_table_skipped = false;
    if !family_totals.is_empty() {
        let records: Vec<_> = family_totals
            .iter()
            .map(|(family, (total, count))| RansomwarePaymentStats {
                family_name: family.clone(),
                total_paid_usd: *total,
                payment_count: *count,
            })
            .collect();

        match store
            .upsert(
                "ransomware_payments",
                &records,
                UpsertOptions::on_conflict("family_name"),
            )
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_missing_table() => {
                payments_table_skipped = true;
            }
            Err(err) => {
                last_error = Some(err.to_string());
            }
        }
    }

    let mut extra = HashMap::new();
    extra.insert("families_seen".to_string(), json!(family_totals.len()));
    extra.insert("payments_table_skipped".to_string(), json!(payments_table_skipped));
    extra.insert(
        "date_range_sample".to_string(),
        json!(deduped.first().and_then(|p| p.date.clone())),
    );

    FeedResult::Success {
        source: SOURCE.to_string(),
        updated,
        added: updated,
        failed,
        last_error,
        extra,
    }
}
