//! One module per external source, each exposing
//! `pub async fn ingest(store, budget, config) -> FeedResult` (spec §4.4).
//!
//! This module holds what every adapter shares: a budgeted HTTP fetch
//! helper and a within-batch dedup-by-key helper. Adapters never panic;
//! every fallible step folds into a `FeedResult` variant.

use std::collections::HashSet;
use std::hash::Hash;
use std::time::Duration;

use reqwest::Client;

use crate::budget::{Budget, BudgetOutcome};
use crate::error::{IngestError, Result};
use crate::rest_client::USER_AGENT;

pub mod anyrun;
pub mod bgpstream;
pub mod censys;
pub mod cisa_ics;
pub mod cisa_kev;
pub mod epss;
pub mod feodo;
pub mod malpedia;
pub mod malware_bazaar;
pub mod misp_galaxy;
pub mod mitre_atlas;
pub mod mitre_attack;
pub mod nvd;
pub mod pulsedive;
pub mod ransomlook;
pub mod ransomwhere;
pub mod threatfox;
pub mod tor_exits;
pub mod urlhaus;
pub mod vulncheck_kev;

/// Shared client used by every adapter's source fetch. Built once per
/// `ingest()` call rather than pooled across invocations, matching the
/// per-invocation lifetime of everything else in the engine.
pub fn http_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}

/// Take one tick off `budget` and GET `url`, returning the raw body text.
/// Non-2xx responses are folded into `IngestError::Source` carrying the
/// adapter name so the caller can report `FeedResult::Failed`.
pub async fn fetch_text(client: &Client, budget: &Budget, source_name: &str, url: &str) -> Result<String> {
    take_or_exhausted(budget)?;
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(IngestError::Source {
            source_name: source_name.to_string(),
            status,
            body,
        });
    }
    Ok(response.text().await?)
}

/// Same as [`fetch_text`] but with an extra header (e.g. `Auth-Key`,
/// `Authorization: Bearer ...`).
pub async fn fetch_text_with_header(
    client: &Client,
    budget: &Budget,
    source_name: &str,
    url: &str,
    header_name: &str,
    header_value: &str,
) -> Result<String> {
    take_or_exhausted(budget)?;
    let response = client.get(url).header(header_name, header_value).send().await?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(IngestError::Source {
            source_name: source_name.to_string(),
            status,
            body,
        });
    }
    Ok(response.text().await?)
}

fn take_or_exhausted(budget: &Budget) -> Result<()> {
    match budget.take(1) {
        BudgetOutcome::Ok => Ok(()),
        BudgetOutcome::Exhausted => Err(IngestError::BudgetExhausted),
    }
}

/// Remove records sharing a natural key within one batch, keeping the
/// first occurrence (spec §8 P10: no upsert batch may contain two records
/// sharing the declared natural key).
pub fn dedup_by_key<T, K, F>(records: Vec<T>, key_fn: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(key_fn(record)))
        .collect()
}
