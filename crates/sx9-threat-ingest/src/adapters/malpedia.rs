//! Malpedia actor list. Malware-family ingestion is deliberately skipped
//! (spec §4.4 Malpedia policy) — only `threat_actors` rows are written.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapters::{dedup_by_key, fetch_text, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::{ActorStatus, ActorType, FeedResult, ThreatActor};
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "malpedia";
const URL: &str = "https://malpedia.caad.fkie.fraunhofer.de/api/list/actors";
const BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct MalpediaActor {
    name: String,
    #[serde(default)]
    description: Option<String>,
    /// Upstream is inconsistent: sometimes a single country code,
    /// sometimes a list (spec §9 "dynamic shape of upstream payloads").
    #[serde(default)]
    country: Option<Value>,
}

/// Normalize the country field's permissive shape into a list.
fn countries(value: &Option<Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => Vec::new(),
    }
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

    let actors: Vec<MalpediaActor> = match crate::parsers::json::decode(&body) {
        Ok(actors) => actors,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    if actors.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let deduped = dedup_by_key(actors, |actor| actor.name.to_lowercase());

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|actor| {
                ThreatActor {
                    name: actor.name.clone(),
                    aliases: Vec::new(),
                    actor_type: ActorType::Unknown,
                    status: ActorStatus::Active,
                    first_seen: None,
                    last_seen: None,
                    target_countries: countries(&actor.country),
                    target_sectors: Vec::new(),
                    description: actor.description.clone(),
                    source: SOURCE.to_string(),
                    metadata: json!({}),
                }
            })
            .collect();

        match store
            .upsert("threat_actors", &records, UpsertOptions::on_conflict("name"))
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
