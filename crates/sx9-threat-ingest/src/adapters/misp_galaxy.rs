//! MISP Galaxy threat-actor cluster (community-maintained GitHub JSON).
//!
//! Shaped like [`crate::adapters::malpedia`] — same normalization and
//! batching pattern, different upstream schema (`values[].value` /
//! `.meta.synonyms` / `.meta.country`).

use serde::Deserialize;
use serde_json::json;

use crate::adapters::{dedup_by_key, fetch_text, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::{ActorStatus, ActorType, FeedResult, ThreatActor};
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "misp-galaxy";
const URL: &str =
    "https://raw.githubusercontent.com/MISP/misp-galaxy/main/clusters/threat-actor.json";
const BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize, Default)]
struct GalaxyMeta {
    #[serde(default)]
    synonyms: Vec<String>,
    #[serde(default)]
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GalaxyCluster {
    value: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    meta: GalaxyMeta,
}

#[derive(Debug, Deserialize)]
struct GalaxyDocument {
    values: Vec<GalaxyCluster>,
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

    let document: GalaxyDocument = match crate::parsers::json::decode(&body) {
        Ok(document) => document,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    if document.values.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let deduped = dedup_by_key(document.values, |cluster| cluster.value.to_lowercase());

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|cluster| {
                ThreatActor {
                    name: cluster.value.clone(),
                    aliases: cluster.meta.synonyms.clone(),
                    actor_type: ActorType::Unknown,
                    status: ActorStatus::Active,
                    first_seen: None,
                    last_seen: None,
                    target_countries: cluster.meta.country.clone().into_iter().collect(),
                    target_sectors: Vec::new(),
                    description: cluster.description.clone(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn upserts_actors_with_synonyms_as_aliases() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [{"value": "APT28", "description": "Fancy Bear", "meta": {"synonyms": ["Fancy Bear", "Sofacy"], "country": "RU"}}]
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
