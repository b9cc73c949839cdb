//! Ransomlook recent-posts feed — ransomware leak-site incidents.

use serde::Deserialize;
use serde_json::json;

use crate::actor_resolver;
use crate::adapters::{fetch_text, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::{FeedResult, Incident, IncidentStatus};
use crate::parsers::json::decode;
use crate::rest_client::StoreClient;

const SOURCE: &str = "ransomlook";
const URL: &str = "https://www.ransomlook.io/api/recent";
const BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct RansomlookPost {
    post_title: String,
    group_name: String,
    discovered: String,
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

    let posts: Vec<RansomlookPost> = match decode(&body) {
        Ok(posts) => posts,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    if posts.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let group_names: Vec<String> = posts
        .iter()
        .map(|post| post.group_name.clone())
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();

    let resolved = match actor_resolver::resolve(store, budget, &group_names).await {
        Ok(resolved) => resolved,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in posts.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|post| {
                let discovered_date = post
                    .discovered
                    .split_whitespace()
                    .next()
                    .unwrap_or(&post.discovered)
                    .to_string();
                let actor_id = resolved.get(&post.group_name).copied().flatten();
                Incident {
                    victim_name: post.post_title.clone(),
                    actor_id,
                    source: SOURCE.to_string(),
                    incident_date: Some(discovered_date.clone()),
                    discovered_date,
                    victim_sector: None,
                    victim_country: None,
                    status: IncidentStatus::Claimed,
                    raw_data: json!({
                        "post_title": post.post_title,
                        "group_name": post.group_name,
                        "discovered": post.discovered,
                    }),
                }
            })
            .collect();

        match store.insert("incidents", &records).await {
            Ok(()) => updated += records.len() as u32,
            Err(err) => {
                failed += records.len() as u32;
                last_error = Some(err.to_string());
            }
        }
    }

    if let Err(err) = store.rpc("apply_actor_trends", &json!({})).await {
        tracing::warn!(error = %err, "apply_actor_trends rpc failed");
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
