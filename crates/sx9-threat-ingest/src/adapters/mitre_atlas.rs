//! MITRE ATLAS — AI/ML adversarial-techniques matrix (YAML distribution).

use serde_json::json;

use crate::adapters::{dedup_by_key, fetch_text, http_client};
use crate::budget::Budget;
use crate::config::Config;
use crate::models::{ExternalReference, FeedResult, Framework, Technique};
use crate::parsers::yaml_atlas;
use crate::rest_client::{StoreClient, UpsertOptions};

const SOURCE: &str = "mitre-atlas";
const URL: &str = "https://raw.githubusercontent.com/mitre-atlas/atlas-data/main/dist/ATLAS.yaml";
const CASE_STUDIES_URL: &str = "https://raw.githubusercontent.com/mitre-atlas/atlas-data/main/dist/case-studies.yaml";
const BATCH_SIZE: usize = 100;

pub async fn ingest(store: &StoreClient, budget: &Budget, config: &Config) -> FeedResult {
    ingest_from(store, budget, config, URL, CASE_STUDIES_URL).await
}

async fn ingest_from(
    store: &StoreClient,
    budget: &Budget,
    _config: &Config,
    url: &str,
    case_studies_url: &str,
) -> FeedResult {
    let client = http_client();
    let body = match fetch_text(&client, budget, SOURCE, url).await {
        Ok(body) => body,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    let doc = match yaml_atlas::parse(&body) {
        Ok(doc) => doc,
        Err(err) => return FeedResult::failed(SOURCE, err.to_string()),
    };

    if doc.techniques.is_empty() {
        return FeedResult::skipped(SOURCE);
    }

    let deduped = dedup_by_key(doc.techniques, |t| t.id.clone());

    let mut updated = 0u32;
    let mut failed = 0u32;
    let mut last_error = None;

    for chunk in deduped.chunks(BATCH_SIZE) {
        let records: Vec<_> = chunk
            .iter()
            .map(|technique| Technique {
                id: technique.id.clone(),
                name: technique.name.clone(),
                description: None,
                framework: Framework::Atlas,
                tactics: technique.tactics.clone(),
                is_subtechnique: technique.subtechnique_of.is_some(),
                parent_technique_id: technique.subtechnique_of.clone(),
                platforms: Vec::new(),
                external_references: technique
                    .attack_reference
                    .as_ref()
                    .map(|id| {
                        vec![ExternalReference {
                            source_name: "mitre-attack".to_string(),
                            external_id: id.clone(),
                            url: None,
                        }]
                    })
                    .unwrap_or_default(),
            })
            .collect();

        match store
            .upsert("techniques", &records, UpsertOptions::on_conflict("id"))
            .await
        {
            Ok(()) => updated += records.len() as u32,
            Err(err) => {
                failed += records.len() as u32;
                last_error = Some(err.to_string());
            }
        }
    }

    let mut case_studies_skipped = false;
    if let Ok(case_studies_body) = fetch_text(&client, budget, SOURCE, case_studies_url).await {
        if let Ok(case_studies) = crate::parsers::json::decode::<Vec<serde_json::Value>>(&case_studies_body) {
            if !case_studies.is_empty() {
                match store.insert("atlas_case_studies", &case_studies).await {
                    Ok(()) => {}
                    Err(err) if err.is_missing_table() => {
                        case_studies_skipped = true;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "atlas case-studies insert failed");
                    }
                }
            }
        }
    }

    let mut extra = std::collections::HashMap::new();
    extra.insert("tactics_seen".to_string(), json!(doc.tactics.len()));
    extra.insert("case_studies_skipped".to_string(), json!(case_studies_skipped));

    FeedResult::Success {
        source: SOURCE.to_string(),
        updated,
        added: updated,
        failed,
        last_error,
        extra,
    }
}
