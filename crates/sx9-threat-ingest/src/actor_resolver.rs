//! Shared actor-name-to-id resolution used by incident adapters.
//!
//! Implements the three-call dance from spec §4.8: select all known
//! actors, batch-upsert the names that are missing, then re-select to
//! pick up ids PostgREST assigned. Acceptable for the small `N` these
//! adapters deal in; escalating to a batched "upsert returning id" RPC is
//! an open question left for the destination schema to offer (see
//! DESIGN.md).

use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::budget::Budget;
use crate::error::Result;
use crate::rest_client::{StoreClient, UpsertOptions};

/// Resolve `names` to stable actor ids, creating any missing actor with a
/// minimal ransomware-default record. Returns `None` for a name only if
/// the destination did not return an id for it even after the insert
/// (e.g. the insert itself failed).
pub async fn resolve(
    store: &StoreClient,
    _budget: &Budget,
    names: &[String],
) -> Result<HashMap<String, Option<Uuid>>> {
    let mut by_lower = select_all(store).await?;

    let missing: Vec<&String> = names
        .iter()
        .filter(|name| !by_lower.contains_key(&name.to_lowercase()))
        .collect();

    if !missing.is_empty() {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let records: Vec<_> = missing
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "actor_type": "ransomware",
                    "status": "active",
                    "source": "ransomlook",
                    "first_seen": today,
                })
            })
            .collect();

        store
            .upsert("threat_actors", &records, UpsertOptions::on_conflict("name").ignore_duplicates())
            .await?;

        by_lower = select_all(store).await?;
    }

    Ok(names
        .iter()
        .map(|name| (name.clone(), by_lower.get(&name.to_lowercase()).copied()))
        .collect())
}

async fn select_all(store: &StoreClient) -> Result<HashMap<String, Uuid>> {
    let rows = store.select("threat_actors", "id,name").await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let id = row.get("id")?.as_str().and_then(|s| Uuid::parse_str(s).ok())?;
            let name = row.get("name")?.as_str()?.to_lowercase();
            Some((name, id))
        })
        .collect())
}
