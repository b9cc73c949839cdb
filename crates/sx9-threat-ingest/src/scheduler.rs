//! Cron-bucket dispatcher and the HTTP surface for manual invocation.
//!
//! `Dispatcher` holds the bucket → adapter-sequence table from spec.md
//! §4.5 verbatim and the axum router mirrors
//! `sx9-cdn-threat-intel::bin::threat_intel_server`'s route-building idiom.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::adapters;
use crate::budget::{Budget, DEFAULT_BUDGET};
use crate::config::Config;
use crate::models::{FeedResult, SyncStatus};
use crate::rest_client::StoreClient;
use crate::sync_log;

/// One entry in a bucket's adapter sequence: a stable name plus the
/// `ingest` function pointer, so the dispatcher can both run a whole
/// bucket and look an adapter up by name for `/ingest/<name>`.
type AdapterFn = for<'a> fn(
    &'a StoreClient,
    &'a Budget,
    &'a Config,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = FeedResult> + Send + 'a>>;

struct AdapterEntry {
    name: &'static str,
    run: AdapterFn,
}

macro_rules! adapter_entry {
    ($module:ident, $name:literal) => {
        AdapterEntry {
            name: $name,
            run: |store, budget, config| Box::pin(adapters::$module::ingest(store, budget, config)),
        }
    };
}

fn critical_bucket() -> Vec<AdapterEntry> {
    vec![
        adapter_entry!(ransomlook, "ransomlook"),
        adapter_entry!(threatfox, "threatfox"),
    ]
}

fn main_bucket() -> Vec<AdapterEntry> {
    vec![
        adapter_entry!(urlhaus, "urlhaus"),
        adapter_entry!(feodo, "feodo"),
        adapter_entry!(malware_bazaar, "malware_bazaar"),
        adapter_entry!(pulsedive, "pulsedive"),
        adapter_entry!(cisa_kev, "cisa_kev"),
        adapter_entry!(vulncheck_kev, "vulncheck_kev"),
        adapter_entry!(nvd, "nvd"),
    ]
}

fn daily_bucket() -> Vec<AdapterEntry> {
    vec![
        adapter_entry!(malpedia, "malpedia"),
        adapter_entry!(misp_galaxy, "misp_galaxy"),
        adapter_entry!(epss, "epss"),
        adapter_entry!(tor_exits, "tor_exits"),
        adapter_entry!(cisa_ics, "cisa_ics"),
        adapter_entry!(ransomwhere, "ransomwhere"),
        adapter_entry!(censys, "censys"),
        adapter_entry!(bgpstream, "bgpstream"),
        adapter_entry!(anyrun, "anyrun"),
    ]
}

fn weekly_bucket() -> Vec<AdapterEntry> {
    vec![
        adapter_entry!(mitre_attack, "mitre_attack"),
        adapter_entry!(mitre_atlas, "mitre_atlas"),
    ]
}

/// Cron key → (bucket name, adapter sequence). Matches spec.md §4.5
/// exactly; `main` additionally calls `apply_actor_trends` after its
/// adapters run.
fn bucket_for_cron(cron: &str) -> Option<(&'static str, Vec<AdapterEntry>)> {
    match cron {
        "15 * * * *" => Some(("critical", critical_bucket())),
        "0 */6 * * *" => Some(("main", main_bucket())),
        "0 3 * * *" => Some(("daily", daily_bucket())),
        "0 4 * * SUN" => Some(("weekly", weekly_bucket())),
        _ => None,
    }
}

fn bucket_for_name(name: &str) -> Option<(&'static str, Vec<AdapterEntry>)> {
    match name {
        "critical" => Some(("critical", critical_bucket())),
        "main" => Some(("main", main_bucket())),
        "daily" => Some(("daily", daily_bucket())),
        "weekly" => Some(("weekly", weekly_bucket())),
        _ => None,
    }
}

fn all_adapter_names() -> Vec<&'static str> {
    critical_bucket()
        .iter()
        .chain(main_bucket().iter())
        .chain(daily_bucket().iter())
        .chain(weekly_bucket().iter())
        .map(|entry| entry.name)
        .collect()
}

fn find_adapter(name: &str) -> Option<AdapterEntry> {
    critical_bucket()
        .into_iter()
        .chain(main_bucket())
        .chain(daily_bucket())
        .chain(weekly_bucket())
        .find(|entry| entry.name == name)
}

/// Runs adapter buckets and writes one `sync_log` row per invocation.
///
/// Holds only the store coordinates, not a built `StoreClient` — each
/// invocation constructs its own client from a fresh `Budget` so the
/// subrequest cap covers that invocation's store calls and adapter
/// fetches together (spec §4.2: one counter per invocation).
pub struct Dispatcher {
    config: Config,
}

impl Dispatcher {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn new_store(&self, budget: Arc<Budget>) -> StoreClient {
        StoreClient::new(self.config.supabase_url.clone(), self.config.supabase_key(), budget)
    }

    /// Run every adapter in the named bucket sequentially, aggregate the
    /// results, and write one `sync_log` row. Unknown bucket names are a
    /// no-op success (spec §4.5).
    pub async fn run_bucket(&self, bucket_name: &str) -> BTreeMap<String, FeedResult> {
        let Some((bucket_name, entries)) = bucket_for_name(bucket_name) else {
            tracing::warn!(bucket = bucket_name, "unknown bucket name; no-op");
            return BTreeMap::new();
        };
        self.run_entries(bucket_name, entries, None).await
    }

    /// Run whichever bucket `cron` maps to. Mirrors `run_bucket` but keys
    /// off the literal cron expression, the way a scheduled trigger would.
    pub async fn run_cron(&self, cron: &str) -> BTreeMap<String, FeedResult> {
        let Some((bucket_name, entries)) = bucket_for_cron(cron) else {
            tracing::warn!(cron, "unknown cron key; no-op success");
            return BTreeMap::new();
        };
        self.run_entries(bucket_name, entries, Some(cron)).await
    }

    /// Run a single adapter by name, outside of any bucket. Still writes a
    /// `sync_log` row so manual `/ingest/<name>` calls are auditable.
    pub async fn run_one(&self, name: &str) -> Option<FeedResult> {
        let entry = find_adapter(name)?;
        let budget = Arc::new(Budget::new(DEFAULT_BUDGET));
        let store = self.new_store(budget.clone());
        let started = Instant::now();
        let result = (entry.run)(&store, &budget, &self.config).await;

        let mut results = BTreeMap::new();
        results.insert(entry.name.to_string(), result.clone());
        let entry_row = sync_log::build_entry(
            "engine",
            SyncStatus::Success,
            name,
            started.elapsed().as_millis() as u64,
            &results,
        );
        sync_log::write(&store, &entry_row).await;

        Some(result)
    }

    async fn run_entries(
        &self,
        bucket_name: &str,
        entries: Vec<AdapterEntry>,
        cron: Option<&str>,
    ) -> BTreeMap<String, FeedResult> {
        let started = Instant::now();
        let budget = Arc::new(Budget::new(DEFAULT_BUDGET));
        let store = self.new_store(budget.clone());
        let mut results = BTreeMap::new();

        for entry in &entries {
            let result = (entry.run)(&store, &budget, &self.config).await;
            results.insert(entry.name.to_string(), result);
        }

        if bucket_name == "main" {
            if let Err(err) = store.rpc("apply_actor_trends", &json!({})).await {
                tracing::warn!(error = %err, "apply_actor_trends rpc failed after main bucket");
            }
        }

        let entry_row = sync_log::build_entry(
            "engine",
            SyncStatus::Success,
            cron.unwrap_or(bucket_name),
            started.elapsed().as_millis() as u64,
            &results,
        );
        sync_log::write(&store, &entry_row).await;

        results
    }
}

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    config: Arc<Config>,
}

/// Build the axum router exposed by the binary entry point.
pub fn router(dispatcher: Dispatcher, config: Config) -> Router {
    let state = AppState {
        dispatcher: Arc::new(dispatcher),
        config: Arc::new(config),
    };

    Router::new()
        .route("/health", get(health))
        .route("/", get(discovery))
        .route("/ingest/:target", get(ingest_target))
        .route("/debug/supabase", get(debug_supabase))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn discovery() -> impl IntoResponse {
    Json(json!({
        "buckets": ["critical", "main", "daily", "weekly"],
        "adapters": all_adapter_names(),
        "routes": [
            "GET /health",
            "GET /",
            "GET /ingest/:bucket",
            "GET /ingest/:name",
            "GET /debug/supabase",
        ],
    }))
}

/// `/ingest/:target` runs a bucket if `target` names one, otherwise falls
/// back to treating it as a single adapter name (spec §4.5: both
/// `/ingest/<bucket>` and `/ingest/<adapter>` are the same route family).
async fn ingest_target(State(state): State<AppState>, Path(target): Path<String>) -> impl IntoResponse {
    if matches!(target.as_str(), "critical" | "main" | "daily" | "weekly") {
        let results = state.dispatcher.run_bucket(&target).await;
        return Json(json!({ "bucket": target, "results": results })).into_response();
    }

    match state.dispatcher.run_one(&target).await {
        Some(result) => Json(json!({ "adapter": target, "result": result })).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": format!("unknown target: {target}") })))
            .into_response(),
    }
}

async fn debug_supabase(State(state): State<AppState>) -> impl IntoResponse {
    let budget = Arc::new(Budget::new(DEFAULT_BUDGET));
    let store = StoreClient::new(state.config.supabase_url.clone(), state.config.supabase_key(), budget);

    let probe = store.select("sync_log", "source").await;
    let probe_result: Value = match probe {
        Ok(rows) => json!({ "ok": true, "sample_rows": rows.len() }),
        Err(err) => json!({ "ok": false, "error": err.to_string() }),
    };

    Json(json!({
        "env": state.config.env_presence(),
        "probe": probe_result,
    }))
}
