//! Single-table append of per-invocation result summaries.

use serde_json::json;

use crate::models::{FeedResult, SyncLogEntry, SyncStatus};
use crate::rest_client::StoreClient;

/// Build the `sync_log` row for one dispatcher invocation (spec §6's
/// `{cron, duration_ms, results}` metadata shape). `status` reflects
/// whether the dispatcher itself completed cleanly — per-adapter
/// failures are carried in `results`, not folded into this status (spec
/// §4.5: the dispatcher writes `success` on clean completion, `error`
/// only if the dispatcher itself raised).
pub fn build_entry(
    source: &str,
    status: SyncStatus,
    cron: &str,
    duration_ms: u64,
    results: &std::collections::BTreeMap<String, FeedResult>,
) -> SyncLogEntry {
    SyncLogEntry {
        source: source.to_string(),
        status,
        completed_at: chrono::Utc::now().to_rfc3339(),
        metadata: json!({
            "cron": cron,
            "duration_ms": duration_ms,
            "results": results,
        }),
    }
}

/// Write one `sync_log` row. One subrequest; failures are logged and
/// swallowed, never propagated (spec §7 propagation policy).
pub async fn write(store: &StoreClient, entry: &SyncLogEntry) {
    if let Err(err) = store.insert("sync_log", std::slice::from_ref(entry)).await {
        tracing::warn!(error = %err, "failed to write sync_log entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn clean_completion_is_success_even_with_adapter_failures() {
        let mut results = BTreeMap::new();
        results.insert("threatfox".to_string(), FeedResult::success("threatfox", 1, 0, 0));
        results.insert("urlhaus".to_string(), FeedResult::failed("urlhaus", "503"));
        let entry = build_entry("engine", SyncStatus::Success, "0 */6 * * *", 1200, &results);
        assert!(matches!(entry.status, SyncStatus::Success));
        assert_eq!(entry.metadata["results"]["urlhaus"]["outcome"], "failed");
    }

    #[test]
    fn dispatcher_panic_is_error_status() {
        let results = BTreeMap::new();
        let entry = build_entry("engine", SyncStatus::Error, "0 */6 * * *", 500, &results);
        assert!(matches!(entry.status, SyncStatus::Error));
    }
}
