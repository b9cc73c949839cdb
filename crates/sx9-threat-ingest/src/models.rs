//! Canonical entity models.
//!
//! Closed, typed structs/enums rather than raw `serde_json::Value` — the
//! "dynamic shape of upstream payloads" redesign flag. Raw adapter
//! payloads are converted into these through [`crate::normalize`] before
//! ever reaching a [`crate::rest_client::StoreClient`] call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Actor taxonomy (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Ransomware,
    Apt,
    Cybercrime,
    Hacktivism,
    Iab,
    DataExtortion,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Claimed,
    Confirmed,
    Leaked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IocType {
    Ip,
    Domain,
    Url,
    HashMd5,
    HashSha1,
    HashSha256,
    Email,
    CryptoWallet,
    File,
    Registry,
    Unknown,
}

/// Confidence may arrive as a coarse label or a raw 0..100 score; adapters
/// pick whichever the source actually provides (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
    Numeric(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    Enterprise,
    Mobile,
    Ics,
    Atlas,
}

/// A reference to an external source record, embedded in `Technique`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalReference {
    pub source_name: String,
    pub external_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatActor {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub actor_type: ActorType,
    pub status: ActorStatus,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    #[serde(default)]
    pub target_countries: Vec<String>,
    #[serde(default)]
    pub target_sectors: Vec<String>,
    pub description: Option<String>,
    pub source: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub victim_name: String,
    pub actor_id: Option<Uuid>,
    pub source: String,
    pub incident_date: Option<String>,
    pub discovered_date: String,
    pub victim_sector: Option<String>,
    pub victim_country: Option<String>,
    pub status: IncidentStatus,
    pub raw_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub cve_id: String,
    pub description: Option<String>,
    pub cvss_score: Option<f32>,
    pub cvss_vector: Option<String>,
    pub epss_score: Option<f32>,
    pub epss_percentile: Option<f32>,
    #[serde(default)]
    pub affected_vendors: Vec<String>,
    #[serde(default)]
    pub affected_products: Vec<String>,
    pub kev_date: Option<String>,
    pub kev_due_date: Option<String>,
    pub exploited_in_wild: bool,
    pub ransomware_campaign_use: bool,
    pub has_public_exploit: bool,
    pub source: String,
    #[serde(default)]
    pub metadata: Value,
}

impl Vulnerability {
    /// `is_kev` is derived, never stored independently (spec §3).
    pub fn is_kev(&self) -> bool {
        self.kev_date.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ioc {
    #[serde(rename = "type")]
    pub ioc_type: IocType,
    pub value: String,
    pub confidence: Confidence,
    pub source: String,
    pub malware_family: Option<String>,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    pub source_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Technique {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub framework: Framework,
    #[serde(default)]
    pub tactics: Vec<String>,
    pub is_subtechnique: bool,
    pub parent_technique_id: Option<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub external_references: Vec<ExternalReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub campaign_id: String,
    pub name: String,
    pub description: Option<String>,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    #[serde(default)]
    pub attributed_actors: Vec<String>,
    pub source: String,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcsAdvisory {
    pub advisory_id: String,
    pub title: String,
    pub description: Option<String>,
    pub severity: Severity,
    pub source_url: Option<String>,
    pub published_date: Option<String>,
    #[serde(default)]
    pub cve_ids: Vec<String>,
    #[serde(default)]
    pub affected_products: Vec<String>,
    #[serde(default)]
    pub affected_vendors: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RansomwarePaymentStats {
    pub family_name: String,
    pub total_paid_usd: f64,
    pub payment_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Error,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub source: String,
    pub status: SyncStatus,
    pub completed_at: String,
    pub metadata: Value,
}

/// Per-adapter outcome. A tagged enum rather than a bag of optional
/// booleans (spec §9's "implicit secrets fallback" redesign flag) — call
/// sites match exhaustively instead of inspecting ad hoc flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FeedResult {
    Success {
        source: String,
        updated: u32,
        added: u32,
        failed: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_error: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        extra: HashMap<String, Value>,
    },
    Skipped {
        source: String,
    },
    Failed {
        source: String,
        error: String,
    },
    Partial {
        source: String,
        reason: String,
    },
}

impl FeedResult {
    pub fn source(&self) -> &str {
        match self {
            FeedResult::Success { source, .. }
            | FeedResult::Skipped { source }
            | FeedResult::Failed { source, .. }
            | FeedResult::Partial { source, .. } => source,
        }
    }

    /// Whether this result counts as "success" for sync-log purposes —
    /// every variant except `Failed` (spec §3 invariant 5: zero records
    /// is still a success).
    pub fn is_success(&self) -> bool {
        !matches!(self, FeedResult::Failed { .. })
    }

    pub fn success(source: impl Into<String>, updated: u32, added: u32, failed: u32) -> Self {
        FeedResult::Success {
            source: source.into(),
            updated,
            added,
            failed,
            last_error: None,
            extra: HashMap::new(),
        }
    }

    pub fn skipped(source: impl Into<String>) -> Self {
        FeedResult::Skipped {
            source: source.into(),
        }
    }

    pub fn failed(source: impl Into<String>, error: impl Into<String>) -> Self {
        FeedResult::Failed {
            source: source.into(),
            error: error.into(),
        }
    }

    pub fn partial(source: impl Into<String>, reason: impl Into<String>) -> Self {
        FeedResult::Partial {
            source: source.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_result_success_excludes_failed_only() {
        assert!(FeedResult::success("threatfox", 5, 2, 0).is_success());
        assert!(FeedResult::skipped("pulsedive").is_success());
        assert!(FeedResult::partial("censys", "budget").is_success());
        assert!(!FeedResult::failed("urlhaus", "503").is_success());
    }

    #[test]
    fn vulnerability_is_kev_derived_from_kev_date() {
        let mut vuln = Vulnerability {
            cve_id: "CVE-2024-1234".to_string(),
            description: None,
            cvss_score: None,
            cvss_vector: None,
            epss_score: None,
            epss_percentile: None,
            affected_vendors: vec![],
            affected_products: vec![],
            kev_date: None,
            kev_due_date: None,
            exploited_in_wild: false,
            ransomware_campaign_use: false,
            has_public_exploit: false,
            source: "nvd".to_string(),
            metadata: Value::Null,
        };
        assert!(!vuln.is_kev());
        vuln.kev_date = Some("2024-01-01".to_string());
        assert!(vuln.is_kev());
    }

    #[test]
    fn feed_result_serializes_with_outcome_tag() {
        let result = FeedResult::success("threatfox", 3, 1, 0);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["updated"], 3);
    }
}
