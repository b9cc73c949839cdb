//! Pure normalization helpers shared by every adapter.
//!
//! No I/O, no adapter-specific state — just deterministic mappings from
//! raw source vocabulary to the canonical types in [`crate::models`].

use crate::models::{Confidence, IocType, Severity};

/// `null→medium; ≥9→critical; ≥7→high; ≥4→medium; else low`.
pub fn severity_from_cvss(score: Option<f32>) -> Severity {
    match score {
        None => Severity::Medium,
        Some(s) if s >= 9.0 => Severity::Critical,
        Some(s) if s >= 7.0 => Severity::High,
        Some(s) if s >= 4.0 => Severity::Medium,
        Some(_) => Severity::Low,
    }
}

/// ThreatFox `ioc_type` vocabulary.
pub fn ioc_type_from_threatfox(raw: &str) -> IocType {
    match raw {
        "ip:port" => IocType::Ip,
        "md5_hash" => IocType::HashMd5,
        "sha256_hash" => IocType::HashSha256,
        "sha1_hash" => IocType::HashSha1,
        "domain" => IocType::Domain,
        "url" => IocType::Url,
        _ => IocType::Unknown,
    }
}

/// Pulsedive `type` vocabulary.
pub fn ioc_type_from_pulsedive(raw: &str) -> IocType {
    match raw {
        "ip" | "ipv6" => IocType::Ip,
        "domain" => IocType::Domain,
        "url" => IocType::Url,
        "hash" => IocType::HashSha256,
        _ => IocType::Unknown,
    }
}

/// `≥75→high; ≥50→medium; else low`.
pub fn confidence_from_numeric(n: u8) -> Confidence {
    if n >= 75 {
        Confidence::High
    } else if n >= 50 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

const SECTOR_KEYWORDS: &[&str] = &[
    "healthcare",
    "finance",
    "education",
    "government",
    "manufacturing",
    "technology",
    "retail",
    "energy",
];

/// Case-insensitive keyword scan of a victim name against the fixed
/// sector dictionary. Returns `None` when nothing matches.
pub fn infer_sector(victim_name: &str) -> Option<&'static str> {
    let lower = victim_name.to_lowercase();
    SECTOR_KEYWORDS.iter().find(|kw| lower.contains(*kw)).copied()
}

/// `32→md5, 40→sha1, 64→sha256, else md5`.
pub fn hash_type_from_length(value: &str) -> IocType {
    match value.trim().len() {
        32 => IocType::HashMd5,
        40 => IocType::HashSha1,
        64 => IocType::HashSha256,
        _ => IocType::HashMd5,
    }
}

/// Canonical IOC type → STIX `indicator-type` vocabulary term.
pub fn map_ioc_type_to_stix(ioc_type: IocType) -> &'static str {
    match ioc_type {
        IocType::Ip => "ipv4-addr",
        IocType::Domain => "domain-name",
        IocType::Url => "url",
        IocType::HashMd5 | IocType::HashSha1 | IocType::HashSha256 => "file",
        IocType::Email => "email-addr",
        IocType::CryptoWallet => "cryptocurrency-wallet",
        IocType::File => "file",
        IocType::Registry => "windows-registry-key",
        IocType::Unknown => "unknown",
    }
}

/// Canonical IOC type → Microsoft Sentinel indicator-type vocabulary term.
pub fn map_ioc_type_to_sentinel(ioc_type: IocType) -> &'static str {
    match ioc_type {
        IocType::Ip => "ipAddress",
        IocType::Domain => "domainName",
        IocType::Url => "url",
        IocType::HashMd5 | IocType::HashSha1 | IocType::HashSha256 => "fileHash",
        IocType::Email => "emailAddress",
        IocType::CryptoWallet => "cryptocurrency",
        IocType::File => "fileHash",
        IocType::Registry => "registryKey",
        IocType::Unknown => "unknown",
    }
}

/// Build a STIX pattern string for an IOC of the given type and value.
pub fn get_stix_pattern(ioc_type: IocType, value: &str) -> String {
    match ioc_type {
        IocType::Ip => format!("[ipv4-addr:value = '{value}']"),
        IocType::Domain => format!("[domain-name:value = '{value}']"),
        IocType::Url => format!("[url:value = '{value}']"),
        IocType::HashMd5 => format!("[file:hashes.MD5 = '{value}']"),
        IocType::HashSha1 => format!("[file:hashes.'SHA-1' = '{value}']"),
        IocType::HashSha256 => format!("[file:hashes.'SHA-256' = '{value}']"),
        IocType::Email => format!("[email-addr:value = '{value}']"),
        IocType::CryptoWallet => format!("[x-crypto-wallet:value = '{value}']"),
        IocType::File => format!("[file:name = '{value}']"),
        IocType::Registry => format!("[windows-registry-key:key = '{value}']"),
        IocType::Unknown => format!("[x-unknown:value = '{value}']"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_thresholds() {
        assert_eq!(severity_from_cvss(None), Severity::Medium);
        assert_eq!(severity_from_cvss(Some(9.8)), Severity::Critical);
        assert_eq!(severity_from_cvss(Some(7.0)), Severity::High);
        assert_eq!(severity_from_cvss(Some(4.0)), Severity::Medium);
        assert_eq!(severity_from_cvss(Some(1.0)), Severity::Low);
    }

    #[test]
    fn threatfox_ioc_type_lookup() {
        assert_eq!(ioc_type_from_threatfox("ip:port"), IocType::Ip);
        assert_eq!(ioc_type_from_threatfox("sha256_hash"), IocType::HashSha256);
        assert_eq!(ioc_type_from_threatfox("bogus"), IocType::Unknown);
    }

    #[test]
    fn pulsedive_ioc_type_lookup() {
        assert_eq!(ioc_type_from_pulsedive("ipv6"), IocType::Ip);
        assert_eq!(ioc_type_from_pulsedive("hash"), IocType::HashSha256);
    }

    #[test]
    fn confidence_thresholds() {
        assert_eq!(confidence_from_numeric(90), Confidence::High);
        assert_eq!(confidence_from_numeric(60), Confidence::Medium);
        assert_eq!(confidence_from_numeric(10), Confidence::Low);
    }

    #[test]
    fn sector_inference_is_case_insensitive() {
        assert_eq!(infer_sector("Acme HEALTHCARE Group"), Some("healthcare"));
        assert_eq!(infer_sector("Unrelated Co"), None);
    }

    #[test]
    fn hash_type_by_length() {
        assert_eq!(hash_type_from_length(&"a".repeat(32)), IocType::HashMd5);
        assert_eq!(hash_type_from_length(&"a".repeat(40)), IocType::HashSha1);
        assert_eq!(hash_type_from_length(&"a".repeat(64)), IocType::HashSha256);
        assert_eq!(hash_type_from_length("short"), IocType::HashMd5);
    }

    #[test]
    fn stix_pattern_for_ip() {
        assert_eq!(get_stix_pattern(IocType::Ip, "1.2.3.4"), "[ipv4-addr:value = '1.2.3.4']");
    }
}
