//! Tolerant HTML extractor for the AnyRun malware-trends page.
//!
//! Scraping a third party's HTML is treated as an expected fault, not a
//! workaround — this is the design (spec.md §9 "HTML scraping
//! fragility"). The fallback chain and the static baseline are the
//! contract: JSON-LD → `data-family` attributes → fixed keyword scan →
//! static baseline.

use regex::Regex;
use serde_json::Value;

/// Canonical baseline, returned verbatim when every scrape strategy
/// yields nothing (spec.md §6).
pub const BASELINE_FAMILIES: &[&str] = &[
    "AsyncRAT",
    "Remcos",
    "AgentTesla",
    "FormBook",
    "RedLine",
    "Lumma",
    "XWorm",
    "SmokeLoader",
    "Amadey",
    "DarkGate",
    "Vidar",
    "Stealc",
    "PikaBot",
    "GuLoader",
    "Cobalt Strike",
];

const KNOWN_KEYWORDS: &[&str] = &[
    "AsyncRAT",
    "Remcos",
    "AgentTesla",
    "FormBook",
    "RedLine",
    "Lumma",
    "XWorm",
    "SmokeLoader",
    "Amadey",
    "DarkGate",
    "Vidar",
    "Stealc",
    "PikaBot",
    "GuLoader",
    "Cobalt Strike",
    "Raccoon",
    "njRAT",
    "QakBot",
    "IcedID",
    "Emotet",
    "TrickBot",
    "Ursnif",
    "Gootkit",
    "Mirai",
];

/// Extraction result, tagged by which strategy produced it so the
/// adapter can tell a genuine scrape from the fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyRunExtraction {
    JsonLd(Vec<String>),
    DataAttribute(Vec<String>),
    KeywordScan(Vec<String>),
    Baseline,
}

impl AnyRunExtraction {
    pub fn families(&self) -> Vec<String> {
        match self {
            AnyRunExtraction::JsonLd(f)
            | AnyRunExtraction::DataAttribute(f)
            | AnyRunExtraction::KeywordScan(f) => f.clone(),
            AnyRunExtraction::Baseline => BASELINE_FAMILIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Run the ordered fallback chain against a trends page body.
pub fn extract(html: &str) -> AnyRunExtraction {
    if let Some(families) = extract_json_ld(html) {
        if !families.is_empty() {
            return AnyRunExtraction::JsonLd(families);
        }
    }
    let data_attrs = extract_data_attributes(html);
    if !data_attrs.is_empty() {
        return AnyRunExtraction::DataAttribute(data_attrs);
    }
    let keywords = extract_keywords(html);
    if !keywords.is_empty() {
        return AnyRunExtraction::KeywordScan(keywords);
    }
    AnyRunExtraction::Baseline
}

fn extract_json_ld(html: &str) -> Option<Vec<String>> {
    let script_re = Regex::new(r"(?is)<script[^>]*type=['\x22]application/ld\+json['\x22][^>]*>(.*?)</script>")
        .expect("static regex is valid");
    let mut families = Vec::new();
    for caps in script_re.captures_iter(html) {
        let value: Value = serde_json::from_str(caps[1].trim()).ok()?;
        collect_item_list(&value, &mut families);
    }
    Some(families)
}

fn collect_item_list(value: &Value, out: &mut Vec<String>) {
    if let Some(items) = value.get("itemListElement").and_then(Value::as_array) {
        for item in items {
            let name = item
                .get("name")
                .or_else(|| item.get("item").and_then(|i| i.get("name")))
                .and_then(Value::as_str);
            if let Some(name) = name {
                out.push(name.to_string());
            }
        }
    }
}

fn extract_data_attributes(html: &str) -> Vec<String> {
    let re = Regex::new(r#"(?i)data-family=["']([^"']+)["']"#).expect("static regex is valid");
    let mut seen = Vec::new();
    for caps in re.captures_iter(html) {
        let name = caps[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

fn extract_keywords(html: &str) -> Vec<String> {
    let lower = html.to_lowercase();
    KNOWN_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(&kw.to_lowercase()))
        .map(|kw| kw.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_json_ld_when_present() {
        let html = r#"
            <script type="application/ld+json">
            {"itemListElement":[{"name":"RedLine"},{"item":{"name":"Vidar"}}]}
            </script>
            <div data-family="Unused"></div>
        "#;
        let result = extract(html);
        assert_eq!(
            result,
            AnyRunExtraction::JsonLd(vec!["RedLine".to_string(), "Vidar".to_string()])
        );
    }

    #[test]
    fn falls_back_to_data_attributes() {
        let html = r#"<div data-family="FormBook"></div><div data-family="Stealc"></div>"#;
        let result = extract(html);
        assert_eq!(
            result,
            AnyRunExtraction::DataAttribute(vec!["FormBook".to_string(), "Stealc".to_string()])
        );
    }

    #[test]
    fn falls_back_to_keyword_scan() {
        let html = "<p>Our telemetry observed AsyncRAT spiking this week.</p>";
        let result = extract(html);
        assert_eq!(result, AnyRunExtraction::KeywordScan(vec!["AsyncRAT".to_string()]));
    }

    #[test]
    fn falls_back_to_baseline_when_nothing_matches() {
        let html = "<p>Nothing relevant here.</p>";
        let result = extract(html);
        assert_eq!(result, AnyRunExtraction::Baseline);
        assert_eq!(result.families().len(), 15);
    }
}
