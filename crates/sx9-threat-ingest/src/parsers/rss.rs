//! Tolerant RSS/XML `<item>` extractor.
//!
//! Real-world advisory feeds (CISA ICS) are not always well-formed XML;
//! this walks the raw text with regexes rather than a strict XML parser,
//! mirroring the tag-soup tolerance the destination feeds actually need.

use chrono::DateTime;
use regex::Regex;

/// One decoded `<item>` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RssItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub pub_date: Option<String>,
    pub guid: Option<String>,
}

fn item_regex() -> Regex {
    Regex::new(r"(?s)<item[^>]*>(.*?)</item>").expect("static regex is valid")
}

fn field_regex(tag: &str) -> Regex {
    Regex::new(&format!(r"(?si)<{tag}[^>]*>(.*?)</{tag}>")).expect("static regex is valid")
}

/// Extract every `<item>` block from an RSS/XML document.
pub fn extract_items(xml: &str) -> Vec<RssItem> {
    item_regex()
        .captures_iter(xml)
        .map(|caps| parse_item(&caps[1]))
        .collect()
}

fn parse_item(body: &str) -> RssItem {
    RssItem {
        title: extract_field(body, "title"),
        link: extract_field(body, "link"),
        description: extract_field(body, "description"),
        pub_date: extract_field(body, "pubDate"),
        guid: extract_field(body, "guid"),
    }
}

fn extract_field(body: &str, tag: &str) -> Option<String> {
    field_regex(tag)
        .captures(body)
        .map(|caps| clean(caps[1].trim()))
}

/// Strip CDATA wrappers, unescape the fixed HTML-entity set, and drop any
/// remaining tags.
fn clean(raw: &str) -> String {
    let without_cdata = strip_cdata(raw);
    let unescaped = unescape_entities(&without_cdata);
    strip_tags(&unescaped).trim().to_string()
}

fn strip_cdata(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
    {
        inner.to_string()
    } else {
        trimmed.to_string()
    }
}

fn unescape_entities(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

fn strip_tags(raw: &str) -> String {
    Regex::new(r"<[^>]+>")
        .expect("static regex is valid")
        .replace_all(raw, "")
        .to_string()
}

/// Parse an RSS `pubDate` (RFC 2822) or an ISO-8601 date, returning `None`
/// on any failure rather than an error — dates that fail to parse are
/// written as null, never propagated as a fault.
pub fn parse_date_permissive(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.to_rfc3339());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.to_rfc3339());
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_multiple_items() {
        let xml = r#"
            <rss><channel>
            <item><title>ICSA-24-001-01</title><link>https://a</link></item>
            <item><title>ICSA-24-002-01</title><link>https://b</link></item>
            </channel></rss>
        "#;
        let items = extract_items(xml);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title.as_deref(), Some("ICSA-24-001-01"));
        assert_eq!(items[1].link.as_deref(), Some("https://b"));
    }

    #[test]
    fn strips_cdata_and_entities() {
        let xml = r#"<item><description><![CDATA[Rockwell &amp; Co &lt;advisory&gt;]]></description></item>"#;
        let items = extract_items(xml);
        assert_eq!(
            items[0].description.as_deref(),
            Some("Rockwell & Co <advisory>")
        );
    }

    #[test]
    fn strips_nested_tags_after_unescape() {
        let xml = r#"<item><description>&lt;b&gt;bold&lt;/b&gt; text</description></item>"#;
        let items = extract_items(xml);
        assert_eq!(items[0].description.as_deref(), Some("bold text"));
    }

    #[test]
    fn missing_field_is_none() {
        let xml = r#"<item><title>Only title</title></item>"#;
        let items = extract_items(xml);
        assert_eq!(items[0].link, None);
    }

    #[test]
    fn date_parsing_is_permissive() {
        assert!(parse_date_permissive("Tue, 16 Jan 2024 00:00:00 +0000").is_some());
        assert!(parse_date_permissive("2024-01-16").is_some());
        assert_eq!(parse_date_permissive("not a date"), None);
        assert_eq!(parse_date_permissive(""), None);
    }
}
