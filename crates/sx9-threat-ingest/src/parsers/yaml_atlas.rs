//! MITRE ATLAS YAML extractor.
//!
//! Decodes the ATLAS distribution YAML into a `serde_yaml::Value` and
//! walks it structurally, the way
//! `sx9-cdn-threat-intel::yaml_to_threat_intel` decodes YAML into a
//! `serde_json::Value` before pulling out the fields it needs — rather
//! than hand-rolling indentation tracking, which buys nothing once a
//! real YAML parser is on the dependency graph.

use serde_yaml::Value;

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasDocument {
    pub id: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub tactics: Vec<AtlasTactic>,
    pub techniques: Vec<AtlasTechnique>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasTactic {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasTechnique {
    pub id: String,
    pub name: String,
    pub tactics: Vec<String>,
    pub subtechnique_of: Option<String>,
    pub attack_reference: Option<String>,
    pub created_date: Option<String>,
    pub modified_date: Option<String>,
}

fn str_field(map: &Value, key: &str) -> Option<String> {
    map.get(key)?.as_str().map(str::to_string)
}

/// Parse the ATLAS YAML distribution. Only the top-level scalars and the
/// first matrix's `tactics`/`techniques` arrays are extracted — everything
/// else in the distribution is out of contract.
pub fn parse(yaml: &str) -> Result<AtlasDocument> {
    let root: Value = serde_yaml::from_str(yaml)?;

    let id = str_field(&root, "id");
    let name = str_field(&root, "name");
    let version = str_field(&root, "version");

    let matrix = root
        .get("matrices")
        .and_then(Value::as_sequence)
        .and_then(|seq| seq.first())
        .ok_or_else(|| IngestError::Parse("ATLAS YAML missing matrices[0]".to_string()))?;

    let tactics = matrix
        .get("tactics")
        .and_then(Value::as_sequence)
        .map(|seq| seq.iter().filter_map(parse_tactic).collect())
        .unwrap_or_default();

    let techniques = matrix
        .get("techniques")
        .and_then(Value::as_sequence)
        .map(|seq| seq.iter().filter_map(parse_technique).collect())
        .unwrap_or_default();

    Ok(AtlasDocument {
        id,
        name,
        version,
        tactics,
        techniques,
    })
}

fn parse_tactic(entry: &Value) -> Option<AtlasTactic> {
    Some(AtlasTactic {
        id: str_field(entry, "id")?,
        name: str_field(entry, "name")?,
    })
}

fn parse_technique(entry: &Value) -> Option<AtlasTechnique> {
    let id = str_field(entry, "id")?;
    let name = str_field(entry, "name")?;
    let tactics = entry
        .get("tactics")
        .and_then(Value::as_sequence)
        .map(|seq| seq.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    Some(AtlasTechnique {
        id,
        name,
        tactics,
        subtechnique_of: str_field(entry, "subtechnique-of"),
        attack_reference: str_field(entry, "ATT&CK-reference"),
        created_date: str_field(entry, "created_date"),
        modified_date: str_field(entry, "modified_date"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
id: ATLAS
name: MITRE ATLAS
version: "4.5.0"
matrices:
  - id: ATLAS-matrix
    tactics:
      - id: AML.TA0000
        name: Reconnaissance
    techniques:
      - id: AML.T0000
        name: Search for Victim's Publicly Available Research
        tactics:
          - AML.TA0000
        created_date: "2021-05-13"
        modified_date: "2023-01-01"
      - id: AML.T0000.000
        name: A subtechnique
        subtechnique-of: AML.T0000
        ATT&CK-reference: T1593
"#;

    #[test]
    fn parses_top_level_scalars() {
        let doc = parse(SAMPLE).unwrap();
        assert_eq!(doc.id.as_deref(), Some("ATLAS"));
        assert_eq!(doc.version.as_deref(), Some("4.5.0"));
    }

    #[test]
    fn parses_tactics_and_techniques() {
        let doc = parse(SAMPLE).unwrap();
        assert_eq!(doc.tactics.len(), 1);
        assert_eq!(doc.tactics[0].id, "AML.TA0000");
        assert_eq!(doc.techniques.len(), 2);
        assert_eq!(doc.techniques[0].tactics, vec!["AML.TA0000".to_string()]);
        assert_eq!(doc.techniques[1].subtechnique_of.as_deref(), Some("AML.T0000"));
    }

    #[test]
    fn missing_matrices_is_a_parse_error() {
        let err = parse("id: ATLAS\nname: x\n").unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
    }
}
