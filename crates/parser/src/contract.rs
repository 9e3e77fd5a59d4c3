//! Contract (`.contract`) file parser.
//!
//! INI-style sections binding a scenario to concrete sources and sinks,
//! plus the governance attributes (compliance, retention, audit) the DAG
//! builder folds into node configs.

use indexmap::IndexMap;

use crate::env::interpolate;
use crate::error::ParseError;
use crate::value::ConfValue;

/// `[contract]` section.
#[derive(Debug, Clone, Default)]
pub struct ContractHeader {
    pub name: String,
    pub version: String,
    pub schema_hash: String,
}

/// `[execution]` section.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub herd: String,
    pub module_layer: String,
    pub slo_target: String,
    pub default_masking_policy: String,
    pub metrics_namespace: String,
    pub logs_tag: String,
    pub tracing_sample_rate: f64,
}

/// `[sources]` / `[sinks]` bindings.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub source_name: String,
    pub source_uri: String,
    pub sink_name: String,
    pub sink_uri: String,
}

/// `[retention]` section, in days.
#[derive(Debug, Clone, Default)]
pub struct Retention {
    pub lineage_retention_days: i64,
    pub log_retention_days: i64,
    pub snapshot_retention_days: i64,
}

/// Parsed content of a contract file.
///
/// The commonly consumed fields are lifted into typed structs; every
/// section is also retained verbatim in `sections` for callers that need
/// attributes this layer does not interpret.
#[derive(Debug, Clone, Default)]
pub struct Contract {
    pub header: ContractHeader,
    pub compliance_level: Vec<String>,
    pub classification: String,
    pub execution: Execution,
    pub endpoints: Endpoints,
    pub golden_input: String,
    pub golden_output: String,
    pub retention: Retention,
    pub sections: IndexMap<String, IndexMap<String, ConfValue>>,
}

/// Parse a contract file from disk.
///
/// # Errors
/// Returns [`ParseError::Io`] if the file cannot be read.
pub fn parse_contract_file(path: &std::path::Path) -> Result<Contract, ParseError> {
    let text = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_contract(&text)
}

/// Parse contract text.
pub fn parse_contract(text: &str) -> Result<Contract, ParseError> {
    let sections = read_sections(text)?;
    let mut contract = Contract {
        sections,
        ..Contract::default()
    };

    let get = |contract: &Contract, section: &str, key: &str| -> Option<ConfValue> {
        contract.sections.get(section)?.get(key).cloned()
    };
    let get_str = |contract: &Contract, section: &str, key: &str| -> String {
        get(contract, section, key)
            .map(|v| v.to_string())
            .unwrap_or_default()
    };

    contract.header = ContractHeader {
        name: get_str(&contract, "contract", "name"),
        version: get_str(&contract, "contract", "version"),
        schema_hash: get_str(&contract, "contract", "schema_hash"),
    };

    if let Some(ConfValue::Array(levels)) = get(&contract, "compliance", "level") {
        contract.compliance_level = levels;
    }
    contract.classification = get_str(&contract, "compliance", "classification");

    contract.execution = Execution {
        herd: get_str(&contract, "execution", "herd"),
        module_layer: get_str(&contract, "execution", "module_layer"),
        slo_target: get_str(&contract, "execution", "slo_target"),
        default_masking_policy: get_str(&contract, "execution", "default_masking_policy"),
        metrics_namespace: get_str(&contract, "execution", "metrics_namespace"),
        logs_tag: get_str(&contract, "execution", "logs_tag"),
        tracing_sample_rate: match get(&contract, "execution", "tracing_sample_rate") {
            Some(ConfValue::Float(f)) => f,
            Some(ConfValue::Int(i)) => i as f64,
            _ => 0.0,
        },
    };

    contract.endpoints = Endpoints {
        source_name: get_str(&contract, "sources", "source_name"),
        source_uri: get_str(&contract, "sources", "source_uri"),
        sink_name: get_str(&contract, "sinks", "valid_sink_name"),
        sink_uri: get_str(&contract, "sinks", "valid_sink_uri"),
    };

    contract.golden_input = get_str(&contract, "golden", "input");
    contract.golden_output = get_str(&contract, "golden", "output");

    let days = |contract: &Contract, key: &str| -> i64 {
        get(contract, "retention", key)
            .and_then(|v| v.as_int())
            .unwrap_or(0)
    };
    contract.retention = Retention {
        lineage_retention_days: days(&contract, "lineage_retention_days"),
        log_retention_days: days(&contract, "log_retention_days"),
        snapshot_retention_days: days(&contract, "snapshot_retention_days"),
    };

    Ok(contract)
}

/// Read INI-style `[section]` / `key = value` text into an ordered map.
/// Shared with the herd parser, which layers dotted sections on top.
pub(crate) fn read_sections(
    text: &str,
) -> Result<IndexMap<String, IndexMap<String, ConfValue>>, ParseError> {
    let mut sections: IndexMap<String, IndexMap<String, ConfValue>> = IndexMap::new();
    let mut current = String::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') && !line.starts_with("[[") {
            current = line[1..line.len() - 1].trim().to_string();
            sections.entry(current.clone()).or_default();
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            sections
                .entry(current.clone())
                .or_default()
                .insert(
                    key.trim().to_string(),
                    ConfValue::coerce(&interpolate(value.trim())),
                );
        }
    }

    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[contract]
name = "cdm_trades"
version = "2.1.0"
schema_hash = "abc123"

[compliance]
level = ["SOX", "GDPR"]
classification = "restricted"

[execution]
herd = "markets"
tracing_sample_rate = 0.25

[sources]
source_name = "raw_trades"
source_uri = "kafka://broker:9092/raw_trades"

[sinks]
valid_sink_name = "clean_trades"
valid_sink_uri = "s3://bucket/clean"

[retention]
log_retention_days = 30
"#;

    #[test]
    fn typed_fields_are_extracted() {
        let c = parse_contract(SAMPLE).unwrap();
        assert_eq!(c.header.name, "cdm_trades");
        assert_eq!(c.header.version, "2.1.0");
        assert_eq!(c.compliance_level, vec!["SOX", "GDPR"]);
        assert_eq!(c.execution.herd, "markets");
        assert!((c.execution.tracing_sample_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(c.endpoints.source_uri, "kafka://broker:9092/raw_trades");
        assert_eq!(c.endpoints.sink_uri, "s3://bucket/clean");
        assert_eq!(c.retention.log_retention_days, 30);
    }

    #[test]
    fn raw_sections_are_retained() {
        let c = parse_contract(SAMPLE).unwrap();
        assert!(c.sections.contains_key("compliance"));
        assert_eq!(
            c.sections["compliance"]["classification"],
            ConfValue::String("restricted".into())
        );
    }

    #[test]
    fn missing_sections_default_cleanly() {
        let c = parse_contract("[contract]\nname = \"x\"\n").unwrap();
        assert_eq!(c.header.name, "x");
        assert!(c.endpoints.sink_uri.is_empty());
        assert_eq!(c.retention.lineage_retention_days, 0);
    }
}
