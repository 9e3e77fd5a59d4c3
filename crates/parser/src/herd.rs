//! Herd (`.herd`) file parser.
//!
//! A herd is the resource/policy namespace that governs a run: quotas,
//! isolation switches, and governance policy. The format is INI with dotted
//! subsections (`[herd.resource_quotas]`) and repeatable item blocks
//! (`[[herd.rbac_policies]]`).

use indexmap::IndexMap;

use crate::env::interpolate;
use crate::error::ParseError;
use crate::value::ConfValue;

/// `[herd]` header.
#[derive(Debug, Clone, Default)]
pub struct HerdHeader {
    pub id: String,
    pub domain: String,
    pub description: String,
}

/// `[herd.resource_quotas]` — limit strings use human units (`500m`, `2G`).
#[derive(Debug, Clone, Default)]
pub struct ResourceQuotas {
    pub slices_max: i64,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub ephemeral_storage: String,
    pub gpu_limit: i64,
    pub slice_cpu_min: String,
    pub slice_memory_min: String,
}

/// `[herd.runtime_isolation]` — which namespaces each slice unshares.
#[derive(Debug, Clone, Default)]
pub struct RuntimeIsolation {
    pub ephemeral_user_namespace: bool,
    pub pid_namespace_per_slice: bool,
    pub net_namespace_per_slice: bool,
    pub mount_namespace_per_slice: bool,
}

impl RuntimeIsolation {
    /// Whether any isolation switch is on.
    pub fn any(&self) -> bool {
        self.ephemeral_user_namespace
            || self.pid_namespace_per_slice
            || self.net_namespace_per_slice
            || self.mount_namespace_per_slice
    }
}

/// One `[[herd.rbac_policies]]` block.
#[derive(Debug, Clone, Default)]
pub struct RbacPolicy {
    pub role: String,
    pub actions: Vec<String>,
}

/// One `[[herd.masking_policies.field_level_overrides]]` block.
#[derive(Debug, Clone, Default)]
pub struct FieldOverride {
    pub field: String,
    pub mask_type: String,
}

/// Parsed content of a herd file.
#[derive(Debug, Clone, Default)]
pub struct Herd {
    pub header: HerdHeader,
    pub labels: IndexMap<String, ConfValue>,
    pub quotas: ResourceQuotas,
    pub isolation: RuntimeIsolation,
    pub rbac_policies: Vec<RbacPolicy>,
    pub field_overrides: Vec<FieldOverride>,
    /// Every dotted subsection, verbatim.
    pub sections: IndexMap<String, IndexMap<String, ConfValue>>,
}

/// Parse a herd file from disk.
///
/// # Errors
/// Returns [`ParseError::Io`] if the file cannot be read.
pub fn parse_herd_file(path: &std::path::Path) -> Result<Herd, ParseError> {
    let text = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_herd(&text)
}

/// Parse herd text.
pub fn parse_herd(text: &str) -> Result<Herd, ParseError> {
    let mut herd = Herd::default();
    let mut current = String::new();
    // Repeated blocks accumulate key/values until their section changes.
    let mut repeated: Option<(String, IndexMap<String, ConfValue>)> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with("[[") && line.ends_with("]]") {
            flush_repeated(&mut herd, repeated.take());
            repeated = Some((line[2..line.len() - 2].trim().to_string(), IndexMap::new()));
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            flush_repeated(&mut herd, repeated.take());
            current = line[1..line.len() - 1].trim().to_string();
            herd.sections.entry(current.clone()).or_default();
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = ConfValue::coerce(&interpolate(value.trim()));

        if let Some((_, fields)) = repeated.as_mut() {
            fields.insert(key, value);
        } else {
            herd.sections
                .entry(current.clone())
                .or_default()
                .insert(key, value);
        }
    }
    flush_repeated(&mut herd, repeated.take());

    extract_typed(&mut herd);
    Ok(herd)
}

fn flush_repeated(herd: &mut Herd, block: Option<(String, IndexMap<String, ConfValue>)>) {
    let Some((section, fields)) = block else {
        return;
    };
    let str_of = |v: Option<&ConfValue>| v.map(|v| v.to_string()).unwrap_or_default();

    match section.as_str() {
        "herd.rbac_policies" => {
            let actions = match fields.get("actions") {
                Some(ConfValue::Array(a)) => a.clone(),
                other => str_of(other).split(',').map(|s| s.trim().to_string()).collect(),
            };
            herd.rbac_policies.push(RbacPolicy {
                role: str_of(fields.get("role")),
                actions,
            });
        }
        "herd.masking_policies.field_level_overrides" => {
            herd.field_overrides.push(FieldOverride {
                field: str_of(fields.get("field")),
                mask_type: str_of(fields.get("mask_type")),
            });
        }
        _ => {}
    }
}

fn extract_typed(herd: &mut Herd) {
    let str_of = |herd: &Herd, section: &str, key: &str| -> String {
        herd.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(|v| v.to_string())
            .unwrap_or_default()
    };
    let int_of = |herd: &Herd, section: &str, key: &str| -> i64 {
        herd.sections
            .get(section)
            .and_then(|s| s.get(key))
            .and_then(|v| v.as_int())
            .unwrap_or(0)
    };
    let bool_of = |herd: &Herd, section: &str, key: &str| -> bool {
        herd.sections
            .get(section)
            .and_then(|s| s.get(key))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    };

    herd.header = HerdHeader {
        id: str_of(herd, "herd", "id"),
        domain: str_of(herd, "herd", "domain"),
        description: str_of(herd, "herd", "description"),
    };

    if let Some(labels) = herd.sections.get("herd.labels") {
        herd.labels = labels.clone();
    }

    herd.quotas = ResourceQuotas {
        slices_max: int_of(herd, "herd.resource_quotas", "slices_max"),
        cpu_limit: str_of(herd, "herd.resource_quotas", "cpu_limit"),
        memory_limit: str_of(herd, "herd.resource_quotas", "memory_limit"),
        ephemeral_storage: str_of(herd, "herd.resource_quotas", "ephemeral_storage"),
        gpu_limit: int_of(herd, "herd.resource_quotas", "gpu_limit"),
        slice_cpu_min: str_of(herd, "herd.resource_quotas", "slice_cpu_min"),
        slice_memory_min: str_of(herd, "herd.resource_quotas", "slice_memory_min"),
    };

    herd.isolation = RuntimeIsolation {
        ephemeral_user_namespace: bool_of(herd, "herd.runtime_isolation", "ephemeral_user_namespace"),
        pid_namespace_per_slice: bool_of(herd, "herd.runtime_isolation", "pid_namespace_per_slice"),
        net_namespace_per_slice: bool_of(herd, "herd.runtime_isolation", "net_namespace_per_slice"),
        mount_namespace_per_slice: bool_of(herd, "herd.runtime_isolation", "mount_namespace_per_slice"),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[herd]
id = "markets"
domain = "finance"
description = "Markets data herd"

[herd.labels]
team = "markets-data"
tier = 1

[herd.resource_quotas]
slices_max = 16
cpu_limit = "4"
memory_limit = "2G"

[herd.runtime_isolation]
pid_namespace_per_slice = true
mount_namespace_per_slice = true

[[herd.rbac_policies]]
role = "operator"
actions = ["run", "inspect"]

[[herd.rbac_policies]]
role = "auditor"
actions = ["inspect"]

[[herd.masking_policies.field_level_overrides]]
field = "account_id"
mask_type = "hash"
"#;

    #[test]
    fn header_and_quotas_parse() {
        let h = parse_herd(SAMPLE).unwrap();
        assert_eq!(h.header.id, "markets");
        assert_eq!(h.header.domain, "finance");
        assert_eq!(h.quotas.slices_max, 16);
        assert_eq!(h.quotas.memory_limit, "2G");
    }

    #[test]
    fn isolation_switches_parse() {
        let h = parse_herd(SAMPLE).unwrap();
        assert!(h.isolation.pid_namespace_per_slice);
        assert!(h.isolation.mount_namespace_per_slice);
        assert!(!h.isolation.net_namespace_per_slice);
        assert!(h.isolation.any());
    }

    #[test]
    fn repeated_blocks_accumulate() {
        let h = parse_herd(SAMPLE).unwrap();
        assert_eq!(h.rbac_policies.len(), 2);
        assert_eq!(h.rbac_policies[0].role, "operator");
        assert_eq!(h.rbac_policies[0].actions, vec!["run", "inspect"]);
        assert_eq!(h.field_overrides.len(), 1);
        assert_eq!(h.field_overrides[0].mask_type, "hash");
    }

    #[test]
    fn labels_keep_types() {
        let h = parse_herd(SAMPLE).unwrap();
        assert_eq!(h.labels["tier"], ConfValue::Int(1));
    }

    #[test]
    fn empty_herd_has_no_isolation() {
        let h = parse_herd("[herd]\nid = \"x\"\n").unwrap();
        assert!(!h.isolation.any());
    }
}
