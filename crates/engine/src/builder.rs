//! DAG builder — merges scenario, contract, and herd documents into an
//! annotated, validated [`Dag`].
//!
//! Construction is two-pass: first every step becomes a node `step_i` with
//! its parsed config and recorded dependency names, then edges are drawn —
//! either from explicit `after:`/`depends_on:` references (resolved by step
//! name) or by chaining from the previous node. A synthetic `source` node
//! heads the graph and a synthetic `sink` closes it.

use serde_json::{Map, Value};

use parser::{Contract, Herd, Scenario};

use crate::error::EngineError;
use crate::models::{Dag, EdgeSpec, NodeSpec};

/// Parsed form of one step descriptor:
/// `step_type step_name ( k: "v", after: name, depends_on: name )`.
#[derive(Debug, Default, PartialEq)]
pub struct StepInfo {
    pub step_type: String,
    pub name: String,
    pub config: Map<String, Value>,
    pub dependencies: Vec<String>,
}

/// Parse a step descriptor.
///
/// `after` and `depends_on` keys accumulate into the dependency list and
/// never land in the config; every other `k: v` pair is stored with quotes
/// stripped.
pub fn parse_step(step: &str) -> StepInfo {
    let mut info = StepInfo::default();

    let Some((step_type, rest)) = step.split_once(' ') else {
        info.step_type = step.trim().to_string();
        return info;
    };
    info.step_type = step_type.to_string();

    let rest = rest.trim();
    let Some(param_start) = rest.find('(') else {
        info.name = rest.to_string();
        return info;
    };

    info.name = rest[..param_start].trim().to_string();
    let params = &rest[param_start + 1..];
    let params = match params.rfind(')') {
        Some(end) => &params[..end],
        None => params,
    };

    for param in params.split(',') {
        let Some((key, value)) = param.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');

        match key {
            "after" | "depends_on" => info.dependencies.push(value.to_string()),
            "" => {}
            _ => {
                info.config
                    .insert(key.to_string(), Value::String(value.to_string()));
            }
        }
    }

    info
}

/// Build a validated DAG from the three parsed documents.
///
/// # Errors
/// - [`EngineError::DependencyNotFound`] for an unresolvable step reference.
/// - Validation failures from [`Dag::finalize`].
pub fn build_dag(
    scenario: &Scenario,
    contract: &Contract,
    herd: Option<&Herd>,
) -> Result<Dag, EngineError> {
    let mut dag = Dag::new();

    // Entry point. The scenario's source URI wins; the contract's binding
    // is the fallback.
    let source_uri = if scenario.source_uri.is_empty() {
        contract.endpoints.source_uri.clone()
    } else {
        scenario.source_uri.clone()
    };
    let mut source = NodeSpec::new("source", "Source", "source")
        .with_config("uri", Value::String(source_uri));
    source.description = "Data source entry point".to_string();
    dag.add_node(source)?;

    // First pass: one node per step, dependencies recorded for later.
    let mut dependencies: Vec<(String, Vec<String>)> = Vec::new();
    for (i, step) in scenario.steps.iter().enumerate() {
        let node_id = format!("step_{i}");
        let info = parse_step(step);

        let mut node = NodeSpec::new(&node_id, &info.name, &info.step_type);
        node.description = step.clone();
        node.config = info.config;
        dag.add_node(node)?;

        dependencies.push((node_id, info.dependencies));
    }

    // Exit point.
    let mut sink = NodeSpec::new("sink", "Sink", "sink")
        .with_config("uri", Value::String(contract.endpoints.sink_uri.clone()));
    sink.description = "Data sink exit point".to_string();
    dag.add_node(sink)?;

    // Second pass: edges. Steps without explicit dependencies chain from
    // the previous node; named dependencies resolve by step name.
    let mut last_node_id = "source".to_string();
    for (node_id, deps) in &dependencies {
        if deps.is_empty() {
            connect(&mut dag, &last_node_id, node_id);
        } else {
            for dep in deps {
                let dep_node_id = dag
                    .node_id_by_name(dep)
                    .ok_or_else(|| EngineError::DependencyNotFound {
                        step: node_id.clone(),
                        dependency: dep.clone(),
                    })?
                    .to_string();
                connect(&mut dag, &dep_node_id, node_id);
            }
        }
        last_node_id = node_id.clone();
    }

    // Close the graph on the sink.
    connect(&mut dag, &last_node_id, "sink");

    enhance(&mut dag, contract, herd);

    dag.finalize()?;
    Ok(dag)
}

/// Draw an edge, taking its dataflow settings from the upstream node's
/// config (`buffer_size`, `codec`).
fn connect(dag: &mut Dag, from: &str, to: &str) {
    let mut edge = EdgeSpec::new(from, to);

    if let Some(node) = dag.get_node(from) {
        if let Some(size) = config_usize(&node.config, "buffer_size") {
            edge.buffer_size = size.max(1);
        }
        if let Some(Value::String(codec)) = node.config.get("codec") {
            edge.codec = codec.clone();
        }
    }

    dag.add_edge_spec(edge);
}

/// Merge contract and herd attributes into every node's config. Overlay
/// keys never shadow step-level settings, and no edges are created here.
fn enhance(dag: &mut Dag, contract: &Contract, herd: Option<&Herd>) {
    let mut overlay: Vec<(&str, String)> = Vec::new();
    if !contract.header.name.is_empty() {
        overlay.push(("contract_name", contract.header.name.clone()));
    }
    if !contract.header.version.is_empty() {
        overlay.push(("contract_version", contract.header.version.clone()));
    }

    if let Some(herd) = herd {
        if !herd.header.id.is_empty() {
            overlay.push(("herd_id", herd.header.id.clone()));
        }
        if !herd.header.domain.is_empty() {
            overlay.push(("herd_domain", herd.header.domain.clone()));
        }
        if !herd.quotas.cpu_limit.is_empty() {
            overlay.push(("cpu_limit", herd.quotas.cpu_limit.clone()));
        }
        if !herd.quotas.memory_limit.is_empty() {
            overlay.push(("memory_limit", herd.quotas.memory_limit.clone()));
        }

        if herd.isolation.any() {
            dag.isolate = true;
            dag.isolation_id = if herd.header.id.is_empty() {
                "herd".to_string()
            } else {
                herd.header.id.clone()
            };
        }
    }

    for node in dag.nodes.values_mut() {
        for (key, value) in &overlay {
            if !node.config.contains_key(*key) {
                node.config
                    .insert((*key).to_string(), Value::String(value.clone()));
            }
        }
    }
}

fn config_usize(config: &Map<String, Value>, key: &str) -> Option<usize> {
    match config.get(key)? {
        Value::Number(n) => n.as_u64().map(|v| v as usize),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parser::parse_scenario;

    fn scenario_with_steps(steps: &[&str]) -> Scenario {
        let mut text = String::from(
            "Feature: f\nScenario: s\nGiven source \"in\" \"file:///in\"\nThen:\n",
        );
        for step in steps {
            text.push_str(&format!("  - {step}\n"));
        }
        parse_scenario(&text).unwrap()
    }

    fn contract() -> Contract {
        parser::parse_contract(
            "[contract]\nname = \"c\"\nversion = \"1.0\"\n[sinks]\nvalid_sink_uri = \"file:///out\"\n",
        )
        .unwrap()
    }

    #[test]
    fn step_descriptor_parses_config_and_deps() {
        let info = parse_step("aggregate vwap ( window: \"1m\", after: normalize )");
        assert_eq!(info.step_type, "aggregate");
        assert_eq!(info.name, "vwap");
        assert_eq!(info.config["window"], "1m");
        assert_eq!(info.dependencies, vec!["normalize"]);
    }

    #[test]
    fn step_without_params_is_bare() {
        let info = parse_step("transform normalize");
        assert_eq!(info.step_type, "transform");
        assert_eq!(info.name, "normalize");
        assert!(info.config.is_empty());
        assert!(info.dependencies.is_empty());
    }

    #[test]
    fn depends_on_and_after_both_accumulate() {
        let info = parse_step("enrich e ( after: a, depends_on: b )");
        assert_eq!(info.dependencies, vec!["a", "b"]);
        assert!(info.config.is_empty());
    }

    #[test]
    fn linear_chain_yields_five_nodes_four_edges() {
        let scenario = scenario_with_steps(&[
            "transform a ()",
            "filter b (after: a)",
            "aggregate c (depends_on: b)",
        ]);
        let dag = build_dag(&scenario, &contract(), None).unwrap();

        assert_eq!(dag.node_count(), 5);
        assert_eq!(dag.edge_count(), 4);
        assert!(dag.edge("source", "step_0").is_some());
        assert!(dag.edge("step_0", "step_1").is_some());
        assert!(dag.edge("step_1", "step_2").is_some());
        assert!(dag.edge("step_2", "sink").is_some());

        let order = &dag.topo_order;
        assert_eq!(order.first().unwrap(), "source");
        assert_eq!(order.last().unwrap(), "sink");
        let pos = |id: &str| order.iter().position(|s| s == id).unwrap();
        assert!(pos("step_0") < pos("step_1"));
        assert!(pos("step_1") < pos("step_2"));
    }

    #[test]
    fn empty_scenario_is_source_to_sink() {
        let scenario = scenario_with_steps(&[]);
        let dag = build_dag(&scenario, &contract(), None).unwrap();

        assert_eq!(dag.node_count(), 2);
        assert_eq!(dag.edge_count(), 1);
        assert!(dag.edge("source", "sink").is_some());
    }

    #[test]
    fn unknown_dependency_fails() {
        let scenario = scenario_with_steps(&["filter f (after: ghost)"]);
        let err = build_dag(&scenario, &contract(), None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::DependencyNotFound { dependency, .. } if dependency == "ghost"
        ));
    }

    #[test]
    fn fan_out_and_fan_in_edges() {
        // a feeds b and c; d joins both.
        let scenario = scenario_with_steps(&[
            "transform a ()",
            "filter b (after: a)",
            "filter c (after: a)",
            "aggregate d (after: b, depends_on: c)",
        ]);
        let dag = build_dag(&scenario, &contract(), None).unwrap();

        assert!(dag.edge("step_0", "step_1").is_some());
        assert!(dag.edge("step_0", "step_2").is_some());
        assert!(dag.edge("step_1", "step_3").is_some());
        assert!(dag.edge("step_2", "step_3").is_some());
        assert_eq!(dag.get_node("step_3").unwrap().dependencies.len(), 2);
    }

    #[test]
    fn source_and_sink_carry_uris() {
        let scenario = scenario_with_steps(&[]);
        let dag = build_dag(&scenario, &contract(), None).unwrap();

        assert_eq!(dag.get_node("source").unwrap().config["uri"], "file:///in");
        assert_eq!(dag.get_node("sink").unwrap().config["uri"], "file:///out");
    }

    #[test]
    fn contract_and_herd_overlay_configs() {
        let herd = parser::parse_herd(
            "[herd]\nid = \"markets\"\ndomain = \"fin\"\n[herd.resource_quotas]\ncpu_limit = \"2\"\nmemory_limit = \"1G\"\n[herd.runtime_isolation]\npid_namespace_per_slice = true\n",
        )
        .unwrap();
        let scenario = scenario_with_steps(&["transform t ()"]);
        let dag = build_dag(&scenario, &contract(), Some(&herd)).unwrap();

        let node = dag.get_node("step_0").unwrap();
        assert_eq!(node.config["contract_name"], "c");
        assert_eq!(node.config["contract_version"], "1.0");
        assert_eq!(node.config["herd_id"], "markets");
        assert_eq!(node.config["memory_limit"], "1G");
        assert!(dag.isolate);
        assert_eq!(dag.isolation_id, "markets");
    }

    #[test]
    fn upstream_buffer_size_configures_the_edge() {
        let scenario = scenario_with_steps(&[
            "transform t (buffer_size: 8)",
            "filter f (after: t)",
        ]);
        let dag = build_dag(&scenario, &contract(), None).unwrap();

        assert_eq!(dag.edge("step_0", "step_1").unwrap().buffer_size, 8);
        // Edge out of `source` keeps the default.
        assert_eq!(dag.edge("source", "step_0").unwrap().buffer_size, 1);
    }
}
