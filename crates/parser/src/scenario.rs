//! Scenario (`.dsl`) file parser.
//!
//! A scenario lists the ordered processing steps of a pipeline together
//! with its metadata, assertions, golden test bindings, and notification
//! rules. The step descriptors themselves are opaque at this layer; the
//! DAG builder interprets them.

use indexmap::IndexMap;

use crate::env::interpolate;
use crate::error::ParseError;
use crate::value::ConfValue;

/// Golden-test bindings declared in a scenario.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoldenTest {
    pub input: String,
    pub output: String,
    pub validation: String,
}

/// A notification rule: `- On <condition>, emit alert to "<channel>"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub condition: String,
    pub channel: String,
}

/// Parsed content of a scenario file.
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    pub feature: String,
    pub scenario: String,
    pub metadata: IndexMap<String, ConfValue>,
    pub source_name: String,
    pub source_uri: String,
    /// Raw step descriptors in listed order.
    pub steps: Vec<String>,
    pub assertions: Vec<String>,
    pub golden: GoldenTest,
    pub notifications: Vec<Notification>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Metadata,
    Steps,
    Assertions,
    Golden,
    Notifications,
}

/// Parse a scenario file from disk.
///
/// # Errors
/// Returns [`ParseError::Io`] if the file cannot be read, or any error from
/// [`parse_scenario`].
pub fn parse_scenario_file(path: &std::path::Path) -> Result<Scenario, ParseError> {
    let text = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_scenario(&text)
}

/// Parse scenario text.
pub fn parse_scenario(text: &str) -> Result<Scenario, ParseError> {
    let mut scenario = Scenario::default();
    let mut section = Section::None;

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix("Feature:") {
            scenario.feature = interpolate(rest.trim());
            continue;
        }
        if let Some(rest) = line.strip_prefix("Scenario:") {
            scenario.scenario = interpolate(rest.trim());
            continue;
        }
        if let Some(rest) = line.strip_prefix("Given source") {
            let quoted = quoted_parts(rest);
            if quoted.len() < 2 {
                return Err(ParseError::Syntax {
                    line: lineno + 1,
                    message: "expected `Given source \"<name>\" \"<uri>\"`".into(),
                });
            }
            scenario.source_name = interpolate(&quoted[0]);
            scenario.source_uri = interpolate(&quoted[1]);
            continue;
        }
        // Anchor line between the source and the step list; carries nothing.
        if line == "When events are received" {
            continue;
        }

        section = match line {
            "Metadata:" => Section::Metadata,
            "Then:" => Section::Steps,
            "Assertions:" => Section::Assertions,
            "GoldenTest:" => Section::Golden,
            "Notifications:" => Section::Notifications,
            _ => {
                consume_line(&mut scenario, section, line, lineno + 1)?;
                section
            }
        };
    }

    Ok(scenario)
}

fn consume_line(
    scenario: &mut Scenario,
    section: Section,
    line: &str,
    lineno: usize,
) -> Result<(), ParseError> {
    match section {
        Section::Metadata => {
            if let Some((key, value)) = line.split_once(':') {
                scenario.metadata.insert(
                    key.trim().to_string(),
                    ConfValue::coerce(&interpolate(value.trim())),
                );
            }
        }
        Section::Steps => {
            if let Some(step) = line.strip_prefix('-') {
                scenario.steps.push(interpolate(step.trim()));
            }
        }
        Section::Assertions => {
            if let Some(rule) = line.strip_prefix('-') {
                scenario.assertions.push(interpolate(rule.trim()));
            }
        }
        Section::Golden => {
            if let Some((key, value)) = line.split_once(':') {
                let value = interpolate(value.trim().trim_matches('"'));
                match key.trim() {
                    "input" => scenario.golden.input = value,
                    "output" => scenario.golden.output = value,
                    "validation" => scenario.golden.validation = value,
                    _ => {}
                }
            }
        }
        Section::Notifications => {
            if let Some(item) = line.strip_prefix('-') {
                scenario.notifications.push(parse_notification(item.trim(), lineno)?);
            }
        }
        Section::None => {}
    }
    Ok(())
}

fn parse_notification(item: &str, lineno: usize) -> Result<Notification, ParseError> {
    let (condition_part, alert_part) =
        item.split_once(',').ok_or_else(|| ParseError::Syntax {
            line: lineno,
            message: "expected `On <condition>, emit alert to \"<channel>\"`".into(),
        })?;

    let condition = condition_part
        .trim()
        .strip_prefix("On")
        .unwrap_or(condition_part)
        .trim()
        .to_string();

    let channel = quoted_parts(alert_part).into_iter().next().unwrap_or_default();

    Ok(Notification {
        condition: interpolate(&condition),
        channel: interpolate(&channel),
    })
}

/// Extract the contents of every double-quoted span in `input`, in order.
fn quoted_parts(input: &str) -> Vec<String> {
    input
        .split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, s)| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# Trades ingestion pipeline
Feature: trades
Scenario: normalize and publish

Metadata:
  owner: markets-data
  tags: [ "prod", "finance" ]
  priority: 3

Given source "raw_trades" "kafka://broker:9092/raw_trades"
When events are received
Then:
  - transform normalize ( mode: "streaming" )
  - filter drop_cancelled ( after: normalize )
  - aggregate vwap ( depends_on: drop_cancelled, window: "1m" )

Assertions:
  - every output row has a symbol

GoldenTest:
  input: "testdata/trades_in.json"
  output: "testdata/trades_out.json"
  validation: "exact"

Notifications:
  - On failure, emit alert to "pager-markets"
"#;

    #[test]
    fn full_scenario_parses() {
        let s = parse_scenario(SAMPLE).unwrap();
        assert_eq!(s.feature, "trades");
        assert_eq!(s.scenario, "normalize and publish");
        assert_eq!(s.source_name, "raw_trades");
        assert_eq!(s.source_uri, "kafka://broker:9092/raw_trades");
        assert_eq!(s.steps.len(), 3);
        assert_eq!(s.steps[0], "transform normalize ( mode: \"streaming\" )");
        assert_eq!(s.assertions, vec!["every output row has a symbol"]);
        assert_eq!(s.golden.input, "testdata/trades_in.json");
        assert_eq!(s.golden.validation, "exact");
        assert_eq!(s.notifications.len(), 1);
        assert_eq!(s.notifications[0].condition, "failure");
        assert_eq!(s.notifications[0].channel, "pager-markets");
    }

    #[test]
    fn metadata_values_are_coerced() {
        let s = parse_scenario(SAMPLE).unwrap();
        assert_eq!(s.metadata["priority"], ConfValue::Int(3));
        assert_eq!(
            s.metadata["tags"],
            ConfValue::Array(vec!["prod".into(), "finance".into()])
        );
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        let s = parse_scenario("# only a comment\n\nFeature: f\n").unwrap();
        assert_eq!(s.feature, "f");
        assert!(s.steps.is_empty());
    }

    #[test]
    fn malformed_source_line_is_rejected() {
        let err = parse_scenario("Given source raw\n").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn empty_step_list_is_valid() {
        let s = parse_scenario("Feature: f\nScenario: s\nThen:\n").unwrap();
        assert!(s.steps.is_empty());
    }
}
