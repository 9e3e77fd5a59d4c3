//! Runtime configuration (`.conf`) file parser.
//!
//! Flat `key = value` lines with the standard coercion order.

use indexmap::IndexMap;

use crate::env::interpolate;
use crate::error::ParseError;
use crate::value::ConfValue;

/// Parsed runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct Conf {
    pub values: IndexMap<String, ConfValue>,
}

impl Conf {
    pub fn get(&self, key: &str) -> Option<&ConfValue> {
        self.values.get(key)
    }

    /// String view of a key, regardless of its coerced type.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.to_string())
    }
}

/// Parse a conf file from disk.
///
/// # Errors
/// Returns [`ParseError::Io`] if the file cannot be read.
pub fn parse_conf_file(path: &std::path::Path) -> Result<Conf, ParseError> {
    let text = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_conf(&text)
}

/// Parse conf text.
pub fn parse_conf(text: &str) -> Result<Conf, ParseError> {
    let mut conf = Conf::default();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            conf.values.insert(
                key.trim().to_string(),
                ConfValue::coerce(&interpolate(value.trim())),
            );
        }
    }

    Ok(conf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_pairs_with_coercion() {
        let conf = parse_conf(
            "workers = 8\nrate = 0.5\ndebug = true\npaths = [\"/a\", \"/b\"]\nname = drover\n",
        )
        .unwrap();

        assert_eq!(conf.get("workers"), Some(&ConfValue::Int(8)));
        assert_eq!(conf.get("rate"), Some(&ConfValue::Float(0.5)));
        assert_eq!(conf.get("debug"), Some(&ConfValue::Bool(true)));
        assert_eq!(
            conf.get("paths"),
            Some(&ConfValue::Array(vec!["/a".into(), "/b".into()]))
        );
        assert_eq!(conf.get_str("name").as_deref(), Some("drover"));
    }

    #[test]
    fn env_references_resolve() {
        std::env::set_var("DROVER_TEST_CONF_HOME", "/srv/drover");
        let conf = parse_conf("data_dir = ${DROVER_TEST_CONF_HOME}/data\n").unwrap();
        assert_eq!(conf.get_str("data_dir").as_deref(), Some("/srv/drover/data"));
    }

    #[test]
    fn lines_without_equals_are_ignored() {
        let conf = parse_conf("just words\nkey = 1\n").unwrap();
        assert_eq!(conf.values.len(), 1);
    }
}
