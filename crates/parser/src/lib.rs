//! `parser` crate — readers for the four Drover input documents.
//!
//! A pipeline run is assembled from:
//! - a *scenario* file (`.dsl`) — ordered processing steps plus metadata,
//! - a *contract* file (`.contract`) — source/sink bindings and governance,
//! - a *herd* file (`.herd`) — resource quotas and isolation policy,
//! - a *conf* file (`.conf`) — flat runtime configuration.
//!
//! All parsers are line-oriented, skip `#` comments and blank lines, and
//! resolve `${NAME}` environment references in every value before it is
//! stored.

pub mod conf;
pub mod contract;
pub mod env;
pub mod error;
pub mod herd;
pub mod scenario;
pub mod value;

pub use conf::{parse_conf, parse_conf_file, Conf};
pub use contract::{parse_contract, parse_contract_file, Contract};
pub use error::ParseError;
pub use herd::{parse_herd, parse_herd_file, Herd};
pub use scenario::{parse_scenario, parse_scenario_file, Scenario};
pub use value::ConfValue;
