//! `engine` crate — the DAG model, builder, typed dataflow, and the
//! execution engine.
//!
//! The pipeline life of a run: [`builder`] merges the parsed scenario,
//! contract, and herd documents into an immutable [`models::Dag`];
//! [`dag`] validates it (cycle detection doubles as the topological
//! sorter); [`executor::PipelineExecutor`] materializes per-edge bounded
//! channels ([`channel::ChannelManager`]), bridges mode mismatches
//! ([`modes`]), schedules node tasks by dependency count, and settles the
//! run through the [`error_handler`] and [`monitor`].

pub mod builder;
pub mod channel;
pub mod codec;
pub mod dag;
pub mod error;
pub mod error_handler;
pub mod executor;
pub mod models;
pub mod modes;
pub mod monitor;
pub mod transform;

pub use builder::build_dag;
pub use error::EngineError;
pub use error_handler::ErrorHandler;
pub use executor::{ExecutionMode, ExecutionReport, ExecutorOptions, PipelineExecutor};
pub use models::{Dag, DataPassStrategy, EdgeSpec, NodeSpec, NodeState, RetryPolicy};
pub use monitor::{Monitor, MonitorSnapshot};
