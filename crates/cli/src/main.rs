//! `drover` CLI entry-point.
//!
//! Available sub-commands:
//! - `run`      — execute a pipeline from its scenario/contract/conf files.
//! - `validate` — build and validate a pipeline DAG, printing the order.
//!
//! Exit codes: 0 on success, 1 when the run recorded any node error,
//! 2 for configuration or IO failures before execution starts.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use engine::{
    build_dag, Dag, DataPassStrategy, EngineError, ErrorHandler, ExecutionMode, ExecutorOptions,
    Monitor, PipelineExecutor,
};
use nodes::{IsolationLevel, NodeRegistry};

#[derive(Parser)]
#[command(
    name = "drover",
    about = "Declarative data-pipeline execution engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a pipeline DAG from the given input files.
    Run {
        /// Path to the contract file (.contract).
        #[arg(long)]
        contract: PathBuf,
        /// Path to the runtime configuration file (.conf).
        #[arg(long)]
        conf: PathBuf,
        /// Path to the scenario file (.dsl).
        #[arg(long)]
        dsl: PathBuf,
        /// Path to the herd file (.herd).
        #[arg(long)]
        herd: Option<PathBuf>,
        /// Enable verbose output.
        #[arg(short, long)]
        verbose: bool,
        /// Error handling mode: 'stop' or 'continue'.
        #[arg(long, default_value = "stop")]
        error_mode: String,
        /// Data passing strategy: 'json', 'file', or 'stdout'.
        #[arg(long, default_value = "json")]
        data_pass: String,
        /// Monitoring level: 'none', 'basic', or 'verbose'.
        #[arg(long, default_value = "basic")]
        monitoring: String,
        /// Execution mode: 'sync' or 'async'.
        #[arg(long, default_value = "sync")]
        execution_mode: String,
        /// Enable mode-transition bridges between batch and streaming nodes.
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        integrated_flow: bool,
        /// Isolation level: 'none', 'process', or 'container'.
        #[arg(long, default_value = "none")]
        isolation_level: String,
        /// Unique identifier for this run (auto-generated if not provided).
        #[arg(long)]
        run_id: Option<String>,
        /// Serve the monitoring dashboard on this address (e.g. 127.0.0.1:8080).
        #[arg(long)]
        monitor_addr: Option<String>,
    },
    /// Validate a pipeline DAG and print its execution order.
    Validate {
        /// Path to the scenario file (.dsl).
        #[arg(long)]
        dsl: PathBuf,
        /// Path to the contract file (.contract).
        #[arg(long)]
        contract: Option<PathBuf>,
        /// Path to the herd file (.herd).
        #[arg(long)]
        herd: Option<PathBuf>,
    },
}

/// Configuration or IO failure before execution; maps to exit code 2.
struct SetupError(String);

impl From<parser::ParseError> for SetupError {
    fn from(err: parser::ParseError) -> Self {
        SetupError(err.to_string())
    }
}

impl From<EngineError> for SetupError {
    fn from(err: EngineError) -> Self {
        SetupError(err.to_string())
    }
}

impl From<String> for SetupError {
    fn from(message: String) -> Self {
        SetupError(message)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            contract,
            conf,
            dsl,
            herd,
            verbose,
            error_mode,
            data_pass,
            monitoring,
            execution_mode,
            integrated_flow,
            isolation_level,
            run_id,
            monitor_addr,
        } => {
            init_tracing(verbose, &monitoring);

            let prepared = prepare_run(
                &contract,
                &conf,
                &dsl,
                herd.as_deref(),
                &error_mode,
                &data_pass,
                &execution_mode,
                integrated_flow,
                &isolation_level,
                run_id,
                monitor_addr,
            );
            let (dag, options, monitor_addr) = match prepared {
                Ok(p) => p,
                Err(SetupError(message)) => {
                    eprintln!("drover: {message}");
                    return ExitCode::from(2);
                }
            };

            execute(dag, options, &monitoring, monitor_addr).await
        }

        Command::Validate { dsl, contract, herd } => {
            init_tracing(false, "none");
            match validate(&dsl, contract.as_deref(), herd.as_deref()) {
                Ok(order) => {
                    println!("pipeline is valid; execution order: {order:?}");
                    ExitCode::SUCCESS
                }
                Err(SetupError(message)) => {
                    eprintln!("drover: validation failed: {message}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn init_tracing(verbose: bool, monitoring: &str) {
    let level = if verbose || monitoring == "verbose" {
        "debug"
    } else if monitoring == "none" {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

#[allow(clippy::too_many_arguments)]
fn prepare_run(
    contract_path: &std::path::Path,
    conf_path: &std::path::Path,
    dsl_path: &std::path::Path,
    herd_path: Option<&std::path::Path>,
    error_mode: &str,
    data_pass: &str,
    execution_mode: &str,
    integrated_flow: bool,
    isolation_level: &str,
    run_id: Option<String>,
    monitor_addr: Option<String>,
) -> Result<(Dag, ExecutorOptions, Option<String>), SetupError> {
    let scenario = parser::parse_scenario_file(dsl_path)?;
    let contract = parser::parse_contract_file(contract_path)?;
    let conf = parser::parse_conf_file(conf_path)?;
    let herd = herd_path.map(parser::parse_herd_file).transpose()?;

    let continue_on_error = match error_mode {
        "stop" => false,
        "continue" => true,
        other => return Err(format!("unknown error mode '{other}'").into()),
    };

    let mut options = ExecutorOptions {
        execution_mode: execution_mode.parse::<ExecutionMode>()?,
        continue_on_error,
        data_pass: data_pass.parse::<DataPassStrategy>()?,
        isolation: isolation_level.parse::<IsolationLevel>()?,
        integrated_flow,
        run_id: run_id.unwrap_or_else(|| format!("run-{}", uuid::Uuid::new_v4())),
        ..ExecutorOptions::default()
    };

    // Selected conf keys tune the engine.
    if let Some(secs) = conf.get("run_timeout_secs").and_then(|v| v.as_int()) {
        options.run_timeout = Duration::from_secs(secs.max(0) as u64);
    }
    if let Some(retries) = conf.get("max_node_retries").and_then(|v| v.as_int()) {
        options.max_node_retries = retries.max(0) as u32;
    }
    let monitor_addr = monitor_addr.or_else(|| conf.get_str("monitor_addr"));

    let dag = build_dag(&scenario, &contract, herd.as_ref())?;
    info!(
        run = %options.run_id,
        nodes = dag.node_count(),
        edges = dag.edge_count(),
        "pipeline DAG built"
    );

    Ok((dag, options, monitor_addr))
}

async fn execute(
    dag: Dag,
    options: ExecutorOptions,
    monitoring: &str,
    monitor_addr: Option<String>,
) -> ExitCode {
    let dag = Arc::new(dag);
    let monitor = Arc::new(Monitor::new("pipeline", dag.node_count()));
    let errors = Arc::new(ErrorHandler::new(!options.continue_on_error));

    let ticks = CancellationToken::new();
    let tick_task = monitor.spawn_resource_ticks(ticks.clone());

    if let Some(addr) = monitor_addr {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move {
            if let Err(err) = dashboard::serve(&addr, monitor).await {
                warn!(%err, "monitoring dashboard exited");
            }
        });
    }

    let registry = Arc::new(NodeRegistry::with_builtins());
    let executor = PipelineExecutor::new(registry, options);
    let result = executor
        .run(Arc::clone(&dag), Arc::clone(&monitor), errors)
        .await;

    ticks.cancel();
    let _ = tick_task.await;

    if monitoring == "verbose" {
        let snapshot = monitor.snapshot();
        println!(
            "nodes: {} completed, {} failed, {} skipped ({}%)",
            snapshot.completed_nodes,
            snapshot.failed_nodes,
            snapshot.skipped_nodes,
            (snapshot.progress * 100.0).round()
        );
    }

    match result {
        Ok(report) => {
            info!(
                run = %report.run_id,
                ?report.duration,
                errors = report.node_errors.len(),
                "run finished"
            );
            if report.node_errors.is_empty() {
                ExitCode::SUCCESS
            } else {
                // Continue-on-error runs settle, but recorded errors still
                // fail the command.
                for (node, message) in &report.node_errors {
                    eprintln!("drover: node '{node}' failed: {message}");
                }
                ExitCode::FAILURE
            }
        }
        Err(EngineError::RunFailed { errors }) => {
            for (node, message) in &errors {
                eprintln!("drover: node '{node}' failed: {message}");
            }
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("drover: run failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn validate(
    dsl_path: &std::path::Path,
    contract_path: Option<&std::path::Path>,
    herd_path: Option<&std::path::Path>,
) -> Result<Vec<String>, SetupError> {
    let scenario = parser::parse_scenario_file(dsl_path)?;
    let contract = contract_path
        .map(parser::parse_contract_file)
        .transpose()?
        .unwrap_or_default();
    let herd = herd_path.map(parser::parse_herd_file).transpose()?;

    let dag = build_dag(&scenario, &contract, herd.as_ref())?;
    Ok(dag.topo_order.clone())
}
