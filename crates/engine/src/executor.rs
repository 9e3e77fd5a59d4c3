//! Pipeline execution engine.
//!
//! `PipelineExecutor` is the central orchestrator:
//! 1. Registers one bounded channel per edge with the channel manager.
//! 2. Spawns mode-transition bridges where edge endpoints disagree.
//! 3. Tracks a remaining-dependency counter per node; sources start
//!    immediately and each completion decrements its dependents, the
//!    1 → 0 transition scheduling that node exactly once.
//! 4. Runs every node body under panic capture, forwards its output to
//!    every outgoing edge, and closes each writer side exactly once.
//! 5. Routes failures through the [`ErrorHandler`]; fail-stop cancels the
//!    run-wide context, continue-on-error lets independent branches run
//!    to completion.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::io::Write as _;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use nodes::{DataPacket, IsolationLevel, NodeContext, NodeError, NodeHandler, NodeRegistry};

use crate::channel::ChannelManager;
use crate::error::EngineError;
use crate::error_handler::ErrorHandler;
use crate::models::{Dag, DataPassStrategy, NodeSpec, NodeState};
use crate::modes::{handler_for, ModeConfig, ModeTransition, PacketProcessor};
use crate::monitor::Monitor;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How node bodies are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One cooperative worker: nodes run to completion in topological
    /// order. Suited to batch flows whose nodes emit bounded output.
    #[default]
    Sync,
    /// Every ready node runs in its own task.
    Async,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            other => Err(format!("unknown execution mode '{other}'")),
        }
    }
}

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub execution_mode: ExecutionMode,
    /// `false` is fail-stop: the first error cancels the run.
    pub continue_on_error: bool,
    pub data_pass: DataPassStrategy,
    pub isolation: IsolationLevel,
    /// Skip mode-transition bridges when `false`; edges then require
    /// same-mode endpoints.
    pub integrated_flow: bool,
    /// Deadline for the whole run.
    pub run_timeout: Duration,
    /// Maximum re-invocations of a source node on retryable failure.
    pub max_node_retries: u32,
    /// Base delay for exponential back-off between source retries.
    pub retry_base_delay: Duration,
    pub run_id: String,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Sync,
            continue_on_error: false,
            data_pass: DataPassStrategy::Json,
            isolation: IsolationLevel::None,
            integrated_flow: true,
            run_timeout: Duration::from_secs(30 * 60),
            max_node_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            run_id: format!("run-{}", std::process::id()),
        }
    }
}

/// The outcome of a completed run.
#[derive(Debug)]
pub struct ExecutionReport {
    pub run_id: String,
    pub success: bool,
    pub duration: Duration,
    /// Node errors recorded during the run (empty on clean success).
    pub node_errors: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Shared run state
// ---------------------------------------------------------------------------

struct RunState {
    dag: Arc<Dag>,
    channels: Arc<ChannelManager>,
    monitor: Arc<Monitor>,
    errors: Arc<ErrorHandler>,
    registry: Arc<NodeRegistry>,
    options: ExecutorOptions,
    modes: HashMap<String, ModeConfig>,
    remaining: HashMap<String, AtomicUsize>,
    cancel: CancellationToken,
    /// Node tasks; the run ends when this drains.
    tracker: TaskTracker,
    /// Fan-in merges and mode-transition bridges.
    bridges: TaskTracker,
    started: Mutex<HashSet<String>>,
    any_succeeded: AtomicBool,
    fatal: AtomicBool,
}

impl RunState {
    /// Record the node as started. Returns `false` if it already was,
    /// which guards the schedule-exactly-once invariant.
    fn mark_started(&self, node_id: &str) -> bool {
        self.started
            .lock()
            .expect("started set lock poisoned")
            .insert(node_id.to_string())
    }
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator that runs a single pipeline execution.
pub struct PipelineExecutor {
    registry: Arc<NodeRegistry>,
    options: ExecutorOptions,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<NodeRegistry>, options: ExecutorOptions) -> Self {
        Self { registry, options }
    }

    /// Run the DAG to completion.
    ///
    /// # Errors
    /// Returns [`EngineError::RunFailed`] with the aggregate error map
    /// when the run settles unsuccessfully; validation errors surface
    /// before any node starts.
    pub async fn run(
        &self,
        dag: Arc<Dag>,
        monitor: Arc<Monitor>,
        errors: Arc<ErrorHandler>,
    ) -> Result<ExecutionReport, EngineError> {
        let started = Instant::now();

        // A DAG that skipped `finalize` is validated here; execution never
        // proceeds on an unchecked graph.
        let order = if dag.topo_order.is_empty() && !dag.nodes.is_empty() {
            dag.topological_sort()?
        } else {
            dag.topo_order.clone()
        };

        if dag.isolate && !self.options.isolation.is_isolated() {
            warn!(
                herd = %dag.isolation_id,
                "herd requests isolation but isolation level is none; running unconfined"
            );
        }

        let channels = Arc::new(ChannelManager::new());
        for edge in &dag.edges {
            channels.register(edge.clone());
        }

        let modes: HashMap<String, ModeConfig> = dag
            .nodes
            .values()
            .map(|n| (n.id.clone(), ModeConfig::for_node(n)))
            .collect();

        let remaining: HashMap<String, AtomicUsize> = dag
            .nodes
            .values()
            .map(|n| (n.id.clone(), AtomicUsize::new(n.dependencies.len())))
            .collect();

        let state = Arc::new(RunState {
            dag: Arc::clone(&dag),
            channels: Arc::clone(&channels),
            monitor: Arc::clone(&monitor),
            errors: Arc::clone(&errors),
            registry: Arc::clone(&self.registry),
            options: self.options.clone(),
            modes,
            remaining,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            bridges: TaskTracker::new(),
            started: Mutex::new(HashSet::new()),
            any_succeeded: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
        });

        let mut timed_out = false;
        match self.options.execution_mode {
            ExecutionMode::Async => {
                for node in dag.sources() {
                    schedule(&state, node.id.clone());
                }
                state.tracker.close();

                if tokio::time::timeout(self.options.run_timeout, state.tracker.wait())
                    .await
                    .is_err()
                {
                    warn!(run = %self.options.run_id, "run deadline exceeded; cancelling");
                    timed_out = true;
                    state.cancel.cancel();
                    state.tracker.wait().await;
                }
            }
            ExecutionMode::Sync => {
                let deadline = Instant::now() + self.options.run_timeout;
                for node_id in &order {
                    if state.cancel.is_cancelled() {
                        break;
                    }
                    if Instant::now() >= deadline {
                        warn!(run = %self.options.run_id, "run deadline exceeded; cancelling");
                        timed_out = true;
                        state.cancel.cancel();
                        break;
                    }
                    run_node(Arc::clone(&state), node_id.clone(), false).await;
                }
                state.tracker.close();
                state.tracker.wait().await;
            }
        }

        // Nodes the run never reached are skipped, so status counts always
        // account for every node.
        {
            let started_set = state.started.lock().expect("started set lock poisoned");
            for node in dag.nodes.values() {
                if !started_set.contains(&node.id) {
                    monitor.mark_skipped(&node.id, &node.name);
                }
            }
        }

        channels.close_all();
        state.bridges.close();
        state.cancel.cancel();
        state.bridges.wait().await;

        let node_errors = errors.errors();
        let success = !timed_out
            && (node_errors.is_empty()
                || (self.options.continue_on_error
                    && state.any_succeeded.load(Ordering::SeqCst)
                    && !state.fatal.load(Ordering::SeqCst)));

        let duration = started.elapsed();
        monitor.on_finish(success, duration);

        if timed_out {
            return Err(EngineError::Cancelled);
        }

        if success {
            Ok(ExecutionReport {
                run_id: self.options.run_id.clone(),
                success,
                duration,
                node_errors,
            })
        } else {
            Err(EngineError::RunFailed {
                errors: node_errors,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Node execution
// ---------------------------------------------------------------------------

/// Spawn a node task on the run tracker. Indirection through a boxed
/// future lets completed nodes schedule their dependents recursively.
fn schedule(state: &Arc<RunState>, node_id: String) {
    let tracker = state.tracker.clone();
    let state = Arc::clone(state);
    let fut: Pin<Box<dyn Future<Output = ()> + Send>> =
        Box::pin(async move { run_node(state, node_id, true).await });
    tracker.spawn(fut);
}

async fn run_node(state: Arc<RunState>, node_id: String, spawn_dependents: bool) {
    if !state.mark_started(&node_id) {
        return;
    }
    let Some(node) = state.dag.nodes.get(&node_id).cloned() else {
        return;
    };

    let node_started = Instant::now();
    state.monitor.start_node(&node.id, &node.name);

    let attempts = Arc::new(AtomicU32::new(0));
    let result = execute_body(&state, &node, &attempts).await;
    let retry_count = attempts.load(Ordering::SeqCst);
    let duration = node_started.elapsed();

    match result {
        Ok(()) => {
            state
                .monitor
                .finish_node(&node.id, NodeState::Succeeded, None, retry_count);
            state.any_succeeded.store(true, Ordering::SeqCst);
            debug!(node = %node.id, ?duration, "node succeeded");

            if spawn_dependents {
                release_dependents(&state, &node);
            }
        }
        Err(err) if err.is_cancelled() => {
            // Cancellation is propagated, never recorded as a node error.
            state
                .monitor
                .finish_node(&node.id, NodeState::Skipped, None, retry_count);
        }
        Err(err) => {
            if matches!(err, EngineError::UnknownNodeType(_)) {
                state.fatal.store(true, Ordering::SeqCst);
            }
            state
                .monitor
                .finish_node(&node.id, NodeState::Failed, Some(&err), retry_count);

            let continue_run = state.errors.handle(&node.id, &err);
            if continue_run {
                // Downstream nodes still run; their input from this node is
                // already closed and empty.
                if spawn_dependents {
                    release_dependents(&state, &node);
                }
            } else {
                state.cancel.cancel();
            }
        }
    }
}

/// Decrement each dependent's remaining-dependency counter; the 1 → 0
/// transition schedules that dependent exactly once.
fn release_dependents(state: &Arc<RunState>, node: &NodeSpec) {
    for dep in &node.dependents {
        if let Some(counter) = state.remaining.get(dep) {
            if counter.fetch_sub(1, Ordering::AcqRel) == 1 {
                schedule(state, dep.clone());
            }
        }
    }
}

/// Build the node's input, run its handler under panic capture, and fan
/// its output out to every outgoing edge.
async fn execute_body(
    state: &Arc<RunState>,
    node: &NodeSpec,
    attempts: &Arc<AtomicU32>,
) -> Result<(), EngineError> {
    let handler = state
        .registry
        .create(&node.node_type, &node.config)
        .map_err(|err| match err {
            NodeError::UnknownType(tag) => EngineError::UnknownNodeType(tag),
            other => EngineError::Handler {
                node_id: node.id.clone(),
                source: other,
            },
        })?;

    let ctx = NodeContext {
        node_id: node.id.clone(),
        node_name: node.name.clone(),
        node_type: node.node_type.clone(),
        config: node.config.clone(),
        run_id: state.options.run_id.clone(),
        isolation: state.options.isolation,
        cancel: state.cancel.clone(),
    };

    let input = build_input(state, node)?;
    let (out_tx, out_rx) = mpsc::channel(16);
    let forwarder = tokio::spawn(fan_out(Arc::clone(state), node.clone(), out_rx));

    let invoke = invoke_handler(state, node, handler, ctx, input, out_tx, attempts);
    let outcome = std::panic::AssertUnwindSafe(invoke).catch_unwind().await;
    let handler_result = match outcome {
        Ok(result) => result,
        Err(panic) => Err(EngineError::Panic {
            node_id: node.id.clone(),
            message: panic_message(&panic),
        }),
    };

    // The forwarder terminates once the handler's output sender is gone
    // (normal return or unwind) and always closes the outgoing edges.
    let forward_result = match forwarder.await {
        Ok(result) => result,
        Err(join_err) => Err(EngineError::Panic {
            node_id: node.id.clone(),
            message: join_err.to_string(),
        }),
    };

    handler_result.and(forward_result)
}

/// The handler invocation itself: sources run `produce` (with retry on
/// retryable failures), everything else loops under its mode handler.
async fn invoke_handler(
    state: &Arc<RunState>,
    node: &NodeSpec,
    handler: Arc<dyn NodeHandler>,
    ctx: NodeContext,
    mut input: mpsc::Receiver<DataPacket>,
    out_tx: mpsc::Sender<DataPacket>,
    attempts: &Arc<AtomicU32>,
) -> Result<(), EngineError> {
    if node.dependencies.is_empty() {
        let mut delay = state.options.retry_base_delay;

        loop {
            let produced = tokio::select! {
                () = state.cancel.cancelled() => return Err(EngineError::Cancelled),
                result = handler.produce(&ctx, &out_tx) => result,
            };

            match produced {
                Ok(()) => return Ok(()),
                Err(NodeError::Retryable(msg)) => {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt > state.options.max_node_retries {
                        return Err(EngineError::Handler {
                            node_id: node.id.clone(),
                            source: NodeError::Retryable(msg),
                        });
                    }

                    state.monitor.mark_retrying(&node.id, attempt);
                    warn!(
                        node = %node.id,
                        attempt,
                        max = state.options.max_node_retries,
                        ?delay,
                        error = %msg,
                        "retryable source error; backing off"
                    );

                    tokio::select! {
                        () = state.cancel.cancelled() => return Err(EngineError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    delay = delay.saturating_mul(2);
                }
                Err(err) => {
                    return Err(EngineError::Handler {
                        node_id: node.id.clone(),
                        source: err,
                    })
                }
            }
        }
    } else {
        let mode = state
            .modes
            .get(&node.id)
            .cloned()
            .unwrap_or_default();
        let mode_handler = handler_for(&mode);
        let processor = HandlerProcessor {
            handler,
            ctx,
            node_id: node.id.clone(),
        };

        mode_handler
            .run(&state.cancel, &mut input, &out_tx, &processor)
            .await
    }
}

/// Adapter driving a [`NodeHandler`] from a mode handler's loop.
struct HandlerProcessor {
    handler: Arc<dyn NodeHandler>,
    ctx: NodeContext,
    node_id: String,
}

#[async_trait]
impl PacketProcessor for HandlerProcessor {
    async fn process(&self, packet: DataPacket) -> Result<Option<DataPacket>, EngineError> {
        self.handler
            .process(&self.ctx, packet)
            .await
            .map_err(|source| EngineError::Handler {
                node_id: self.node_id.clone(),
                source,
            })
    }
}

// ---------------------------------------------------------------------------
// Input / output plumbing
// ---------------------------------------------------------------------------

/// The node's merged input channel. Zero dependencies get a closed, empty
/// channel; one dependency reads the edge directly; fan-in spawns one
/// forwarder per upstream that closes the merged channel once every input
/// has closed.
fn build_input(
    state: &Arc<RunState>,
    node: &NodeSpec,
) -> Result<mpsc::Receiver<DataPacket>, EngineError> {
    match node.dependencies.len() {
        0 => {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
        1 => effective_receiver(state, &node.dependencies[0], &node.id),
        _ => {
            let (tx, rx) = mpsc::channel(node.dependencies.len());
            for dep in &node.dependencies {
                let mut edge_rx = effective_receiver(state, dep, &node.id)?;
                let tx = tx.clone();
                let cancel = state.cancel.clone();

                state.bridges.spawn(async move {
                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            maybe = edge_rx.recv() => match maybe {
                                Some(packet) => {
                                    tokio::select! {
                                        sent = tx.send(packet) => {
                                            if sent.is_err() {
                                                return;
                                            }
                                        }
                                        () = cancel.cancelled() => return,
                                    }
                                }
                                None => return,
                            },
                        }
                    }
                });
            }
            Ok(rx)
        }
    }
}

/// The receiver a consumer actually reads for edge `from -> to`: the edge
/// channel itself, or the output of a mode-transition bridge when the
/// endpoint modes differ.
fn effective_receiver(
    state: &Arc<RunState>,
    from: &str,
    to: &str,
) -> Result<mpsc::Receiver<DataPacket>, EngineError> {
    let edge_rx = state.channels.take_receiver(from, to)?;
    if !state.options.integrated_flow {
        return Ok(edge_rx);
    }

    let from_mode = state.modes.get(from).cloned().unwrap_or_default();
    let to_mode = state.modes.get(to).cloned().unwrap_or_default();
    if from_mode.mode == to_mode.mode {
        return Ok(edge_rx);
    }

    let buffer = from_mode.streaming_buffer.max(1);
    let (bridge_tx, bridge_rx) = mpsc::channel(buffer);
    let transition = ModeTransition::new(from_mode.mode, to_mode.mode, buffer);
    let cancel = state.cancel.clone();
    debug!(edge = %format!("{from}->{to}"), from = %from_mode.mode, to = %to_mode.mode, "bridging modes");

    state.bridges.spawn(async move {
        let _ = transition.run(&cancel, edge_rx, bridge_tx).await;
    });

    Ok(bridge_rx)
}

/// Drain the handler's output and copy each packet onto every outgoing
/// edge, then close those edges exactly once — on success, error, and
/// unwind alike.
async fn fan_out(
    state: Arc<RunState>,
    node: NodeSpec,
    mut out_rx: mpsc::Receiver<DataPacket>,
) -> Result<(), EngineError> {
    let mut result = Ok(());

    'drain: while let Some(packet) = out_rx.recv().await {
        if state.options.data_pass == DataPassStrategy::Stdout {
            println!("{}", packet.payload);
        }

        for dep in &node.dependents {
            if state.options.data_pass == DataPassStrategy::File && dep.as_str() == "sink" {
                mirror_to_file(&state.options.run_id, &packet);
            }

            if let Err(err) = state
                .channels
                .send(&node.id, dep, packet.clone(), &state.cancel)
                .await
            {
                result = Err(err);
                break 'drain;
            }
        }
    }

    for dep in &node.dependents {
        state.channels.close_edge(&node.id, dep);
    }

    result
}

/// Append a sink-bound payload to `<run_id>.out.json`, one JSON document
/// per line.
fn mirror_to_file(run_id: &str, packet: &DataPacket) {
    let path = format!("{run_id}.out.json");
    let appended = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| writeln!(f, "{}", packet.payload));

    if let Err(err) = appended {
        warn!(%path, %err, "failed to mirror packet to file");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
