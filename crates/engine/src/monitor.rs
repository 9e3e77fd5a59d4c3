//! Execution monitoring: per-node timing and resource metrics, immutable
//! snapshots, and a background resource tick loop.
//!
//! The HTTP dashboard lives in the `dashboard` crate and consumes
//! [`MonitorSnapshot`] values; nothing here depends on the scheduler.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::EngineError;
use crate::models::NodeState;

/// How many 1-second resource samples are retained (one hour).
const MAX_RESOURCE_TICKS: usize = 3600;

// ---------------------------------------------------------------------------
// Metric types
// ---------------------------------------------------------------------------

/// Metrics for a single node execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetric {
    pub node_id: String,
    pub node_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub memory_start: u64,
    pub memory_end: u64,
    pub memory_delta: i64,
    pub status: NodeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
}

/// Overall resource usage at one point in time.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    pub peak_memory: u64,
    pub current_memory: u64,
    pub cpu_time_ms: u64,
    pub active_tasks: usize,
}

/// Immutable summary of the current execution state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub dag_name: String,
    pub start_time: DateTime<Utc>,
    pub current_time: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub running_nodes: usize,
    pub pending_nodes: usize,
    pub failed_nodes: usize,
    pub skipped_nodes: usize,
    pub retrying_nodes: usize,
    pub node_metrics: BTreeMap<String, NodeMetric>,
    pub resource_metrics: ResourceMetrics,
    pub progress: f64,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

struct MonitorInner {
    metrics: HashMap<String, NodeMetric>,
    ticks: Vec<ResourceMetrics>,
}

/// Observes node state transitions and samples process resources.
///
/// Metric writes take the write lock; snapshots take the read lock. The
/// tick history is append-only during a run and bounded to the last
/// [`MAX_RESOURCE_TICKS`] samples.
pub struct Monitor {
    dag_name: String,
    start_time: DateTime<Utc>,
    started: std::time::Instant,
    total_nodes: usize,
    inner: RwLock<MonitorInner>,
    active: AtomicUsize,
    finished: AtomicBool,
}

impl Monitor {
    pub fn new(dag_name: impl Into<String>, total_nodes: usize) -> Self {
        Self {
            dag_name: dag_name.into(),
            start_time: Utc::now(),
            started: std::time::Instant::now(),
            total_nodes,
            inner: RwLock::new(MonitorInner {
                metrics: HashMap::new(),
                ticks: Vec::new(),
            }),
            active: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
        }
    }

    /// Record that a node has started running.
    pub fn start_node(&self, node_id: &str, node_name: &str) {
        let metric = NodeMetric {
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            memory_start: current_memory_bytes(),
            memory_end: 0,
            memory_delta: 0,
            status: NodeState::Running,
            error: None,
            retry_count: 0,
        };

        self.inner
            .write()
            .expect("monitor lock poisoned")
            .metrics
            .insert(node_id.to_string(), metric);
        self.active.fetch_add(1, Ordering::Relaxed);

        info!(node = %node_id, name = %node_name, "starting node");
    }

    /// Record a node's terminal state, filling the end-time fields.
    pub fn finish_node(
        &self,
        node_id: &str,
        status: NodeState,
        err: Option<&EngineError>,
        retry_count: u32,
    ) {
        let memory_end = current_memory_bytes();
        let mut inner = self.inner.write().expect("monitor lock poisoned");

        if let Some(metric) = inner.metrics.get_mut(node_id) {
            let end = Utc::now();
            metric.end_time = Some(end);
            metric.duration_ms = Some(
                (end - metric.start_time).num_milliseconds().max(0) as u64,
            );
            metric.memory_end = memory_end;
            metric.memory_delta = memory_end as i64 - metric.memory_start as i64;
            metric.status = status;
            metric.retry_count = retry_count;
            metric.error = err.map(|e| e.to_string());

            match status {
                NodeState::Failed => error!(
                    node = %node_id,
                    duration_ms = metric.duration_ms,
                    retries = retry_count,
                    error = metric.error.as_deref().unwrap_or(""),
                    "node failed"
                ),
                _ => info!(
                    node = %node_id,
                    status = %status,
                    duration_ms = metric.duration_ms,
                    retries = retry_count,
                    "node finished"
                ),
            }
        }

        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Flag a node as retrying between attempts.
    pub fn mark_retrying(&self, node_id: &str, retry_count: u32) {
        let mut inner = self.inner.write().expect("monitor lock poisoned");
        if let Some(metric) = inner.metrics.get_mut(node_id) {
            metric.status = NodeState::Retrying;
            metric.retry_count = retry_count;
        }
    }

    /// Record a node that never started this run.
    pub fn mark_skipped(&self, node_id: &str, node_name: &str) {
        let now = Utc::now();
        let metric = NodeMetric {
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            start_time: now,
            end_time: Some(now),
            duration_ms: Some(0),
            memory_start: 0,
            memory_end: 0,
            memory_delta: 0,
            status: NodeState::Skipped,
            error: None,
            retry_count: 0,
        };

        self.inner
            .write()
            .expect("monitor lock poisoned")
            .metrics
            .entry(node_id.to_string())
            .or_insert(metric);
    }

    /// An immutable summary of the current execution state.
    pub fn snapshot(&self) -> MonitorSnapshot {
        let inner = self.inner.read().expect("monitor lock poisoned");

        let mut completed = 0;
        let mut running = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut retrying = 0;
        let mut node_metrics = BTreeMap::new();

        for (id, metric) in &inner.metrics {
            node_metrics.insert(id.clone(), metric.clone());
            match metric.status {
                NodeState::Succeeded => completed += 1,
                NodeState::Running => running += 1,
                NodeState::Failed => failed += 1,
                NodeState::Skipped => skipped += 1,
                NodeState::Retrying => retrying += 1,
                NodeState::Pending => {}
            }
        }

        let pending = self
            .total_nodes
            .saturating_sub(completed + running + failed + skipped + retrying);

        let progress = if self.total_nodes > 0 {
            (completed + failed + skipped) as f64 / self.total_nodes as f64
        } else {
            0.0
        };

        let current_memory = current_memory_bytes();
        // Peak is the maximum over the retained tick history, including
        // the sample taken for this snapshot.
        let peak_memory = inner
            .ticks
            .iter()
            .map(|t| t.current_memory)
            .chain(std::iter::once(current_memory))
            .max()
            .unwrap_or(0);

        MonitorSnapshot {
            dag_name: self.dag_name.clone(),
            start_time: self.start_time,
            current_time: Utc::now(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            total_nodes: self.total_nodes,
            completed_nodes: completed,
            running_nodes: running,
            pending_nodes: pending,
            failed_nodes: failed,
            skipped_nodes: skipped,
            retrying_nodes: retrying,
            node_metrics,
            resource_metrics: ResourceMetrics {
                peak_memory,
                current_memory,
                cpu_time_ms: cpu_time().as_millis() as u64,
                active_tasks: self.active.load(Ordering::Relaxed),
            },
            progress,
        }
    }

    /// Start the 1-second resource sampling loop; it stops when `cancel`
    /// fires.
    pub fn spawn_resource_ticks(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = interval.tick() => monitor.collect_sample(),
                }
            }
        })
    }

    fn collect_sample(&self) {
        let sample = ResourceMetrics {
            current_memory: current_memory_bytes(),
            peak_memory: 0,
            cpu_time_ms: cpu_time().as_millis() as u64,
            active_tasks: self.active.load(Ordering::Relaxed),
        };

        let mut inner = self.inner.write().expect("monitor lock poisoned");
        inner.ticks.push(sample);
        if inner.ticks.len() > MAX_RESOURCE_TICKS {
            inner.ticks.remove(0);
        }
    }

    /// Record the end of the run. Fires exactly once; later calls are
    /// no-ops.
    pub fn on_finish(&self, success: bool, duration: Duration) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        if success {
            info!(dag = %self.dag_name, ?duration, "pipeline run completed successfully");
        } else {
            error!(dag = %self.dag_name, ?duration, "pipeline run completed with errors");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Process resource sampling
// ---------------------------------------------------------------------------

/// Resident set size of this process, in bytes. 0 where unsupported.
fn current_memory_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            // Second field is resident pages.
            if let Some(resident) = statm
                .split_whitespace()
                .nth(1)
                .and_then(|v| v.parse::<u64>().ok())
            {
                // SAFETY: sysconf is a plain value query.
                let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
                if page > 0 {
                    return resident * page as u64;
                }
            }
        }
        0
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

/// Combined user + system CPU time of this process.
fn cpu_time() -> Duration {
    #[cfg(unix)]
    {
        // SAFETY: getrusage fills the zeroed struct and returns a status.
        unsafe {
            let mut usage: libc::rusage = std::mem::zeroed();
            if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
                let micros = (usage.ru_utime.tv_sec as u64 + usage.ru_stime.tv_sec as u64)
                    * 1_000_000
                    + (usage.ru_utime.tv_usec as u64 + usage.ru_stime.tv_usec as u64);
                return Duration::from_micros(micros);
            }
        }
        Duration::ZERO
    }
    #[cfg(not(unix))]
    {
        Duration::ZERO
    }
}
