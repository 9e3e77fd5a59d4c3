//! Built-in node handlers.
//!
//! These cover the engine-level tags (`source`, `sink`, and the
//! passthrough family); domain-specific computation bodies (readers,
//! writers, business transforms) are plug-ins registered by callers.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use sandbox::{IsolationLevel, Limits, Sandbox};

use crate::error::NodeError;
use crate::packet::DataPacket;
use crate::traits::{NodeContext, NodeHandler};

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// The synthetic entry node: announces the bound source URI as a single
/// packet. Real ingestion bodies are plug-ins that override `produce`.
pub struct SourceNode;

#[async_trait]
impl NodeHandler for SourceNode {
    async fn produce(
        &self,
        ctx: &NodeContext,
        out: &mpsc::Sender<DataPacket>,
    ) -> Result<(), NodeError> {
        let uri = ctx.config_str("uri").unwrap_or_default();
        let packet = DataPacket::new(json!({ "source": uri }), ctx.node_id.clone())
            .with_metadata("uri", uri);

        out.send(packet)
            .await
            .map_err(|_| NodeError::Fatal("source output channel closed".into()))
    }

    async fn process(
        &self,
        _ctx: &NodeContext,
        packet: DataPacket,
    ) -> Result<Option<DataPacket>, NodeError> {
        // Sources have no upstream; anything arriving passes through.
        Ok(Some(packet))
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// The synthetic exit node: drains its input.
pub struct SinkNode;

#[async_trait]
impl NodeHandler for SinkNode {
    async fn process(
        &self,
        ctx: &NodeContext,
        packet: DataPacket,
    ) -> Result<Option<DataPacket>, NodeError> {
        debug!(
            node = %ctx.node_id,
            source = %packet.source_node,
            "sink consumed packet"
        );
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Passthrough family
// ---------------------------------------------------------------------------

/// Identity handler behind the `filter`, `transform`, `aggregate`, and
/// `enrich` tags when no plug-in body is registered: re-stamps the packet
/// with its own node ID and forwards it.
pub struct PassthroughNode;

#[async_trait]
impl NodeHandler for PassthroughNode {
    async fn process(
        &self,
        ctx: &NodeContext,
        packet: DataPacket,
    ) -> Result<Option<DataPacket>, NodeError> {
        let mut forwarded = packet;
        forwarded.source_node = ctx.node_id.clone();
        Ok(Some(forwarded))
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Runs an external command, optionally confined by the isolation runtime.
///
/// The command comes from the node's `command` config key (a string or an
/// argv array); cpu/memory quotas merged from the herd become cgroup
/// limits. As a source the command runs once and its stdout becomes the
/// packet payload; mid-pipeline it runs once per packet.
pub struct CommandNode;

impl CommandNode {
    fn argv(ctx: &NodeContext) -> Result<Vec<String>, NodeError> {
        match ctx.config.get("command") {
            Some(Value::String(line)) => {
                Ok(line.split_whitespace().map(str::to_string).collect())
            }
            Some(Value::Array(parts)) => Ok(parts
                .iter()
                .map(|p| match p {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()),
            _ => Err(NodeError::Fatal(format!(
                "node '{}' has no 'command' config",
                ctx.node_id
            ))),
        }
    }

    fn limits(ctx: &NodeContext) -> Limits {
        Limits {
            cpu_quota: ctx.config_str("cpu_limit").unwrap_or_default(),
            memory_max: ctx.config_str("memory_limit").unwrap_or_default(),
            disk_quota: ctx.config_str("disk_quota").unwrap_or_default(),
            io_weight: ctx.config_str("io_weight").unwrap_or_default(),
        }
    }

    async fn run(ctx: &NodeContext) -> Result<Value, NodeError> {
        let argv = Self::argv(ctx)?;
        let level = match ctx.isolation {
            IsolationLevel::None => IsolationLevel::None,
            other => other.effective(),
        };

        let mut sandbox = Sandbox::new(argv)
            .limits(Self::limits(ctx))
            .isolation(level)
            .cgroup_name(format!("drover-{}-{}", ctx.run_id, ctx.node_id));
        if let Some(hostname) = ctx.config_str("hostname") {
            sandbox = sandbox.hostname(hostname);
        }

        let result = sandbox
            .execute()
            .await
            .map_err(|e| NodeError::Fatal(e.to_string()))?;

        if !result.success() {
            return Err(NodeError::Fatal(format!(
                "command exited with code {}: {}",
                result.exit_code,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&result.stdout);
        // Prefer structured output when the command emits JSON.
        Ok(serde_json::from_str(&stdout).unwrap_or(Value::String(stdout.trim().to_string())))
    }
}

#[async_trait]
impl NodeHandler for CommandNode {
    async fn produce(
        &self,
        ctx: &NodeContext,
        out: &mpsc::Sender<DataPacket>,
    ) -> Result<(), NodeError> {
        let payload = Self::run(ctx).await?;
        out.send(DataPacket::new(payload, ctx.node_id.clone()))
            .await
            .map_err(|_| NodeError::Fatal("command output channel closed".into()))
    }

    async fn process(
        &self,
        ctx: &NodeContext,
        packet: DataPacket,
    ) -> Result<Option<DataPacket>, NodeError> {
        let payload = Self::run(ctx).await?;
        let mut forwarded = packet.derive(payload);
        forwarded.source_node = ctx.node_id.clone();
        Ok(Some(forwarded))
    }
}
