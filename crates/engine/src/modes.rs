//! Batch and streaming per-node loops, plus the bridges that connect
//! nodes running in different modes.
//!
//! A node's work loop is chosen from its [`ModeConfig`]: batch accumulates
//! packets and flushes on size, timeout, or input close; streaming
//! processes each packet as it arrives. When an edge joins two nodes with
//! different modes, a [`ModeTransition`] task re-shapes the flow
//! (exploding list payloads, or grouping packets into lists).

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use nodes::DataPacket;

use crate::error::EngineError;
use crate::models::NodeSpec;

// ---------------------------------------------------------------------------
// ProcessingMode / ModeConfig
// ---------------------------------------------------------------------------

/// How a node consumes its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Accumulate, then process at flush points.
    #[default]
    Batch,
    /// Process each packet as it arrives.
    Streaming,
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch" => Ok(Self::Batch),
            "streaming" => Ok(Self::Streaming),
            other => Err(format!("unknown processing mode '{other}'")),
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProcessingMode::Batch => "batch",
            ProcessingMode::Streaming => "streaming",
        })
    }
}

/// Per-node execution mode configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeConfig {
    pub mode: ProcessingMode,
    /// Flush threshold in batch mode; 0 means size never triggers a flush.
    pub batch_size: usize,
    /// Flush deadline in batch mode; zero waits for input close.
    pub batch_timeout: Duration,
    /// Bridge buffer for streaming → batch grouping.
    pub streaming_buffer: usize,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::Batch,
            batch_size: 100,
            batch_timeout: Duration::from_secs(5),
            streaming_buffer: 10,
        }
    }
}

impl ModeConfig {
    /// Read a node's mode configuration from its config map
    /// (`execution_mode`, `batch_size`, `batch_timeout_ms`,
    /// `streaming_buffer`), defaulting anything unspecified.
    pub fn for_node(node: &NodeSpec) -> Self {
        let mut config = Self::default();

        if let Some(Value::String(mode)) = node.config.get("execution_mode") {
            if let Ok(mode) = mode.parse() {
                config.mode = mode;
            }
        }
        if let Some(size) = config_u64(node, "batch_size") {
            config.batch_size = size as usize;
        }
        if let Some(ms) = config_u64(node, "batch_timeout_ms") {
            config.batch_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = config_u64(node, "streaming_buffer") {
            config.streaming_buffer = size as usize;
        }

        config
    }
}

fn config_u64(node: &NodeSpec, key: &str) -> Option<u64> {
    match node.config.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// PacketProcessor / ModeHandler
// ---------------------------------------------------------------------------

/// The per-packet body a mode handler drives.
#[async_trait]
pub trait PacketProcessor: Send + Sync {
    async fn process(&self, packet: DataPacket) -> Result<Option<DataPacket>, EngineError>;
}

/// Adapter turning a plain closure into a [`PacketProcessor`].
pub struct FnProcessor<F>(pub F);

#[async_trait]
impl<F> PacketProcessor for FnProcessor<F>
where
    F: Fn(DataPacket) -> Result<Option<DataPacket>, EngineError> + Send + Sync,
{
    async fn process(&self, packet: DataPacket) -> Result<Option<DataPacket>, EngineError> {
        (self.0)(packet)
    }
}

/// A node's work loop strategy.
#[async_trait]
pub trait ModeHandler: Send + Sync {
    /// Drive the processor over the input until it closes, forwarding
    /// non-`None` results to `output`. Must observe `cancel` at every
    /// suspension point and return [`EngineError::Cancelled`] promptly.
    async fn run(
        &self,
        cancel: &CancellationToken,
        input: &mut mpsc::Receiver<DataPacket>,
        output: &mpsc::Sender<DataPacket>,
        processor: &dyn PacketProcessor,
    ) -> Result<(), EngineError>;
}

/// The handler matching a mode configuration.
pub fn handler_for(config: &ModeConfig) -> Box<dyn ModeHandler> {
    match config.mode {
        ProcessingMode::Batch => Box::new(BatchHandler {
            batch_size: config.batch_size,
            timeout: config.batch_timeout,
        }),
        ProcessingMode::Streaming => Box::new(StreamingHandler {
            buffer_size: config.streaming_buffer,
        }),
    }
}

// ---------------------------------------------------------------------------
// BatchHandler
// ---------------------------------------------------------------------------

/// Accumulates packets and processes them at flush points: buffer full,
/// timeout elapsed, or input closed.
pub struct BatchHandler {
    /// 0 disables the size trigger.
    pub batch_size: usize,
    /// Zero disables the timer; the batch then flushes on close only.
    pub timeout: Duration,
}

impl BatchHandler {
    async fn flush(
        &self,
        batch: &mut Vec<DataPacket>,
        output: &mpsc::Sender<DataPacket>,
        processor: &dyn PacketProcessor,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        for packet in batch.drain(..) {
            let result = processor.process(packet).await?;
            if let Some(forward) = result {
                tokio::select! {
                    sent = output.send(forward) => {
                        if sent.is_err() {
                            return Err(EngineError::ChannelClosed { edge: "output".into() });
                        }
                    }
                    () = cancel.cancelled() => return Err(EngineError::Cancelled),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ModeHandler for BatchHandler {
    async fn run(
        &self,
        cancel: &CancellationToken,
        input: &mut mpsc::Receiver<DataPacket>,
        output: &mpsc::Sender<DataPacket>,
        processor: &dyn PacketProcessor,
    ) -> Result<(), EngineError> {
        let mut batch: Vec<DataPacket> = Vec::new();
        let has_timeout = !self.timeout.is_zero();
        // The timer is re-armed after every flush it observes.
        let timer = tokio::time::sleep(if has_timeout {
            self.timeout
        } else {
            Duration::from_secs(86_400)
        });
        tokio::pin!(timer);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    // Best-effort residual flush, then report cancellation.
                    let _ = self.flush(&mut batch, output, processor, cancel).await;
                    return Err(EngineError::Cancelled);
                }

                maybe = input.recv() => match maybe {
                    Some(packet) => {
                        batch.push(packet);
                        if self.batch_size > 0 && batch.len() >= self.batch_size {
                            self.flush(&mut batch, output, processor, cancel).await?;
                            if has_timeout {
                                timer.as_mut().reset(Instant::now() + self.timeout);
                            }
                        }
                    }
                    None => {
                        // Input closed: flush the residual and end the node.
                        self.flush(&mut batch, output, processor, cancel).await?;
                        return Ok(());
                    }
                },

                () = &mut timer, if has_timeout => {
                    self.flush(&mut batch, output, processor, cancel).await?;
                    timer.as_mut().reset(Instant::now() + self.timeout);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// StreamingHandler
// ---------------------------------------------------------------------------

/// Processes one packet at a time; the only back-pressure is the
/// downstream channel's bound.
pub struct StreamingHandler {
    /// Grouping size used when this node bridges into a batch consumer.
    pub buffer_size: usize,
}

#[async_trait]
impl ModeHandler for StreamingHandler {
    async fn run(
        &self,
        cancel: &CancellationToken,
        input: &mut mpsc::Receiver<DataPacket>,
        output: &mpsc::Sender<DataPacket>,
        processor: &dyn PacketProcessor,
    ) -> Result<(), EngineError> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(EngineError::Cancelled),

                maybe = input.recv() => match maybe {
                    Some(packet) => {
                        let result = processor.process(packet).await?;
                        if let Some(forward) = result {
                            tokio::select! {
                                sent = output.send(forward) => {
                                    if sent.is_err() {
                                        return Err(EngineError::ChannelClosed {
                                            edge: "output".into(),
                                        });
                                    }
                                }
                                () = cancel.cancelled() => return Err(EngineError::Cancelled),
                            }
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ModeTransition
// ---------------------------------------------------------------------------

/// Bridge between a sender and receiver running in different modes.
pub struct ModeTransition {
    pub from_mode: ProcessingMode,
    pub to_mode: ProcessingMode,
    /// Grouping size for streaming → batch.
    pub buffer_size: usize,
}

impl ModeTransition {
    pub fn new(from_mode: ProcessingMode, to_mode: ProcessingMode, buffer_size: usize) -> Self {
        Self {
            from_mode,
            to_mode,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Pump packets from `input` to `output`, re-shaping them for the
    /// receiving mode.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        mut input: mpsc::Receiver<DataPacket>,
        output: mpsc::Sender<DataPacket>,
    ) -> Result<(), EngineError> {
        match (self.from_mode, self.to_mode) {
            (ProcessingMode::Batch, ProcessingMode::Streaming) => {
                batch_to_streaming(cancel, &mut input, &output).await
            }
            (ProcessingMode::Streaming, ProcessingMode::Batch) => {
                streaming_to_batch(cancel, &mut input, &output, self.buffer_size).await
            }
            _ => pass_through(cancel, &mut input, &output).await,
        }
    }
}

async fn forward(
    cancel: &CancellationToken,
    output: &mpsc::Sender<DataPacket>,
    packet: DataPacket,
) -> Result<(), EngineError> {
    tokio::select! {
        sent = output.send(packet) => {
            if sent.is_err() {
                return Err(EngineError::ChannelClosed { edge: "bridge".into() });
            }
            Ok(())
        }
        () = cancel.cancelled() => Err(EngineError::Cancelled),
    }
}

async fn pass_through(
    cancel: &CancellationToken,
    input: &mut mpsc::Receiver<DataPacket>,
    output: &mpsc::Sender<DataPacket>,
) -> Result<(), EngineError> {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
            maybe = input.recv() => match maybe {
                Some(packet) => forward(cancel, output, packet).await?,
                None => return Ok(()),
            },
        }
    }
}

/// Split list payloads into one packet per element, preserving the
/// sender's metadata and source.
async fn batch_to_streaming(
    cancel: &CancellationToken,
    input: &mut mpsc::Receiver<DataPacket>,
    output: &mpsc::Sender<DataPacket>,
) -> Result<(), EngineError> {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
            maybe = input.recv() => match maybe {
                Some(packet) => {
                    if let Value::Array(items) = &packet.payload {
                        for item in items {
                            forward(cancel, output, packet.derive(item.clone())).await?;
                        }
                    } else {
                        // Not a batch; pass through untouched.
                        forward(cancel, output, packet).await?;
                    }
                }
                None => return Ok(()),
            },
        }
    }
}

/// Group `buffer_size` packets into one list-payload packet inheriting the
/// first packet's metadata and source. Residual groups flush on input
/// close or cancellation.
async fn streaming_to_batch(
    cancel: &CancellationToken,
    input: &mut mpsc::Receiver<DataPacket>,
    output: &mpsc::Sender<DataPacket>,
    buffer_size: usize,
) -> Result<(), EngineError> {
    let mut group: Vec<DataPacket> = Vec::with_capacity(buffer_size);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                if !group.is_empty() {
                    let _ = forward(cancel, output, group_packet(&group)).await;
                }
                return Err(EngineError::Cancelled);
            }
            maybe = input.recv() => match maybe {
                Some(packet) => {
                    group.push(packet);
                    if group.len() >= buffer_size {
                        forward(cancel, output, group_packet(&group)).await?;
                        group.clear();
                    }
                }
                None => {
                    if !group.is_empty() {
                        forward(cancel, output, group_packet(&group)).await?;
                    }
                    return Ok(());
                }
            },
        }
    }
}

fn group_packet(group: &[DataPacket]) -> DataPacket {
    let payloads: Vec<Value> = group.iter().map(|p| p.payload.clone()).collect();
    group[0].derive(Value::Array(payloads))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity() -> FnProcessor<impl Fn(DataPacket) -> Result<Option<DataPacket>, EngineError>> {
        FnProcessor(|packet| Ok(Some(packet)))
    }

    fn packet(n: i64) -> DataPacket {
        DataPacket::new(json!(n), "up")
    }

    async fn drain(mut rx: mpsc::Receiver<DataPacket>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(p) = rx.recv().await {
            out.push(p.payload);
        }
        out
    }

    #[tokio::test]
    async fn batch_flushes_on_size_and_close() {
        let (in_tx, mut in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(16);
        for n in 0..5 {
            in_tx.send(packet(n)).await.unwrap();
        }
        drop(in_tx);

        let handler = BatchHandler {
            batch_size: 2,
            timeout: Duration::ZERO,
        };
        handler
            .run(&CancellationToken::new(), &mut in_rx, &out_tx, &identity())
            .await
            .unwrap();
        drop(out_tx);

        // Two full batches plus the residual flushed on close.
        assert_eq!(
            drain(out_rx).await,
            vec![json!(0), json!(1), json!(2), json!(3), json!(4)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn batch_flushes_on_timeout() {
        let (in_tx, mut in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);

        let handler = BatchHandler {
            batch_size: 100,
            timeout: Duration::from_millis(50),
        };
        let cancel = CancellationToken::new();
        let loop_task = tokio::spawn(async move {
            handler
                .run(&cancel, &mut in_rx, &out_tx, &identity())
                .await
        });

        in_tx.send(packet(1)).await.unwrap();
        in_tx.send(packet(2)).await.unwrap();

        // Well under batch_size, so only the timer can flush these.
        let first = out_rx.recv().await.unwrap();
        let second = out_rx.recv().await.unwrap();
        assert_eq!(first.payload, json!(1));
        assert_eq!(second.payload, json!(2));

        drop(in_tx);
        loop_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn batch_cancel_reports_cancelled() {
        let (_in_tx, mut in_rx) = mpsc::channel::<DataPacket>(1);
        let (out_tx, _out_rx) = mpsc::channel(1);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let handler = BatchHandler {
            batch_size: 10,
            timeout: Duration::ZERO,
        };
        let err = handler
            .run(&cancel, &mut in_rx, &out_tx, &identity())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn streaming_forwards_and_drops() {
        let (in_tx, mut in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(16);
        for n in 0..6 {
            in_tx.send(packet(n)).await.unwrap();
        }
        drop(in_tx);

        // Keep even payloads only.
        let keep_even = FnProcessor(|p: DataPacket| {
            if p.payload.as_i64().unwrap() % 2 == 0 {
                Ok(Some(p))
            } else {
                Ok(None)
            }
        });

        StreamingHandler { buffer_size: 10 }
            .run(&CancellationToken::new(), &mut in_rx, &out_tx, &keep_even)
            .await
            .unwrap();
        drop(out_tx);

        assert_eq!(drain(out_rx).await, vec![json!(0), json!(2), json!(4)]);
    }

    #[tokio::test]
    async fn processor_error_stops_the_loop() {
        let (in_tx, mut in_rx) = mpsc::channel(4);
        let (out_tx, _out_rx) = mpsc::channel(4);
        in_tx.send(packet(1)).await.unwrap();
        drop(in_tx);

        let failing = FnProcessor(|_| {
            Err(EngineError::Handler {
                node_id: "n".into(),
                source: nodes::NodeError::Fatal("boom".into()),
            })
        });

        let err = StreamingHandler { buffer_size: 1 }
            .run(&CancellationToken::new(), &mut in_rx, &out_tx, &failing)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Handler { .. }));
    }

    #[tokio::test]
    async fn batch_to_streaming_explodes_lists() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(16);

        let original = DataPacket::new(json!([1, 2, 3, 4]), "batcher")
            .with_metadata("origin", "test");
        in_tx.send(original).await.unwrap();
        drop(in_tx);

        ModeTransition::new(ProcessingMode::Batch, ProcessingMode::Streaming, 10)
            .run(&CancellationToken::new(), in_rx, out_tx)
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(p) = out_rx.recv().await {
            assert_eq!(p.source_node, "batcher");
            assert_eq!(p.metadata["origin"], "test");
            seen.push(p.payload);
        }
        assert_eq!(seen, vec![json!(1), json!(2), json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn batch_to_streaming_passes_scalars_through() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        in_tx.send(packet(7)).await.unwrap();
        drop(in_tx);

        ModeTransition::new(ProcessingMode::Batch, ProcessingMode::Streaming, 10)
            .run(&CancellationToken::new(), in_rx, out_tx)
            .await
            .unwrap();

        assert_eq!(out_rx.recv().await.unwrap().payload, json!(7));
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn streaming_to_batch_groups_with_residual() {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        for n in 0..5 {
            in_tx
                .send(DataPacket::new(json!(n), "streamer").with_metadata("seq", n.to_string()))
                .await
                .unwrap();
        }
        drop(in_tx);

        ModeTransition::new(ProcessingMode::Streaming, ProcessingMode::Batch, 2)
            .run(&CancellationToken::new(), in_rx, out_tx)
            .await
            .unwrap();

        let first = out_rx.recv().await.unwrap();
        assert_eq!(first.payload, json!([0, 1]));
        assert_eq!(first.source_node, "streamer");
        // Metadata comes from the first element of the group.
        assert_eq!(first.metadata["seq"], "0");

        assert_eq!(out_rx.recv().await.unwrap().payload, json!([2, 3]));
        assert_eq!(out_rx.recv().await.unwrap().payload, json!([4]));
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn same_mode_is_a_pass_through() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        in_tx.send(packet(1)).await.unwrap();
        in_tx.send(packet(2)).await.unwrap();
        drop(in_tx);

        ModeTransition::new(ProcessingMode::Batch, ProcessingMode::Batch, 10)
            .run(&CancellationToken::new(), in_rx, out_tx)
            .await
            .unwrap();

        assert_eq!(out_rx.recv().await.unwrap().payload, json!(1));
        assert_eq!(out_rx.recv().await.unwrap().payload, json!(2));
        assert!(out_rx.recv().await.is_none());
    }

    #[test]
    fn mode_config_reads_node_overrides() {
        let node = NodeSpec::new("n", "n", "transform")
            .with_config("execution_mode", json!("streaming"))
            .with_config("batch_size", json!(7))
            .with_config("batch_timeout_ms", json!(250))
            .with_config("streaming_buffer", json!("3"));

        let config = ModeConfig::for_node(&node);
        assert_eq!(config.mode, ProcessingMode::Streaming);
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.batch_timeout, Duration::from_millis(250));
        assert_eq!(config.streaming_buffer, 3);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ModeConfig::default();
        assert_eq!(config.mode, ProcessingMode::Batch);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.batch_timeout, Duration::from_secs(5));
        assert_eq!(config.streaming_buffer, 10);
    }
}
