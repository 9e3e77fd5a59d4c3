//! Optional per-edge payload transforms.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use nodes::DataPacket;

use crate::channel::ChannelManager;
use crate::error::EngineError;

/// Transforms a payload before it is sent along an edge.
pub trait DataTransformer: Send + Sync {
    /// Produce the transformed payload.
    ///
    /// # Errors
    /// Any error aborts the send; nothing reaches the edge.
    fn transform(&self, input: Value) -> Result<Value, EngineError>;
}

/// Adapter turning a plain function into a [`DataTransformer`].
pub struct FnTransformer<F>(pub F);

impl<F> DataTransformer for FnTransformer<F>
where
    F: Fn(Value) -> Result<Value, EngineError> + Send + Sync,
{
    fn transform(&self, input: Value) -> Result<Value, EngineError> {
        (self.0)(input)
    }
}

/// Transform a packet's payload and send the result along `from -> to`.
///
/// # Errors
/// Transformer failures surface unchanged; send failures per
/// [`ChannelManager::send`].
pub async fn transform_and_send(
    channels: &ChannelManager,
    from: &str,
    to: &str,
    packet: DataPacket,
    transformer: &dyn DataTransformer,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let payload = transformer.transform(packet.payload.clone())?;
    let mut transformed = packet;
    transformed.payload = payload;
    channels.send(from, to, transformed, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EdgeSpec;
    use serde_json::json;

    #[tokio::test]
    async fn transformed_payload_reaches_the_edge() {
        let channels = ChannelManager::new();
        channels.register(EdgeSpec::new("a", "b"));
        let mut rx = channels.take_receiver("a", "b").unwrap();

        let double = FnTransformer(|v: Value| Ok(json!(v.as_i64().unwrap() * 2)));

        transform_and_send(
            &channels,
            "a",
            "b",
            DataPacket::new(json!(21), "a"),
            &double,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(rx.recv().await.unwrap().payload, json!(42));
    }

    #[tokio::test]
    async fn transformer_error_aborts_the_send() {
        let channels = ChannelManager::new();
        channels.register(EdgeSpec::new("a", "b"));
        let mut rx = channels.take_receiver("a", "b").unwrap();

        let failing = FnTransformer(|_| {
            Err(EngineError::Handler {
                node_id: "a".into(),
                source: nodes::NodeError::Fatal("bad record".into()),
            })
        });

        let err = transform_and_send(
            &channels,
            "a",
            "b",
            DataPacket::new(json!(1), "a"),
            &failing,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::Handler { .. }));
        channels.close_all();
        assert!(rx.recv().await.is_none());
    }
}
