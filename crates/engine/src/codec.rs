//! Codec registry — named serializers for cross-type packet conversion.
//!
//! Codecs are consulted only when a receiver's requested payload type
//! differs from what the sender emitted; the bridge encodes then decodes
//! to perform the conversion. Registrations must complete before a run
//! starts; the registry is read-mostly afterwards.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use serde_json::Value;

use crate::error::EngineError;

/// A named encode/decode pair over packet payloads.
pub trait Codec: Send + Sync {
    /// Serialize a payload into bytes.
    ///
    /// # Errors
    /// [`EngineError::Codec`] on serialization failure.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, EngineError>;

    /// Deserialize bytes back into a payload.
    ///
    /// # Errors
    /// [`EngineError::Codec`] on malformed input.
    fn decode(&self, bytes: &[u8]) -> Result<Value, EngineError>;

    /// The registry name of this codec.
    fn name(&self) -> &'static str;
}

/// The default codec: JSON.
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, EngineError> {
        serde_json::to_vec(value).map_err(|source| EngineError::Codec {
            codec: self.name().to_string(),
            source,
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, EngineError> {
        serde_json::from_slice(bytes).map_err(|source| EngineError::Codec {
            codec: self.name().to_string(),
            source,
        })
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

static REGISTRY: LazyLock<RwLock<HashMap<String, Arc<dyn Codec>>>> = LazyLock::new(|| {
    let mut map: HashMap<String, Arc<dyn Codec>> = HashMap::new();
    map.insert("json".to_string(), Arc::new(JsonCodec));
    RwLock::new(map)
});

/// Register a codec under its name, replacing any previous registration.
/// Registration failures are never fatal; later lookups simply fall back.
pub fn register_codec(codec: Arc<dyn Codec>) {
    let name = codec.name().to_string();
    REGISTRY
        .write()
        .expect("codec registry lock poisoned")
        .insert(name, codec);
}

/// Look up a codec by name, falling back to the default (`json`) for
/// unknown names.
pub fn codec(name: &str) -> Arc<dyn Codec> {
    let registry = REGISTRY.read().expect("codec registry lock poisoned");
    registry
        .get(name)
        .or_else(|| registry.get("json"))
        .cloned()
        .expect("default codec is always registered")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip_is_identity() {
        let payloads = [
            json!(null),
            json!(true),
            json!(42),
            json!(4.25),
            json!("text"),
            json!([1, 2, 3]),
            json!({"nested": {"k": "v"}, "list": ["a"]}),
        ];

        let codec = JsonCodec;
        for payload in payloads {
            let bytes = codec.encode(&payload).unwrap();
            assert_eq!(codec.decode(&bytes).unwrap(), payload);
        }
    }

    #[test]
    fn unknown_name_falls_back_to_json() {
        assert_eq!(codec("no-such-codec").name(), "json");
    }

    #[test]
    fn decode_of_garbage_is_a_codec_error() {
        let err = JsonCodec.decode(b"{not json").unwrap_err();
        assert!(matches!(err, EngineError::Codec { codec, .. } if codec == "json"));
    }

    #[test]
    fn registration_replaces_lookup() {
        struct UpperCodec;
        impl Codec for UpperCodec {
            fn encode(&self, value: &Value) -> Result<Vec<u8>, EngineError> {
                JsonCodec.encode(value).map(|b| b.to_ascii_uppercase())
            }
            fn decode(&self, bytes: &[u8]) -> Result<Value, EngineError> {
                JsonCodec.decode(&bytes.to_ascii_lowercase())
            }
            fn name(&self) -> &'static str {
                "upper"
            }
        }

        register_codec(Arc::new(UpperCodec));
        assert_eq!(codec("upper").name(), "upper");

        let bytes = codec("upper").encode(&json!("a")).unwrap();
        assert_eq!(bytes, b"\"A\"");
    }
}
