//! # Serialization Formats
//!
//! Message body serializers. Every registered message type is paired with a
//! [`Serializer`] that turns values into bytes and back; the registry stores
//! them type-erased and picks the right one by wire code or type.
//!
//! ## Built-in formats
//! - **Bincode**: binary compact format (default, fastest)
//! - **JSON**: human-readable, handy for debugging and interop
//! - **MessagePack**: compact binary, self-describing
//!
//! [`SerializationFormat`] implements [`Serializer<T>`] for every serde type,
//! so registering a message is usually just
//! `builder.message::<Ping>(1, SerializationFormat::Bincode)`.
//!
//! Custom formats implement the trait directly:
//! ```
//! use session_protocol::core::serialization::Serializer;
//! use session_protocol::error::{ProtocolError, Result};
//!
//! struct Utf8;
//!
//! impl Serializer<String> for Utf8 {
//!     fn serialize(&self, value: &String) -> Result<Vec<u8>> {
//!         Ok(value.as_bytes().to_vec())
//!     }
//!
//!     fn deserialize(&self, bytes: &[u8]) -> Result<String> {
//!         String::from_utf8(bytes.to_vec())
//!             .map_err(|e| ProtocolError::DeserializeError(e.to_string()))
//!     }
//! }
//! ```

use crate::error::{ProtocolError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Converts values of one message type to and from bytes.
///
/// Implementations must satisfy `deserialize(serialize(v)) == v`.
pub trait Serializer<T>: Send + Sync + 'static {
    fn serialize(&self, value: &T) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<T>;
}

/// Supported serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Human-readable JSON format (debugging, interop)
    Json,
    /// Compact binary format (MessagePack, efficient)
    MessagePack,
}

impl SerializationFormat {
    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "Bincode",
            SerializationFormat::Json => "JSON",
            SerializationFormat::MessagePack => "MessagePack",
        }
    }

    /// Serialize a value with this format
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            SerializationFormat::Bincode => bincode::serialize(value)
                .map_err(|e| ProtocolError::SerializeError(e.to_string())),
            SerializationFormat::Json => {
                serde_json::to_vec(value).map_err(|e| ProtocolError::SerializeError(e.to_string()))
            }
            SerializationFormat::MessagePack => {
                rmp_serde::to_vec(value).map_err(|e| ProtocolError::SerializeError(e.to_string()))
            }
        }
    }

    /// Deserialize a value with this format
    pub fn decode<T: DeserializeOwned>(self, data: &[u8]) -> Result<T> {
        match self {
            SerializationFormat::Bincode => bincode::deserialize(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
            SerializationFormat::Json => serde_json::from_slice(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
            SerializationFormat::MessagePack => rmp_serde::from_slice(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
        }
    }
}

impl<T> Serializer<T> for SerializationFormat
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        self.encode(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        self.decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u32,
        label: String,
        data: Vec<u8>,
    }

    fn sample() -> Sample {
        Sample {
            id: 7,
            label: "sample".into(),
            data: vec![0xDE, 0xAD, 0xBE, 0xEF],
        }
    }

    #[test]
    fn test_format_names() {
        assert_eq!(SerializationFormat::Bincode.name(), "Bincode");
        assert_eq!(SerializationFormat::Json.name(), "JSON");
        assert_eq!(SerializationFormat::MessagePack.name(), "MessagePack");
    }

    #[test]
    fn test_default_format() {
        assert_eq!(SerializationFormat::default(), SerializationFormat::Bincode);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_every_format_through_serializer_trait() {
        for format in [
            SerializationFormat::Bincode,
            SerializationFormat::Json,
            SerializationFormat::MessagePack,
        ] {
            let bytes = Serializer::<Sample>::serialize(&format, &sample()).expect("serialize");
            let recovered: Sample = Serializer::deserialize(&format, &bytes).expect("deserialize");
            assert_eq!(recovered, sample(), "{} roundtrip", format.name());
        }
    }

    #[test]
    fn test_garbage_is_a_deserialize_error() {
        let result: Result<Sample> = SerializationFormat::Json.decode(b"{not json");
        assert!(matches!(result, Err(ProtocolError::DeserializeError(_))));
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_format_sizes() {
        let value = sample();

        let bincode_size = SerializationFormat::Bincode.encode(&value).expect("bincode").len();
        let json_size = SerializationFormat::Json.encode(&value).expect("json").len();
        let msgpack_size = SerializationFormat::MessagePack
            .encode(&value)
            .expect("msgpack")
            .len();

        println!("Bincode: {bincode_size} bytes");
        println!("JSON: {json_size} bytes");
        println!("MessagePack: {msgpack_size} bytes");

        // MessagePack should be more compact than JSON
        assert!(msgpack_size < json_size);
    }
}
