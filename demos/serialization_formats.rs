//! Example: Per-Message Serialization Formats
//!
//! Every message type in a registry picks its own body format. This demo
//! registers the same shape under Bincode, JSON and MessagePack plus a
//! hand-written serializer, then compares what lands on the wire.
//!
//! Run with: `cargo run --example serialization_formats`

#![allow(clippy::uninlined_format_args)]

use serde::{Deserialize, Serialize};
use session_protocol::core::serialization::{SerializationFormat, Serializer};
use session_protocol::error::{ProtocolError, Result};
use session_protocol::protocol::envelope::{decode_frame, encode_envelope, InboundFrame};
use session_protocol::protocol::{MessageEnvelope, MessageRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    symbol: String,
    quantity: u32,
    limit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderJson(Order);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderPack(Order);

/// Plain text log line, no serde involved.
#[derive(Debug, Clone, PartialEq)]
struct LogLine(String);

struct Utf8;

impl Serializer<LogLine> for Utf8 {
    fn serialize(&self, value: &LogLine) -> Result<Vec<u8>> {
        Ok(value.0.as_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<LogLine> {
        String::from_utf8(bytes.to_vec())
            .map(LogLine)
            .map_err(|e| ProtocolError::DeserializeError(e.to_string()))
    }
}

fn roundtrip<T: std::fmt::Debug + PartialEq + Send + Sync + 'static>(
    registry: &MessageRegistry,
    label: &str,
    value: T,
    expected: &T,
) -> Result<usize> {
    let wire = encode_envelope(registry, &MessageEnvelope::command(value))?;
    let restored = match decode_frame(registry, &wire)? {
        InboundFrame::Application(envelope) => envelope.into_inner::<T>()?,
        InboundFrame::Handshake(_) => return Err(ProtocolError::InvalidState("unexpected handshake frame")),
    };

    println!(
        "   - {:12} | {:4} bytes | head {:02X?} | roundtrip {}",
        label,
        wire.len(),
        &wire[..wire.len().min(16)],
        if &restored == expected { "ok" } else { "MISMATCH" }
    );
    Ok(wire.len())
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    println!("=== Per-Message Serialization Formats ===\n");

    let mut registry = MessageRegistry::new();
    registry.register::<Order, _>(0x0101, SerializationFormat::Bincode)?;
    registry.register::<OrderJson, _>(0x0102, SerializationFormat::Json)?;
    registry.register::<OrderPack, _>(0x0103, SerializationFormat::MessagePack)?;
    registry.register::<LogLine, _>(0x0200, Utf8)?;

    for registration in registry.registrations() {
        println!("registered {:#06x} -> {}", registration.code(), registration.type_name());
    }
    println!();

    let order = Order {
        symbol: "ACME".to_string(),
        quantity: 250,
        limit: Some(17.5),
    };

    println!("1. SAME VALUE, THREE FORMATS");
    let bincode = roundtrip(&registry, "bincode", order.clone(), &order)?;
    let json = roundtrip(
        &registry,
        "json",
        OrderJson(order.clone()),
        &OrderJson(order.clone()),
    )?;
    let msgpack = roundtrip(
        &registry,
        "messagepack",
        OrderPack(order.clone()),
        &OrderPack(order.clone()),
    )?;
    println!();

    println!("2. SIZE COMPARISON (including the 11-byte envelope header)");
    println!("   - Bincode:     {} bytes (baseline)", bincode);
    println!(
        "   - MessagePack: {} bytes ({:+.1}%)",
        msgpack,
        ((msgpack as f64 / bincode as f64) - 1.0) * 100.0
    );
    println!(
        "   - JSON:        {} bytes ({:+.1}%)",
        json,
        ((json as f64 / bincode as f64) - 1.0) * 100.0
    );
    println!();

    println!("3. CUSTOM SERIALIZER");
    let line = LogLine("session ready".to_string());
    roundtrip(&registry, "utf8", line.clone(), &line)?;
    println!();

    println!("4. REGISTRY RULES");
    let duplicate = registry.register::<OrderJson, _>(0x0999, SerializationFormat::Json);
    println!("   - second registration of a type: {}", describe(duplicate));
    let reused = registry.register::<String, _>(0x0101, SerializationFormat::Json);
    println!("   - reused wire code:              {}", describe(reused));
    let unknown = encode_envelope(&registry, &MessageEnvelope::command(42u8));
    println!("   - encoding an unregistered type: {}", describe(unknown.map(|_| ())));
    let stray = decode_frame(&registry, &[0xFF, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    println!("   - decoding an unknown code:      {}", describe(stray.map(|_| ())));

    Ok(())
}

fn describe(result: Result<()>) -> String {
    match result {
        Ok(()) => "accepted".to_string(),
        Err(e) => format!("rejected ({e})"),
    }
}
