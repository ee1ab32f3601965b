use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use serde::{Deserialize, Serialize};
use session_protocol::core::serialization::SerializationFormat;
use session_protocol::protocol::envelope::{decode_frame, encode_envelope};
use session_protocol::protocol::{Message, MessageEnvelope, MessageRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Quote {
    symbol: String,
    bid: f64,
    ask: f64,
    depth: Vec<u32>,
}

fn quote() -> Quote {
    Quote {
        symbol: "a".repeat(16),
        bid: 101.25,
        ask: 101.5,
        depth: (0..64).collect(),
    }
}

#[allow(clippy::unwrap_used)]
fn bench_envelope_formats(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");

    for format in [
        SerializationFormat::Bincode,
        SerializationFormat::Json,
        SerializationFormat::MessagePack,
    ] {
        let mut registry = MessageRegistry::new();
        registry.register::<Quote, _>(0x0200, format).unwrap();

        group.bench_function(format!("encode_{}", format.name()), |b| {
            b.iter_batched(
                || MessageEnvelope::request(7, Message::new(quote())),
                |envelope| encode_envelope(&registry, &envelope).unwrap(),
                BatchSize::SmallInput,
            )
        });

        let bytes = encode_envelope(&registry, &MessageEnvelope::request(7, Message::new(quote()))).unwrap();
        group.bench_function(format!("decode_{}", format.name()), |b| {
            b.iter(|| {
                let frame = decode_frame(&registry, &bytes);
                assert!(frame.is_ok());
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_envelope_formats);
criterion_main!(benches);
