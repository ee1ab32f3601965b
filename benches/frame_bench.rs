use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use session_protocol::core::codec::FrameCodec;
use tokio_util::codec::{Decoder, Encoder};

#[allow(clippy::unwrap_used)]
fn bench_frame_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode_decode");
    let payload_sizes = [64usize, 512, 4096, 65536, 1024 * 1024];

    for &size in &payload_sizes {
        let payload = Bytes::from(vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            let mut codec = FrameCodec::default();
            b.iter_batched(
                || BytesMut::with_capacity(size + 4),
                |mut buf| {
                    codec.encode(payload.clone(), &mut buf).unwrap();
                    buf
                },
                BatchSize::SmallInput,
            )
        });

        let mut framed = BytesMut::new();
        FrameCodec::default()
            .encode(payload.clone(), &mut framed)
            .unwrap();
        group.bench_function(format!("decode_{size}b"), |b| {
            let mut codec = FrameCodec::default();
            b.iter_batched(
                || framed.clone(),
                |mut buf| {
                    let frame = codec.decode(&mut buf).unwrap();
                    assert!(frame.is_some());
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_split_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_split_reads");
    let mut stream = BytesMut::new();
    let mut codec = FrameCodec::default();
    for _ in 0..256 {
        codec.encode(Bytes::from(vec![1u8; 300]), &mut stream).unwrap();
    }
    group.throughput(Throughput::Bytes(stream.len() as u64));

    // Feed the stream in 97-byte chunks so most frames straddle a boundary.
    group.bench_function("256_frames_97b_chunks", |b| {
        b.iter(|| {
            let mut codec = FrameCodec::default();
            let mut buf = BytesMut::new();
            let mut frames = 0;
            for chunk in stream.chunks(97) {
                buf.extend_from_slice(chunk);
                while codec.decode(&mut buf).unwrap().is_some() {
                    frames += 1;
                }
            }
            assert_eq!(frames, 256);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_frame_encode_decode, bench_split_reads);
criterion_main!(benches);
