#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use session_protocol::core::codec::FrameCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Drain every frame the input yields, then flush it as end of stream
    let mut codec = FrameCodec::new(11, 64 * 1024);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
    let _ = codec.decode_eof(&mut buf);
});
