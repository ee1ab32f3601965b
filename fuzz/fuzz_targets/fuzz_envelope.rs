#![no_main]

use libfuzzer_sys::fuzz_target;
use serde::{Deserialize, Serialize};
use session_protocol::core::serialization::SerializationFormat;
use session_protocol::protocol::envelope::{decode_frame, encode_envelope, encode_handshake, InboundFrame};
use session_protocol::protocol::MessageRegistry;

#[derive(Serialize, Deserialize)]
struct Text(String);

#[derive(Serialize, Deserialize)]
struct Blob {
    id: u64,
    data: Vec<u8>,
}

fuzz_target!(|data: &[u8]| {
    let mut registry = MessageRegistry::new();
    if registry.register::<Text, _>(1, SerializationFormat::Json).is_err()
        || registry.register::<Blob, _>(2, SerializationFormat::Bincode).is_err()
    {
        return;
    }

    // Anything that decodes must encode again
    match decode_frame(&registry, data) {
        Ok(InboundFrame::Application(envelope)) => {
            let _ = encode_envelope(&registry, &envelope);
        }
        Ok(InboundFrame::Handshake(frame)) => {
            let _ = encode_handshake(&registry, &frame.message, frame.outcome);
        }
        Err(_) => {}
    }
});
