#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use reql_codec::FrameCodec;
use tokio_util::codec::Decoder;

/// A byte stream delivered in arbitrary read sizes.
#[derive(Debug, Arbitrary)]
struct ChunkedInput {
    max_frame_size: u16,
    chunks: Vec<Vec<u8>>,
}

fuzz_target!(|input: ChunkedInput| {
    let mut codec = FrameCodec::new().with_max_frame_size(usize::from(input.max_frame_size));
    let mut buf = BytesMut::new();

    for chunk in &input.chunks {
        buf.extend_from_slice(chunk);
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => assert!(frame.payload.len() <= codec.max_frame_size()),
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
    let _ = codec.decode_eof(&mut buf);
});
