#![no_main]

use libfuzzer_sys::fuzz_target;
use reql_protocol::{FRAME_HEADER_SIZE, FrameHeader};

fuzz_target!(|data: &[u8]| {
    // Fuzz frame header parsing
    if let Ok(header) = FrameHeader::decode(data) {
        assert_eq!(data.len(), FRAME_HEADER_SIZE);
        assert_eq!(&header.to_bytes()[..], data);
    }
});
