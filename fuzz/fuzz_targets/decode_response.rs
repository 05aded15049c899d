#![no_main]

use libfuzzer_sys::fuzz_target;
use reql_protocol::{Response, Token};

fuzz_target!(|data: &[u8]| {
    // Fuzz response body decoding
    if let Ok(response) = Response::decode(Token::new(1), data) {
        let _ = response.encode();
    }
});
