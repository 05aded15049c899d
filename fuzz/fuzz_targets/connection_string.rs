#![no_main]

use libfuzzer_sys::fuzz_target;
use reql_client::ConnectOpts;

fuzz_target!(|data: &[u8]| {
    // Fuzz connection string parsing
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = ConnectOpts::from_connection_string(s);
    }
});
