#![no_main]

use holt::connection::{scan_line, LineStatus};
use libfuzzer_sys::fuzz_target;

/// Drives `scan_line` the way `Connection::process_read` does: repeatedly call it over
/// the same buffer, advancing `checked_idx` on every `Ok`, until it reports `Bad` or
/// `Open`. Exercises the line scanner's own invariants (`checked_idx` monotonically
/// non-decreasing and never past `read_end`, no panics on arbitrary bytes) without needing
/// a real socket.
fuzz_target!(|data: &[u8]| {
    let mut buf = data.to_vec();
    let read_end = buf.len();
    let mut checked_idx = 0;

    loop {
        let before = checked_idx;
        match scan_line(&mut buf, &mut checked_idx, read_end) {
            LineStatus::Ok => {
                assert!(checked_idx >= before);
                assert!(checked_idx <= read_end);
            }
            LineStatus::Bad | LineStatus::Open => {
                assert!(checked_idx <= read_end);
                break;
            }
        }
    }
});
