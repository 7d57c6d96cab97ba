//! Fuzz target: `LineDecoder`
//!
//! Drives arbitrary byte sequences into the streaming line decoder, split
//! into uneven chunks, and asserts that it never panics and recovers after
//! errors and resets.
//!
//! cargo fuzz run fuzz_line_decoder

#![no_main]

use admlink::proto::codec::LineDecoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = LineDecoder::new();

    for chunk in data.chunks(13) {
        if decoder.push(chunk).is_err() {
            decoder.reset();
            continue;
        }
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => assert!(frame.is_object()),
                Ok(None) => break,
                // A bad line is consumed; the decoder keeps going.
                Err(_) => {}
            }
        }
    }

    // After a reset the decoder must accept bytes cleanly again.
    decoder.reset();
    let _ = decoder.push(b"{\"cmd\":\"HTBM\"}\n");
    let _ = decoder.next_frame();
});
