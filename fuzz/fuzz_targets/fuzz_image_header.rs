//! Fuzzes image header and application descriptor decoding.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_image_header
#![no_main]
use libfuzzer_sys::fuzz_target;
use twin_ota::{HEADER_PROBE_LEN, ImageMetadata};

fuzz_target!(|data: &[u8]| {
    // Must never panic on arbitrary bytes; short input is always an error.
    let parsed = ImageMetadata::parse(data);
    if data.len() < HEADER_PROBE_LEN {
        assert!(parsed.is_err());
    }
});
