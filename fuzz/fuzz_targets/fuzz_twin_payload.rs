//! Fuzzes device-twin payload handling in both scopes.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_twin_payload
#![no_main]
use libfuzzer_sys::fuzz_target;
use twin_ota::{TwinScope, UpdateDescriptor};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    for scope in [TwinScope::Partial, TwinScope::Complete] {
        let mut descriptor = UpdateDescriptor::new();
        if let Ok(changes) = descriptor.apply_update_from_payload(text, scope) {
            assert_eq!(changes.source_updated, descriptor.source_url().is_some());
            assert_eq!(changes.trust_updated, descriptor.trust_material().is_some());
        }
    }
});
