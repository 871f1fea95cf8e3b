//! Fuzzes the streaming driver with arbitrary response bodies.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_streaming_update
#![no_main]
use libfuzzer_sys::fuzz_target;
use twin_ota::memory::{MemoryPartitionTable, MemoryTransport, RecordingRestart};
use twin_ota::{UpdateDescriptor, UpdateDriver};

fuzz_target!(|data: &[u8]| {
    let Some((&step, body)) = data.split_first() else {
        return;
    };
    let Ok(table) = MemoryPartitionTable::new("1.0.0") else {
        return;
    };
    let journal = table.journal();
    let transport = MemoryTransport::serving(body, usize::from(step).max(1));
    let log = transport.log();
    let mut descriptor = UpdateDescriptor::new();
    if descriptor.set_source("https://fw.example/app.bin").is_err()
        || descriptor.set_trust("CERT").is_err()
    {
        return;
    }

    let mut driver = UpdateDriver::new(transport, table, RecordingRestart::new());
    let outcome = driver.run_update(&mut descriptor);

    assert_eq!(log.closes(), 1);
    if !outcome.is_reboot_requested() {
        assert!(journal.boot_changes().is_empty());
    }
});
