//! Snapshot tests for operator-facing messages and reports

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use twin_ota::memory::{FaultPlan, MemoryPartitionTable, MemoryTransport, RecordingRestart, synthetic_image};
use twin_ota::prelude::*;
use uuid::Uuid;

fn run(transport: MemoryTransport, table: MemoryPartitionTable) -> Result<UpdateOutcome> {
    let mut descriptor = UpdateDescriptor::new();
    descriptor.set_source("https://fw.example/app.bin")?;
    descriptor.set_trust("CERT")?;
    let mut driver = UpdateDriver::new(transport, table, RecordingRestart::new());
    Ok(driver.run_update(&mut descriptor))
}

fn failure_message(outcome: &UpdateOutcome) -> String {
    outcome
        .error()
        .map(ToString::to_string)
        .unwrap_or_else(|| "no failure".to_string())
}

#[test]
fn snapshot_missing_config_message() {
    insta::assert_snapshot!(
        UpdateError::MissingConfig("source_url").to_string(),
        @"Missing update configuration: source_url is not set"
    );
}

#[test]
fn snapshot_rejection_messages() -> Result<()> {
    let rollback = UpdateError::RollbackRejected {
        version: ImageVersion::from_label("2.0.0")?,
    };
    let latest = UpdateError::AlreadyLatest {
        version: ImageVersion::from_label("1.0.0")?,
    };
    insta::assert_snapshot!(
        rollback.to_string(),
        @"Image version 2.0.0 previously failed to boot, refusing to reinstall it"
    );
    insta::assert_snapshot!(latest.to_string(), @"Running firmware is already at version 1.0.0");
    Ok(())
}

#[test]
fn snapshot_transport_read_message() {
    let err = UpdateError::TransportRead {
        bytes_received: 3072,
        reason: "read failed: connection reset".to_string(),
    };
    insta::assert_snapshot!(
        err.to_string(),
        @"Transport read failed after 3072 bytes: read failed: connection reset"
    );
}

#[test]
fn snapshot_begin_write_failure() -> Result<()> {
    let image = synthetic_image("2.0.0", 4096)?;
    let table = MemoryPartitionTable::new("1.0.0")?.with_faults(FaultPlan {
        begin_write: true,
        ..FaultPlan::default()
    });
    let outcome = run(MemoryTransport::serving(&image, 1024), table)?;
    insta::assert_snapshot!(
        failure_message(&outcome),
        @"Partition write failed: cannot open ota_1: invalid partition state: erase failed"
    );
    Ok(())
}

#[test]
fn snapshot_boot_target_failure() -> Result<()> {
    let image = synthetic_image("2.0.0", 4096)?;
    let table = MemoryPartitionTable::new("1.0.0")?.with_faults(FaultPlan {
        set_boot_target: true,
        ..FaultPlan::default()
    });
    let outcome = run(MemoryTransport::serving(&image, 1024), table)?;
    insta::assert_snapshot!(
        failure_message(&outcome),
        @"Failed to set boot target: ota_1: invalid partition state: boot selection could not be persisted"
    );
    Ok(())
}

#[test]
fn snapshot_not_an_image() -> Result<()> {
    let outcome = run(
        MemoryTransport::serving(&[0x55; 1024], 512),
        MemoryPartitionTable::new("1.0.0")?,
    )?;
    insta::assert_snapshot!(
        failure_message(&outcome),
        @"Invalid argument: not a firmware image: magic byte 0x55, expected 0xE9"
    );
    Ok(())
}

#[test]
fn snapshot_truncated_header() -> Result<()> {
    let image = synthetic_image("2.0.0", 100)?;
    let outcome = run(
        MemoryTransport::serving(&image, 64),
        MemoryPartitionTable::new("1.0.0")?,
    )?;
    insta::assert_snapshot!(
        failure_message(&outcome),
        @"Invalid argument: stream ended after 100 bytes, before the 288-byte image header"
    );
    Ok(())
}

#[test]
fn snapshot_report_json() -> Result<()> {
    let report = UpdateReport {
        attempt_id: Uuid::nil(),
        started_at: DateTime::<Utc>::UNIX_EPOCH,
        target: Slot::Ota1.handle(),
        previous_version: Some(ImageVersion::from_label("1.0.0")?),
        new_version: ImageVersion::from_label("2.0.0")?,
        bytes_written: 4096,
        image_sha256: "9f86d081".to_string(),
        duration: Duration::from_millis(250),
    };
    insta::assert_snapshot!(serde_json::to_string_pretty(&report)?, @r#"
    {
      "attempt_id": "00000000-0000-0000-0000-000000000000",
      "started_at": "1970-01-01T00:00:00Z",
      "target": {
        "label": "ota_1",
        "subtype": 17,
        "address": 1638400,
        "size": 1572864
      },
      "previous_version": "1.0.0",
      "new_version": "2.0.0",
      "bytes_written": 4096,
      "image_sha256": "9f86d081",
      "duration": 250
    }
    "#);
    Ok(())
}

#[test]
fn snapshot_slot_names() -> Result<()> {
    insta::assert_snapshot!(serde_json::to_string(&Slot::ALL)?, @r#"["ota_0","ota_1"]"#);
    Ok(())
}

#[test]
fn report_target_uses_slot_labels() -> Result<()> {
    let image = synthetic_image("2.0.0", 4096)?;
    let outcome = run(
        MemoryTransport::serving(&image, 1024),
        MemoryPartitionTable::new("1.0.0")?,
    )?;
    let report = outcome.into_result()?;
    let value = serde_json::to_value(&report)?;

    let label = value["target"]["label"].as_str().unwrap_or_default();
    insta::assert_snapshot!(label, @"ota_1");
    assert_eq!(label.parse::<Slot>()?, Slot::Ota1);
    assert_eq!(value["new_version"], "2.0.0");
    assert_eq!(value["bytes_written"].as_u64(), Some(u64::try_from(image.len())?));
    Ok(())
}
