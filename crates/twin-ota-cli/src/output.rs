//! Output formatting for CLI responses

use std::path::Path;

use anyhow::{Error, Result};
use colored::*;
use serde_json::{Value, json};
use twin_ota::{ImageMetadata, UpdateError, UpdateReport};

use crate::error::CliError;
use crate::slots::TableStatus;

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn error_type_name(error: &Error) -> String {
    match error.downcast_ref::<CliError>() {
        Some(cli) => cli.type_name(),
        None => "Other".to_string(),
    }
}

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "type": error_type_name(error)
        }
    });
    match serde_json::to_string_pretty(&error_json) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to format error as JSON: {}", e),
    }
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

/// Print the report of a staged update
pub fn print_update_report(report: &UpdateReport, json: bool) -> Result<()> {
    if json {
        return print_json(&json!({
            "success": true,
            "result": "staged",
            "report": report
        }));
    }

    println!("{} {}", "✓".green(), "Firmware staged, restart required".bold());
    println!("  Attempt: {}", report.attempt_id.to_string().dimmed());
    println!("  Target: {}", report.target);
    match &report.previous_version {
        Some(previous) => println!("  Version: {} -> {}", previous, report.new_version.to_string().green()),
        None => println!("  Version: {}", report.new_version.to_string().green()),
    }
    println!("  Bytes written: {}", report.bytes_written);
    println!("  SHA-256: {}", report.image_sha256);
    println!("  Duration: {} ms", report.duration.as_millis());
    Ok(())
}

/// Print the already-latest verdict
pub fn print_up_to_date(verdict: &UpdateError, json: bool) -> Result<()> {
    if json {
        return print_json(&json!({
            "success": true,
            "result": "up_to_date",
            "message": verdict.to_string()
        }));
    }
    println!("{} {}", "✓".green(), verdict);
    Ok(())
}

/// Print the slot table
pub fn print_status(status: &TableStatus, json: bool) -> Result<()> {
    if json {
        return print_json(&json!({
            "success": true,
            "status": status
        }));
    }

    println!("{} {}", "Slot directory:".bold(), status.dir.display());
    println!("  Running: {}", status.running);
    println!("  Boot: {}", status.boot);
    if let Some(invalid) = status.last_invalid {
        println!("  Last invalid: {}", invalid.to_string().red());
    }
    if let Some(updated_at) = status.updated_at {
        println!("  Updated: {}", updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    for slot in &status.slots {
        let marker = if slot.running {
            "●".green()
        } else if slot.last_invalid {
            "●".red()
        } else if slot.present {
            "●".yellow()
        } else {
            "○".dimmed()
        };
        let version = slot
            .version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "empty".to_string());
        let mut flags = Vec::new();
        if slot.running {
            flags.push("running");
        }
        if slot.boot {
            flags.push("boot");
        }
        if slot.last_invalid {
            flags.push("invalid");
        }
        println!(
            "  {} {} {} ({} bytes) {}",
            marker,
            slot.slot.to_string().bold(),
            version,
            slot.size_bytes,
            flags.join(", ").dimmed()
        );
    }
    Ok(())
}

/// Print decoded image metadata
pub fn print_metadata(path: &Path, size_bytes: u64, metadata: &ImageMetadata, json: bool) -> Result<()> {
    let app = &metadata.app;
    let semver = app.version.to_semver().map(|v| v.to_string());
    if json {
        return print_json(&json!({
            "success": true,
            "image": {
                "path": path.display().to_string(),
                "size_bytes": size_bytes,
                "version": app.version,
                "semver": semver,
                "project_name": app.project_name,
                "secure_version": app.secure_version,
                "build_date": app.build_date,
                "build_time": app.build_time,
                "idf_version": app.idf_version,
                "elf_sha256": hex::encode(app.elf_sha256),
                "segment_count": metadata.header.segment_count,
                "entry_addr": format!("0x{:08x}", metadata.header.entry_addr),
                "chip_id": metadata.header.chip_id,
            }
        }));
    }

    println!("{} {}", "Image:".bold(), path.display());
    println!("  Size: {} bytes", size_bytes);
    println!("  Version: {}", app.version.to_string().green());
    if let Some(semver) = semver {
        println!("  Semver: {}", semver);
    }
    println!("  Project: {}", app.project_name);
    println!("  Secure version: {}", app.secure_version);
    println!("  Built: {} {}", app.build_date, app.build_time);
    println!("  SDK: {}", app.idf_version);
    println!("  Segments: {}", metadata.header.segment_count);
    println!("  Entry: 0x{:08x}", metadata.header.entry_addr);
    println!("  Chip id: {}", metadata.header.chip_id);
    Ok(())
}
