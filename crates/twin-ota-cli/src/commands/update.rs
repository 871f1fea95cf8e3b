//! `twin-ota update`: fetch, validate and stage a new image

use anyhow::{Context, Result};
use tracing::{debug, info};
use twin_ota::{ErrorKind, UpdateDescriptor, UpdateDriver, UpdateOutcome};

use crate::commands::UpdateArgs;
use crate::config::AgentConfig;
use crate::error::CliError;
use crate::http::HttpsTransport;
use crate::output;
use crate::restart::ExitRestart;
use crate::slots::FileSlotManager;

/// Run one update attempt and return the process exit code.
pub fn execute(args: &UpdateArgs, config: &AgentConfig, json: bool) -> Result<u8> {
    let mut descriptor = build_descriptor(args)?;

    let slots = FileSlotManager::open(&config.slots_dir).map_err(CliError::from)?;
    debug!(running = %slots.running_slot(), dir = %config.slots_dir.display(), "Slots loaded");
    let mut driver = UpdateDriver::with_config(
        HttpsTransport::new(config.connect_timeout(), config.download_timeout()),
        slots,
        ExitRestart::new(),
        config.driver.clone(),
    )
    .map_err(CliError::from)?;

    match driver.run_update(&mut descriptor) {
        UpdateOutcome::RebootRequested(report) => {
            debug!(
                boot = %driver.partitions().boot_slot(),
                restart = driver.restart().requested(),
                "Update staged"
            );
            output::print_update_report(&report, json)?;
            Ok(config.restart_exit_code)
        }
        UpdateOutcome::Failed(err) if err.kind() == ErrorKind::AlreadyLatest => {
            info!("Nothing to install");
            output::print_up_to_date(&err, json)?;
            Ok(0)
        }
        UpdateOutcome::Failed(err) => Err(CliError::Update(err).into()),
    }
}

/// Twin document first, explicit flags override it.
fn build_descriptor(args: &UpdateArgs) -> Result<UpdateDescriptor> {
    let mut descriptor = UpdateDescriptor::new();

    if let Some(path) = &args.twin {
        let payload = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read twin document {}", path.display()))?;
        let changes = descriptor
            .apply_update_from_payload(&payload, args.scope)
            .map_err(CliError::from)?;
        debug!(
            source_updated = changes.source_updated,
            trust_updated = changes.trust_updated,
            "Twin document applied"
        );
    }

    if let Some(url) = &args.url {
        descriptor.set_source(url).map_err(CliError::from)?;
    }

    if let Some(path) = &args.pem_file {
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read certificate {}", path.display()))?;
        descriptor.set_trust(&pem).map_err(CliError::from)?;
    }

    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use twin_ota::TwinScope;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn flags_override_twin_document() -> TestResult {
        let dir = tempfile::tempdir()?;
        let twin = dir.path().join("twin.json");
        std::fs::write(
            &twin,
            r#"{"firmware":{"url":"https://twin.example/a.bin","pem":"TWIN-PEM"}}"#,
        )?;
        let args = UpdateArgs {
            twin: Some(twin),
            scope: TwinScope::Partial,
            url: Some("https://flag.example/b.bin".to_string()),
            pem_file: None,
        };

        let descriptor = build_descriptor(&args)?;
        assert_eq!(descriptor.source_url(), Some("https://flag.example/b.bin"));
        assert_eq!(
            descriptor.trust_material().map(|t| t.as_str()),
            Some("TWIN-PEM")
        );
        Ok(())
    }

    #[test]
    fn complete_scope_reads_desired_section() -> TestResult {
        let dir = tempfile::tempdir()?;
        let twin = dir.path().join("twin.json");
        std::fs::write(
            &twin,
            r#"{"desired":{"firmware":{"url":"https://twin.example/c.bin"}}}"#,
        )?;
        let args = UpdateArgs {
            twin: Some(twin),
            scope: TwinScope::Complete,
            url: None,
            pem_file: None,
        };

        let descriptor = build_descriptor(&args)?;
        assert_eq!(descriptor.source_url(), Some("https://twin.example/c.bin"));
        assert!(!descriptor.is_configured());
        Ok(())
    }

    #[test]
    fn malformed_twin_is_an_update_error() -> TestResult {
        let dir = tempfile::tempdir()?;
        let twin = dir.path().join("twin.json");
        std::fs::write(&twin, "{not json")?;
        let args = UpdateArgs {
            twin: Some(twin),
            scope: TwinScope::Partial,
            url: None,
            pem_file: None,
        };

        let Err(err) = build_descriptor(&args) else {
            return Err("malformed twin must be rejected".into());
        };
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Update(_))));
        Ok(())
    }
}
