//! twin-ota - firmware update agent
//!
//! Applies streaming firmware updates to a dual-slot image directory and
//! asks its supervisor for a restart once a new image is staged.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod config;
mod error;
mod http;
mod output;
mod restart;
mod slots;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{InspectArgs, SeedArgs, UpdateArgs};
use crate::config::AgentConfig;
use crate::error::CliError;

#[derive(Parser, Debug)]
#[command(name = "twin-ota")]
#[command(about = "Firmware update agent for dual-slot image directories")]
#[command(version)]
#[command(long_about = "
twin-ota downloads a firmware image over HTTPS, checks its embedded version
against the running and last-failed images, streams it into the inactive
slot and switches the boot selection.

After staging an image the agent exits with the configured restart code
(3 by default) so a supervisor can relaunch it on the new slot.
Use --json for machine-readable output.
")]
struct Cli {
    /// Output in JSON format for machine parsing
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Agent configuration file (YAML)
    #[arg(long, global = true, env = "TWIN_OTA_CONFIG")]
    config: Option<PathBuf>,

    /// Slot directory, overrides the configuration file
    #[arg(long, global = true, env = "TWIN_OTA_SLOTS_DIR")]
    slots_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch, validate and stage a new firmware image
    Update(UpdateArgs),

    /// Show the slot table
    Status,

    /// Decode an image file and print its metadata
    Inspect(InspectArgs),

    /// Place an image directly into a slot
    Seed(SeedArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("twin_ota={log_level}").into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }

            let exit_code = match e.downcast_ref::<CliError>() {
                Some(err) => err.exit_code(),
                None => 1,
            };
            ExitCode::from(exit_code)
        }
    }
}

fn load_config(cli: &Cli) -> Result<AgentConfig> {
    let mut config = AgentConfig::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.slots_dir {
        config.slots_dir = dir.clone();
    }
    Ok(config)
}

fn execute_command(cli: &Cli) -> Result<u8> {
    match &cli.command {
        Commands::Update(args) => {
            let config = load_config(cli)?;
            commands::update::execute(args, &config, cli.json)
        }
        Commands::Status => {
            let config = load_config(cli)?;
            commands::status::execute(&config, cli.json).map(|()| 0)
        }
        Commands::Inspect(args) => commands::inspect::execute(args, cli.json).map(|()| 0),
        Commands::Seed(args) => {
            let config = load_config(cli)?;
            commands::seed::execute(args, &config, cli.json).map(|()| 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twin_ota::{Slot, TwinScope};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_status_defaults() -> TestResult {
        let cli = Cli::try_parse_from(["twin-ota", "status"])?;
        assert!(!cli.json);
        assert_eq!(cli.verbose, 0);
        assert!(matches!(cli.command, Commands::Status));
        Ok(())
    }

    #[test]
    fn parse_global_flags_after_subcommand() -> TestResult {
        let cli = Cli::try_parse_from(["twin-ota", "status", "--json", "-vv"])?;
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        Ok(())
    }

    #[test]
    fn parse_update_defaults_to_partial_scope() -> TestResult {
        let cli = Cli::try_parse_from([
            "twin-ota",
            "update",
            "--url",
            "https://fw.example/app.bin",
            "--pem-file",
            "root.pem",
        ])?;
        match &cli.command {
            Commands::Update(args) => {
                assert_eq!(args.scope, TwinScope::Partial);
                assert_eq!(args.url.as_deref(), Some("https://fw.example/app.bin"));
                assert_eq!(args.pem_file, Some(PathBuf::from("root.pem")));
                assert!(args.twin.is_none());
            }
            _ => return Err("expected Update command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_update_complete_scope() -> TestResult {
        let cli = Cli::try_parse_from([
            "twin-ota", "update", "--twin", "twin.json", "--scope", "complete",
        ])?;
        match &cli.command {
            Commands::Update(args) => assert_eq!(args.scope, TwinScope::Complete),
            _ => return Err("expected Update command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_rejects_unknown_scope() -> TestResult {
        let Err(err) = Cli::try_parse_from(["twin-ota", "update", "--scope", "reported"]) else {
            return Err("unknown scope must be rejected".into());
        };
        assert!(err.to_string().contains("unknown twin scope"));
        Ok(())
    }

    #[test]
    fn parse_seed_slot_and_invalid() -> TestResult {
        let cli = Cli::try_parse_from([
            "twin-ota", "seed", "app.bin", "--slot", "ota_1", "--invalid",
        ])?;
        match &cli.command {
            Commands::Seed(args) => {
                assert_eq!(args.slot, Slot::Ota1);
                assert!(args.invalid);
                assert_eq!(args.image, PathBuf::from("app.bin"));
            }
            _ => return Err("expected Seed command".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_seed_rejects_unknown_slot() -> TestResult {
        let Err(err) = Cli::try_parse_from(["twin-ota", "seed", "app.bin", "--slot", "factory"])
        else {
            return Err("unknown slot must be rejected".into());
        };
        assert!(err.to_string().contains("partition factory not found"));
        Ok(())
    }

    #[test]
    fn slots_dir_flag_overrides_config() -> TestResult {
        let cli = Cli::try_parse_from(["twin-ota", "--slots-dir", "/tmp/slots", "status"])?;
        let config = load_config(&cli)?;
        assert_eq!(config.slots_dir, PathBuf::from("/tmp/slots"));
        Ok(())
    }
}
