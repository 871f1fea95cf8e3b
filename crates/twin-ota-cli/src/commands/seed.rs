//! `twin-ota seed`: place an image directly into a slot

use anyhow::{Context, Result};
use tracing::info;

use crate::commands::SeedArgs;
use crate::config::AgentConfig;
use crate::error::CliError;
use crate::output;
use crate::slots::FileSlotManager;

pub fn execute(args: &SeedArgs, config: &AgentConfig, json: bool) -> Result<()> {
    let image = std::fs::read(&args.image)
        .with_context(|| format!("cannot read {}", args.image.display()))?;
    let mut slots = FileSlotManager::open(&config.slots_dir).map_err(CliError::from)?;
    slots
        .seed(args.slot, &image, args.invalid)
        .map_err(CliError::from)?;
    info!(slot = %args.slot, "Seed complete");

    output::print_status(&slots.status(), json)
}
