//! `twin-ota status`: show the slot table

use anyhow::Result;

use crate::config::AgentConfig;
use crate::error::CliError;
use crate::output;
use crate::slots::FileSlotManager;

pub fn execute(config: &AgentConfig, json: bool) -> Result<()> {
    let slots = FileSlotManager::open(&config.slots_dir).map_err(CliError::from)?;
    output::print_status(&slots.status(), json)
}
