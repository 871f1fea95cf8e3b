//! Command implementations for the twin-ota agent

pub mod inspect;
pub mod seed;
pub mod status;
pub mod update;

use std::path::PathBuf;

use clap::Args;
use twin_ota::{Slot, TwinScope};

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Device-twin JSON document carrying `firmware.url` / `firmware.pem`
    #[arg(long, value_name = "FILE")]
    pub twin: Option<PathBuf>,

    /// Whether the twin document is a partial patch or the complete twin
    #[arg(long, default_value = "partial", value_parser = parse_scope)]
    pub scope: TwinScope,

    /// Image URL, overrides the twin document
    #[arg(long)]
    pub url: Option<String>,

    /// PEM root certificate the server must chain to, overrides the twin document
    #[arg(long, value_name = "FILE")]
    pub pem_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Image file to decode
    pub image: PathBuf,
}

#[derive(Args, Debug)]
pub struct SeedArgs {
    /// Image file to place into the slot
    pub image: PathBuf,

    /// Target slot
    #[arg(long, default_value = "ota_0", value_parser = parse_slot)]
    pub slot: Slot,

    /// Also record the image as the one that last failed to boot
    #[arg(long)]
    pub invalid: bool,
}

fn parse_scope(s: &str) -> Result<TwinScope, String> {
    s.parse().map_err(|e: twin_ota::UpdateError| e.to_string())
}

fn parse_slot(s: &str) -> Result<Slot, String> {
    s.parse().map_err(|e: twin_ota::PartitionError| e.to_string())
}
