//! `twin-ota inspect`: decode an image file without installing it

use std::fs::File;
use std::io::Read;

use anyhow::{Context, Result};
use twin_ota::{HEADER_PROBE_LEN, ImageMetadata};

use crate::commands::InspectArgs;
use crate::error::CliError;
use crate::output;

pub fn execute(args: &InspectArgs, json: bool) -> Result<()> {
    let file = File::open(&args.image)
        .with_context(|| format!("cannot open {}", args.image.display()))?;
    let size_bytes = file.metadata()?.len();

    let mut prefix = Vec::with_capacity(HEADER_PROBE_LEN);
    file.take(HEADER_PROBE_LEN as u64).read_to_end(&mut prefix)?;
    let metadata =
        ImageMetadata::parse(&prefix).map_err(|e| CliError::InvalidImage(e.to_string()))?;

    output::print_metadata(&args.image, size_bytes, &metadata, json)
}
