//! Image header validation
//!
//! Decides whether a candidate image may be installed by comparing its
//! version block against the running image and the image that last failed
//! to boot. Comparison is byte-exact; semantic ordering is only logged.

use tracing::{debug, info, warn};

use crate::descriptor::UpdateDescriptor;
use crate::error::UpdateError;
use crate::image::ImageVersion;
use crate::partition::PartitionManager;

/// Versions the candidate image is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionContext {
    /// Version of the running image, if it could be read
    pub running: Option<ImageVersion>,
    /// Version of the image that last failed to boot, if any
    pub last_invalid: Option<ImageVersion>,
}

impl VersionContext {
    /// Create a context from known versions.
    pub fn new(running: Option<ImageVersion>, last_invalid: Option<ImageVersion>) -> Self {
        Self {
            running,
            last_invalid,
        }
    }

    /// Read both versions from the partition manager.
    ///
    /// An unreadable running image leaves `running` unset, which disables
    /// the same-version guard for this attempt.
    pub fn from_partitions<P: PartitionManager>(partitions: &P) -> Self {
        let running_partition = partitions.running();
        let running = match partitions.describe(&running_partition) {
            Ok(app) => {
                info!(version = %app.version, partition = %running_partition.label, "Running firmware version");
                Some(app.version)
            }
            Err(e) => {
                warn!(partition = %running_partition.label, "Running firmware version unavailable: {e}");
                None
            }
        };

        let last_invalid = partitions.last_invalid().and_then(|partition| {
            match partitions.describe(&partition) {
                Ok(app) => {
                    info!(version = %app.version, partition = %partition.label, "Last invalid firmware version");
                    Some(app.version)
                }
                Err(e) => {
                    debug!(partition = %partition.label, "Last invalid partition holds no image: {e}");
                    None
                }
            }
        });

        Self {
            running,
            last_invalid,
        }
    }
}

/// Check a candidate version against the rollback and same-version guards.
///
/// A rollback match wins over a same-version match. When the candidate
/// equals the running version, the descriptor records the up-to-date
/// verdict before the rejection is returned.
///
/// # Errors
///
/// - [`UpdateError::InvalidArgument`] if `candidate` is absent
/// - [`UpdateError::RollbackRejected`] if it equals the last invalid version
/// - [`UpdateError::AlreadyLatest`] if it equals the running version
pub fn validate_image_header(
    candidate: Option<&ImageVersion>,
    context: &VersionContext,
    descriptor: &mut UpdateDescriptor,
) -> Result<(), UpdateError> {
    let candidate =
        candidate.ok_or_else(|| UpdateError::invalid_argument("candidate image version is absent"))?;
    info!(version = %candidate, "New firmware version");

    if context.last_invalid.as_ref() == Some(candidate) {
        warn!(version = %candidate, "New version is the same as invalid version");
        warn!("Previously, there was an attempt to launch the firmware with this version, but it failed");
        warn!("The firmware has been rolled back to the previous version");
        return Err(UpdateError::RollbackRejected {
            version: *candidate,
        });
    }

    let Some(running) = context.running.as_ref() else {
        warn!("Running version unknown, skipping same-version check");
        return Ok(());
    };

    if running == candidate {
        info!(version = %candidate, "Current running version is the same as a new, no update needed");
        descriptor.mark_up_to_date();
        return Err(UpdateError::AlreadyLatest {
            version: *candidate,
        });
    }

    if let (Some(new), Some(current)) = (candidate.to_semver(), running.to_semver()) {
        if new < current {
            warn!(%new, %current, "Installing an older firmware version");
        }
    }
    Ok(())
}
