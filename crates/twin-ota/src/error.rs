//! Error types for firmware update operations
//!
//! Every failure is terminal for the current update attempt. The variants
//! keep the failing phase distinct so callers can tell configuration
//! problems, transient transport failures and terminal version rejections
//! apart.

use core::fmt;

use thiserror::Error;

use crate::driver::UpdatePhase;
use crate::image::ImageVersion;

/// Errors that can end an update attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// Source URL or trust material has not been configured
    #[error("Missing update configuration: {0} is not set")]
    MissingConfig(&'static str),

    /// The transport connection could not be opened or produced no usable response
    #[error("Failed to open transport: {0}")]
    TransportOpen(String),

    /// The transport failed while the image body was streaming
    #[error("Transport read failed after {bytes_received} bytes: {reason}")]
    TransportRead {
        /// Bytes received before the failure
        bytes_received: u64,
        /// Underlying failure description
        reason: String,
    },

    /// The candidate image matches the version that previously failed to boot
    #[error("Image version {version} previously failed to boot, refusing to reinstall it")]
    RollbackRejected {
        /// Version of the rejected image
        version: ImageVersion,
    },

    /// The candidate image matches the running firmware
    #[error("Running firmware is already at version {version}")]
    AlreadyLatest {
        /// Version of the running firmware
        version: ImageVersion,
    },

    /// The partition manager has no partition to write the update into
    #[error("No update partition available: {0}")]
    NoUpdatePartition(String),

    /// Opening or writing the update partition failed
    #[error("Partition write failed: {0}")]
    PartitionWrite(String),

    /// Finalizing the written image failed
    #[error("Partition finalize failed: {0}")]
    PartitionFinalize(String),

    /// The finalized partition could not be made the boot target
    #[error("Failed to set boot target: {0}")]
    BootTarget(String),

    /// An argument or decoded structure is absent, empty or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl UpdateError {
    /// Create an invalid argument error with a message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        UpdateError::InvalidArgument(msg.into())
    }

    /// Get the failure class, for callers that key behaviour off it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdateError::MissingConfig(_) => ErrorKind::MissingConfig,
            UpdateError::TransportOpen(_) => ErrorKind::TransportOpenError,
            UpdateError::TransportRead { .. } => ErrorKind::TransportReadError,
            UpdateError::RollbackRejected { .. } => ErrorKind::RollbackRejected,
            UpdateError::AlreadyLatest { .. } => ErrorKind::AlreadyLatest,
            UpdateError::NoUpdatePartition(_) => ErrorKind::NoUpdatePartition,
            UpdateError::PartitionWrite(_) => ErrorKind::PartitionWriteError,
            UpdateError::PartitionFinalize(_) => ErrorKind::PartitionFinalizeError,
            UpdateError::BootTarget(_) => ErrorKind::BootTargetError,
            UpdateError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Get the update phase in which this error is raised.
    pub fn phase(&self) -> UpdatePhase {
        match self {
            UpdateError::MissingConfig(_) => UpdatePhase::Configuring,
            UpdateError::TransportOpen(_) => UpdatePhase::Connecting,
            UpdateError::NoUpdatePartition(_) => UpdatePhase::ResolvingPartition,
            UpdateError::TransportRead { .. } => UpdatePhase::Receiving,
            UpdateError::RollbackRejected { .. }
            | UpdateError::AlreadyLatest { .. }
            | UpdateError::InvalidArgument(_) => UpdatePhase::Validating,
            UpdateError::PartitionWrite(_) => UpdatePhase::Writing,
            UpdateError::PartitionFinalize(_) => UpdatePhase::Finalizing,
            UpdateError::BootTarget(_) => UpdatePhase::Activating,
        }
    }

    /// Check if this is a version policy verdict rather than a fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            UpdateError::RollbackRejected { .. } | UpdateError::AlreadyLatest { .. }
        )
    }

    /// Check if a fresh attempt could plausibly succeed without any change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpdateError::TransportOpen(_) | UpdateError::TransportRead { .. }
        )
    }

    /// Get the error severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            UpdateError::AlreadyLatest { .. } => ErrorSeverity::Info,
            UpdateError::RollbackRejected { .. }
            | UpdateError::TransportOpen(_)
            | UpdateError::TransportRead { .. } => ErrorSeverity::Warning,
            UpdateError::BootTarget(_) | UpdateError::NoUpdatePartition(_) => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::Error,
        }
    }
}

/// Failure classes of an update attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Source URL or trust material missing
    MissingConfig,
    /// Transport could not be opened
    TransportOpenError,
    /// Transport failed mid-stream
    TransportReadError,
    /// Candidate matches the last invalid image
    RollbackRejected,
    /// Candidate matches the running image
    AlreadyLatest,
    /// No partition to update into
    NoUpdatePartition,
    /// Partition write failed
    PartitionWriteError,
    /// Partition finalize failed
    PartitionFinalizeError,
    /// Boot target switch failed
    BootTargetError,
    /// Absent or malformed input
    InvalidArgument,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MissingConfig => "MissingConfig",
            ErrorKind::TransportOpenError => "TransportOpenError",
            ErrorKind::TransportReadError => "TransportReadError",
            ErrorKind::RollbackRejected => "RollbackRejected",
            ErrorKind::AlreadyLatest => "AlreadyLatest",
            ErrorKind::NoUpdatePartition => "NoUpdatePartition",
            ErrorKind::PartitionWriteError => "PartitionWriteError",
            ErrorKind::PartitionFinalizeError => "PartitionFinalizeError",
            ErrorKind::BootTargetError => "BootTargetError",
            ErrorKind::InvalidArgument => "InvalidArgument",
        };
        f.write_str(name)
    }
}

/// Severity of an update failure, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Not a fault; nothing needed to be done
    Info,
    /// Expected operational condition
    Warning,
    /// Fault in this attempt; running firmware untouched
    Error,
    /// Boot selection may be ambiguous or the layout is misconfigured
    Critical,
}
