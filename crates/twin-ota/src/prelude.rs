//! Convenience re-exports for common firmware update types

pub use crate::config::DriverConfig;
pub use crate::descriptor::{TrustMaterial, UpdateDescriptor};
pub use crate::driver::{UpdateDriver, UpdateOutcome, UpdatePhase, UpdateReport};
pub use crate::error::{ErrorKind, ErrorSeverity, UpdateError};
pub use crate::image::{ImageMetadata, ImageVersion};
pub use crate::partition::{
    ImageSize, PartitionError, PartitionHandle, PartitionManager, Slot, WriteSession,
};
pub use crate::payload::{PayloadChanges, TwinScope};
pub use crate::restart::Restart;
pub use crate::transport::{Connection, ResponseHeaders, Transport, TransportError};
