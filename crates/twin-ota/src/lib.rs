//! Streaming over-the-air firmware updates for dual-partition devices
//!
//! This crate implements the update core of a device agent:
//! - An update descriptor fed from device-twin payloads
//! - Anti-rollback and same-version guards on the embedded image header
//! - A streaming driver that validates before writing a single byte
//! - Atomic boot-target switching followed by a restart
//!
//! # Architecture
//!
//! - [`descriptor`]: Source URL, trust material and the cached up-to-date verdict
//! - [`payload`]: Device-twin payload handling
//! - [`image`]: Bounds-checked decoding of the image header
//! - [`validator`]: Version policy applied to the image header
//! - [`driver`]: The streaming update state machine
//! - [`transport`], [`partition`], [`restart`]: Collaborator contracts
//! - [`memory`]: In-memory collaborators for tests and simulation
//! - [`config`]: Driver tunables
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```
//! use twin_ota::memory::{MemoryPartitionTable, MemoryTransport, RecordingRestart, synthetic_image};
//! use twin_ota::prelude::*;
//!
//! # fn main() -> Result<(), UpdateError> {
//! let image = synthetic_image("2.0.0", 64 * 1024)?;
//! let mut driver = UpdateDriver::new(
//!     MemoryTransport::serving(&image, 1024),
//!     MemoryPartitionTable::new("1.0.0")?,
//!     RecordingRestart::new(),
//! );
//!
//! let mut descriptor = UpdateDescriptor::new();
//! descriptor.apply_update_from_payload(
//!     r#"{"firmware": {"url": "https://fw.example/app.bin", "pem": "-----BEGIN CERTIFICATE-----"}}"#,
//!     TwinScope::Partial,
//! )?;
//!
//! match driver.run_update(&mut descriptor) {
//!     UpdateOutcome::RebootRequested(report) => println!("staged {} bytes", report.bytes_written),
//!     UpdateOutcome::Failed(e) => println!("update failed while {}: {e}", e.phase()),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod descriptor;
pub mod driver;
pub mod error;
pub mod image;
pub mod memory;
pub mod partition;
pub mod payload;
pub mod prelude;
pub mod restart;
pub mod transport;
pub mod validator;

pub use config::DriverConfig;
pub use descriptor::{TrustMaterial, UpdateDescriptor};
pub use driver::{UpdateDriver, UpdateOutcome, UpdatePhase, UpdateReport};
pub use error::{ErrorKind, ErrorSeverity, UpdateError};
pub use image::{
    AppDescriptor, HEADER_PROBE_LEN, ImageHeader, ImageMetadata, ImageVersion, SegmentHeader,
};
pub use partition::{
    ImageSize, PartitionError, PartitionHandle, PartitionManager, Slot, WriteSession,
};
pub use payload::{PayloadChanges, TwinScope};
pub use restart::Restart;
pub use transport::{Connection, ResponseHeaders, Transport, TransportError};
pub use validator::{VersionContext, validate_image_header};
