//! Dual-slot partition contract
//!
//! The update core never touches flash directly. It asks a
//! [`PartitionManager`] for the running, last-invalid and next-update
//! partitions, streams the image through a [`WriteSession`] and finally
//! switches the boot target.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::AppDescriptor;

/// Size of one application slot in the default layout
pub const SLOT_SIZE: u32 = 0x18_0000;

/// Flash address of the first application slot
pub const FIRST_SLOT_ADDRESS: u32 = 0x1_0000;

/// Application slot identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    /// First application slot
    #[serde(rename = "ota_0")]
    Ota0,
    /// Second application slot
    #[serde(rename = "ota_1")]
    Ota1,
}

impl Slot {
    /// Both slots, in flash order.
    pub const ALL: [Slot; 2] = [Slot::Ota0, Slot::Ota1];

    /// Get the other slot
    pub fn other(self) -> Self {
        match self {
            Slot::Ota0 => Slot::Ota1,
            Slot::Ota1 => Slot::Ota0,
        }
    }

    /// Zero-based slot index.
    pub fn index(self) -> u8 {
        match self {
            Slot::Ota0 => 0,
            Slot::Ota1 => 1,
        }
    }

    /// Partition-table label, `ota_0` or `ota_1`.
    pub fn label(self) -> &'static str {
        match self {
            Slot::Ota0 => "ota_0",
            Slot::Ota1 => "ota_1",
        }
    }

    /// Resolve a partition-table label.
    pub fn from_label(label: &str) -> Option<Self> {
        Slot::ALL.into_iter().find(|slot| slot.label() == label)
    }

    /// Handle for this slot in the default layout.
    pub fn handle(self) -> PartitionHandle {
        let index = u32::from(self.index());
        PartitionHandle {
            label: self.label().to_string(),
            subtype: 0x10_u8.saturating_add(self.index()),
            address: FIRST_SLOT_ADDRESS.saturating_add(index.saturating_mul(SLOT_SIZE)),
            size: SLOT_SIZE,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Slot {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Slot::from_label(s).ok_or_else(|| PartitionError::NotFound(s.to_string()))
    }
}

/// Reference to one partition owned by the partition manager
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionHandle {
    /// Partition-table label
    pub label: String,
    /// Application subtype (`0x10` for `ota_0`, ...)
    pub subtype: u8,
    /// Flash offset
    pub address: u32,
    /// Capacity in bytes
    pub size: u32,
}

impl fmt::Display for PartitionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (subtype 0x{:02x}, offset 0x{:x})",
            self.label, self.subtype, self.address
        )
    }
}

/// Expected image size passed when a write session is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageSize {
    /// Size unknown; the session must accept an unbounded stream
    #[default]
    Unknown,
    /// Exact size in bytes
    Exact(u64),
}

/// Errors raised by a partition manager
#[derive(Error, Debug)]
pub enum PartitionError {
    /// No partition with that label
    #[error("partition {0} not found")]
    NotFound(String),

    /// The operation is not allowed in the current state
    #[error("invalid partition state: {0}")]
    InvalidState(String),

    /// The written data is not a bootable image
    #[error("image failed verification: {0}")]
    InvalidImage(String),

    /// A session was finalized without any data
    #[error("no data was written")]
    NothingWritten,

    /// The write exceeds the partition capacity
    #[error("image exceeds partition capacity of {capacity} bytes")]
    CapacityExceeded {
        /// Partition capacity in bytes
        capacity: u64,
    },

    /// Backing storage failure
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An open, streaming write into one partition.
///
/// Dropping a session without calling [`WriteSession::finalize`] abandons
/// it. The partition is then left half written but is never made bootable.
pub trait WriteSession {
    /// Append bytes to the partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage rejects the write.
    fn write(&mut self, data: &[u8]) -> Result<(), PartitionError>;

    /// Close the session and verify the written image.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing was written or the image is not bootable.
    fn finalize(self) -> Result<(), PartitionError>
    where
        Self: Sized;

    /// Bytes accepted so far.
    fn bytes_written(&self) -> u64;
}

/// Boot-slot manager consumed by the update driver
pub trait PartitionManager {
    /// Write session type
    type Session: WriteSession;

    /// Partition the device booted from.
    fn running(&self) -> PartitionHandle;

    /// Partition holding the image that last failed to boot, if any.
    fn last_invalid(&self) -> Option<PartitionHandle>;

    /// Partition the next update should be written into.
    fn next_update_target(&self) -> Option<PartitionHandle>;

    /// Read the application descriptor of the image stored in `partition`.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition holds no readable image.
    fn describe(&self, partition: &PartitionHandle) -> Result<AppDescriptor, PartitionError>;

    /// Open a write session, erasing the previous contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition cannot be opened for writing.
    fn begin_write(
        &mut self,
        partition: &PartitionHandle,
        size: ImageSize,
    ) -> Result<Self::Session, PartitionError>;

    /// Make `partition` the boot target for the next restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition does not hold a finalized image or
    /// the boot selection cannot be persisted.
    fn set_boot_target(&mut self, partition: &PartitionHandle) -> Result<(), PartitionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_other() {
        assert_eq!(Slot::Ota0.other(), Slot::Ota1);
        assert_eq!(Slot::Ota1.other(), Slot::Ota0);
    }

    #[test]
    fn test_slot_display() {
        assert_eq!(format!("{}", Slot::Ota0), "ota_0");
        assert_eq!(format!("{}", Slot::Ota1), "ota_1");
    }

    #[test]
    fn test_slot_from_label() {
        assert_eq!(Slot::from_label("ota_1"), Some(Slot::Ota1));
        assert_eq!(Slot::from_label("factory"), None);
        assert!(matches!("ota_0".parse::<Slot>(), Ok(Slot::Ota0)));
        assert!(matches!("ota_2".parse::<Slot>(), Err(PartitionError::NotFound(_))));
    }

    #[test]
    fn test_default_layout_handles() {
        let first = Slot::Ota0.handle();
        let second = Slot::Ota1.handle();
        assert_eq!(first.subtype, 0x10);
        assert_eq!(second.subtype, 0x11);
        assert_eq!(first.address, 0x1_0000);
        assert_eq!(second.address, 0x19_0000);
        assert_eq!(
            second.to_string(),
            "ota_1 (subtype 0x11, offset 0x190000)"
        );
    }

    #[test]
    fn test_slot_serializes_as_label() -> Result<(), serde_json::Error> {
        for slot in Slot::ALL {
            let value = serde_json::to_value(slot)?;
            assert_eq!(value, slot.label());
            let back: Slot = serde_json::from_value(value)?;
            assert_eq!(back, slot);
            assert!(matches!(slot.label().parse::<Slot>(), Ok(parsed) if parsed == slot));
        }
        Ok(())
    }

    #[test]
    fn test_handle_round_trips_through_json() -> Result<(), serde_json::Error> {
        let handle = Slot::Ota1.handle();
        let json = serde_json::to_string(&handle)?;
        let back: PartitionHandle = serde_json::from_str(&json)?;
        assert_eq!(back, handle);
        assert_eq!(Slot::from_label(&back.label), Some(Slot::Ota1));
        Ok(())
    }

    #[test]
    fn test_image_size_default_is_unknown() {
        assert_eq!(ImageSize::default(), ImageSize::Unknown);
    }
}
