//! Directory-backed dual-slot partition table
//!
//! Layout: `ota_0.bin`, `ota_1.bin` and `otadata.json`. Writes go to a
//! `.part` file that only replaces the slot image once finalized, and the
//! boot selection is replaced atomically. Opening the directory models a
//! restart: the recorded boot slot becomes the running slot.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use twin_ota::{
    AppDescriptor, HEADER_PROBE_LEN, ImageMetadata, ImageSize, ImageVersion, PartitionError,
    PartitionHandle, PartitionManager, Slot, WriteSession,
};

const OTADATA_FILE: &str = "otadata.json";

/// Persisted boot selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaData {
    /// Slot loaded on the next start
    pub boot: Slot,
    /// Slot whose image failed to boot
    pub last_invalid: Option<Slot>,
    /// Last change of the boot selection
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for OtaData {
    fn default() -> Self {
        Self {
            boot: Slot::Ota0,
            last_invalid: None,
            updated_at: None,
        }
    }
}

/// What one slot currently holds
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub slot: Slot,
    pub present: bool,
    pub size_bytes: u64,
    pub version: Option<ImageVersion>,
    pub project_name: Option<String>,
    pub running: bool,
    pub boot: bool,
    pub last_invalid: bool,
}

/// Snapshot of the whole table
#[derive(Debug, Clone, Serialize)]
pub struct TableStatus {
    pub dir: PathBuf,
    pub running: Slot,
    pub boot: Slot,
    pub last_invalid: Option<Slot>,
    pub updated_at: Option<DateTime<Utc>>,
    pub slots: Vec<SlotStatus>,
}

/// Partition manager over an image directory
#[derive(Debug)]
pub struct FileSlotManager {
    dir: PathBuf,
    running: Slot,
    data: OtaData,
}

impl FileSlotManager {
    /// Open (creating if needed) the slot directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PartitionError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let otadata = dir.join(OTADATA_FILE);
        let data = if otadata.exists() {
            let text = fs::read_to_string(&otadata)?;
            serde_json::from_str(&text).map_err(|e| {
                PartitionError::InvalidState(format!("{} is corrupt: {e}", otadata.display()))
            })?
        } else {
            OtaData::default()
        };
        debug!(dir = %dir.display(), boot = %data.boot, "Slot directory opened");
        Ok(Self {
            running: data.boot,
            dir,
            data,
        })
    }

    pub fn running_slot(&self) -> Slot {
        self.running
    }

    pub fn boot_slot(&self) -> Slot {
        self.data.boot
    }

    fn image_path(&self, slot: Slot) -> PathBuf {
        self.dir.join(format!("{}.bin", slot.label()))
    }

    fn slot_of(partition: &PartitionHandle) -> Result<Slot, PartitionError> {
        partition.label.parse()
    }

    fn persist(&mut self) -> Result<(), PartitionError> {
        let tmp = self.dir.join(format!("{OTADATA_FILE}.tmp"));
        let json = serde_json::to_vec_pretty(&self.data)
            .map_err(|e| PartitionError::InvalidState(e.to_string()))?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.dir.join(OTADATA_FILE))?;
        Ok(())
    }

    fn read_metadata(&self, slot: Slot) -> Result<ImageMetadata, PartitionError> {
        read_metadata(&self.image_path(slot))
    }

    /// Place `image` directly into `slot`; `invalid` also records it as the
    /// image that last failed to boot.
    pub fn seed(&mut self, slot: Slot, image: &[u8], invalid: bool) -> Result<(), PartitionError> {
        ImageMetadata::parse(image).map_err(|e| PartitionError::InvalidImage(e.to_string()))?;
        let path = self.image_path(slot);
        let tmp = path.with_extension("bin.part");
        fs::write(&tmp, image)?;
        fs::rename(&tmp, &path)?;
        if invalid {
            self.data.last_invalid = Some(slot);
        } else if self.data.last_invalid == Some(slot) {
            self.data.last_invalid = None;
        }
        self.persist()?;
        info!(%slot, bytes = image.len(), invalid, "Slot seeded");
        Ok(())
    }

    pub fn status(&self) -> TableStatus {
        let slots = Slot::ALL
            .into_iter()
            .map(|slot| {
                let path = self.image_path(slot);
                let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                let metadata = self.read_metadata(slot).ok();
                SlotStatus {
                    slot,
                    present: path.exists(),
                    size_bytes,
                    version: metadata.as_ref().map(|m| m.app.version),
                    project_name: metadata.map(|m| m.app.project_name),
                    running: slot == self.running,
                    boot: slot == self.data.boot,
                    last_invalid: self.data.last_invalid == Some(slot),
                }
            })
            .collect();
        TableStatus {
            dir: self.dir.clone(),
            running: self.running,
            boot: self.data.boot,
            last_invalid: self.data.last_invalid,
            updated_at: self.data.updated_at,
            slots,
        }
    }
}

fn read_metadata(path: &Path) -> Result<ImageMetadata, PartitionError> {
    let mut prefix = Vec::with_capacity(HEADER_PROBE_LEN);
    File::open(path)?
        .take(HEADER_PROBE_LEN as u64)
        .read_to_end(&mut prefix)?;
    ImageMetadata::parse(&prefix).map_err(|e| PartitionError::InvalidImage(e.to_string()))
}

impl PartitionManager for FileSlotManager {
    type Session = FileWriteSession;

    fn running(&self) -> PartitionHandle {
        self.running.handle()
    }

    fn last_invalid(&self) -> Option<PartitionHandle> {
        self.data.last_invalid.map(Slot::handle)
    }

    fn next_update_target(&self) -> Option<PartitionHandle> {
        Some(self.running.other().handle())
    }

    fn describe(&self, partition: &PartitionHandle) -> Result<AppDescriptor, PartitionError> {
        let slot = Self::slot_of(partition)?;
        Ok(self.read_metadata(slot)?.app)
    }

    fn begin_write(
        &mut self,
        partition: &PartitionHandle,
        size: ImageSize,
    ) -> Result<FileWriteSession, PartitionError> {
        let slot = Self::slot_of(partition)?;
        if slot == self.running {
            return Err(PartitionError::InvalidState(format!(
                "{slot} is the running slot"
            )));
        }
        if let ImageSize::Exact(len) = size {
            if len > u64::from(partition.size) {
                return Err(PartitionError::CapacityExceeded {
                    capacity: u64::from(partition.size),
                });
            }
        }

        let final_path = self.image_path(slot);
        if final_path.exists() {
            fs::remove_file(&final_path)?;
        }
        if self.data.last_invalid == Some(slot) {
            self.data.last_invalid = None;
            self.persist()?;
        }
        let part_path = final_path.with_extension("bin.part");
        let file = File::create(&part_path)?;
        debug!(path = %part_path.display(), "Slot erased for writing");
        Ok(FileWriteSession {
            writer: Some(BufWriter::new(file)),
            part_path,
            final_path,
            capacity: u64::from(partition.size),
            written: 0,
        })
    }

    fn set_boot_target(&mut self, partition: &PartitionHandle) -> Result<(), PartitionError> {
        let slot = Self::slot_of(partition)?;
        if !self.image_path(slot).exists() {
            return Err(PartitionError::InvalidState(format!(
                "{slot} holds no finalized image"
            )));
        }
        self.data.boot = slot;
        self.data.updated_at = Some(Utc::now());
        self.persist()?;
        info!(%slot, "Boot slot recorded");
        Ok(())
    }
}

/// Streaming write into a `.part` file
#[derive(Debug)]
pub struct FileWriteSession {
    writer: Option<BufWriter<File>>,
    part_path: PathBuf,
    final_path: PathBuf,
    capacity: u64,
    written: u64,
}

impl WriteSession for FileWriteSession {
    fn write(&mut self, data: &[u8]) -> Result<(), PartitionError> {
        let total = self.written.saturating_add(data.len() as u64);
        if total > self.capacity {
            return Err(PartitionError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PartitionError::InvalidState("session already closed".to_string()))?;
        writer.write_all(data)?;
        self.written = total;
        Ok(())
    }

    fn finalize(mut self) -> Result<(), PartitionError> {
        if self.written == 0 {
            return Err(PartitionError::NothingWritten);
        }
        let writer = self
            .writer
            .take()
            .ok_or_else(|| PartitionError::InvalidState("session already closed".to_string()))?;
        let file = writer
            .into_inner()
            .map_err(|e| PartitionError::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        read_metadata(&self.part_path)?;
        fs::rename(&self.part_path, &self.final_path)?;
        debug!(path = %self.final_path.display(), bytes = self.written, "Slot image finalized");
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl Drop for FileWriteSession {
    fn drop(&mut self) {
        if self.writer.take().is_some() || self.part_path.exists() {
            if let Err(e) = fs::remove_file(&self.part_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.part_path.display(), "Cannot remove abandoned image: {e}");
                }
            }
        }
    }
}
