//! Firmware image metadata
//!
//! An application image starts with a 24-byte image header, followed by the
//! header of its first segment (8 bytes) and the 256-byte application
//! descriptor. The descriptor carries the version block that the update
//! policy compares. Everything here is decoded with explicit bounds checks;
//! nothing is reinterpreted in place.

use core::fmt;
use std::borrow::Cow;

use serde::{Serialize, Serializer};

use crate::error::UpdateError;

/// Length of the fixed image header
pub const IMAGE_HEADER_LEN: usize = 24;

/// Length of one segment header
pub const SEGMENT_HEADER_LEN: usize = 8;

/// Length of the application descriptor
pub const APP_DESCRIPTOR_LEN: usize = 256;

/// Offset of the application descriptor from the start of the image
pub const APP_DESCRIPTOR_OFFSET: usize = IMAGE_HEADER_LEN + SEGMENT_HEADER_LEN;

/// Bytes needed before the version descriptor can be extracted
pub const HEADER_PROBE_LEN: usize = APP_DESCRIPTOR_OFFSET + APP_DESCRIPTOR_LEN;

/// Width of the version block
pub const VERSION_LEN: usize = 32;

/// First byte of every application image
pub const IMAGE_MAGIC: u8 = 0xE9;

/// Magic word opening the application descriptor
pub const APP_DESCRIPTOR_MAGIC: u32 = 0xABCD_5432;

const HDR_SEGMENT_COUNT: usize = 1;
const HDR_SPI_MODE: usize = 2;
const HDR_ENTRY_ADDR: usize = 4;
const HDR_CHIP_ID: usize = 12;
const HDR_HASH_APPENDED: usize = 23;

const DESC_MAGIC: usize = 0;
const DESC_SECURE_VERSION: usize = 4;
const DESC_VERSION: usize = 16;
const DESC_PROJECT_NAME: usize = 48;
const DESC_TIME: usize = 80;
const DESC_DATE: usize = 96;
const DESC_IDF_VERSION: usize = 112;
const DESC_ELF_SHA256: usize = 144;
const DESC_FIELDS_END: usize = 176;

fn read_array<const N: usize>(
    bytes: &[u8],
    offset: usize,
    what: &str,
) -> Result<[u8; N], UpdateError> {
    offset
        .checked_add(N)
        .and_then(|end| bytes.get(offset..end))
        .and_then(|field| <[u8; N]>::try_from(field).ok())
        .ok_or_else(|| {
            UpdateError::invalid_argument(format!(
                "{what}: need {N} bytes at offset {offset}, buffer holds {}",
                bytes.len()
            ))
        })
}

fn read_u8(bytes: &[u8], offset: usize, what: &str) -> Result<u8, UpdateError> {
    let [value] = read_array::<1>(bytes, offset, what)?;
    Ok(value)
}

fn read_u16(bytes: &[u8], offset: usize, what: &str) -> Result<u16, UpdateError> {
    read_array::<2>(bytes, offset, what).map(u16::from_le_bytes)
}

fn read_u32(bytes: &[u8], offset: usize, what: &str) -> Result<u32, UpdateError> {
    read_array::<4>(bytes, offset, what).map(u32::from_le_bytes)
}

/// Text up to the first NUL byte.
fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(bytes.get(..end).unwrap_or(bytes)).into_owned()
}

/// Append `text` NUL-padded to `width` bytes, truncated to keep one terminator.
fn put_c_string(out: &mut Vec<u8>, text: &str, width: usize) {
    let keep = text.len().min(width.saturating_sub(1));
    out.extend(text.bytes().take(keep));
    out.resize(out.len().saturating_add(width.saturating_sub(keep)), 0);
}

/// Fixed-width firmware version block.
///
/// Versions are opaque: two versions are equal iff all 32 bytes are equal,
/// trailing padding included. No semantic ordering is applied when deciding
/// whether to install an image.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageVersion([u8; VERSION_LEN]);

impl ImageVersion {
    /// Wrap a raw version block.
    pub const fn from_bytes(bytes: [u8; VERSION_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a version block from a label, NUL-padded to the full width.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if the label is longer than
    /// the version block.
    pub fn from_label(label: &str) -> Result<Self, UpdateError> {
        let raw = label.as_bytes();
        if raw.len() > VERSION_LEN {
            return Err(UpdateError::invalid_argument(format!(
                "version label is {} bytes, the version block holds {VERSION_LEN}",
                raw.len()
            )));
        }
        let mut bytes = [0u8; VERSION_LEN];
        for (dst, src) in bytes.iter_mut().zip(raw) {
            *dst = *src;
        }
        Ok(Self(bytes))
    }

    /// Raw version block.
    pub fn as_bytes(&self) -> &[u8; VERSION_LEN] {
        &self.0
    }

    /// Printable label, up to the first NUL byte.
    pub fn label(&self) -> Cow<'_, str> {
        let end = self
            .0
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(VERSION_LEN);
        String::from_utf8_lossy(self.0.get(..end).unwrap_or(&self.0))
    }

    /// Interpret the label as a semantic version, if it is one.
    ///
    /// Informational only; install decisions never use it.
    pub fn to_semver(&self) -> Option<semver::Version> {
        let label = self.label();
        let trimmed = label.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        semver::Version::parse(trimmed).ok()
    }
}

impl fmt::Debug for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageVersion({:?})", self.label())
    }
}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for ImageVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.label())
    }
}

/// Fixed image header at the start of every application image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    /// Number of segments in the image
    pub segment_count: u8,
    /// Flash SPI mode
    pub spi_mode: u8,
    /// Entry point address
    pub entry_addr: u32,
    /// Target chip identifier
    pub chip_id: u16,
    /// Whether a SHA-256 digest is appended to the image
    pub hash_appended: bool,
}

impl ImageHeader {
    /// Decode the image header from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if `bytes` is shorter than
    /// [`IMAGE_HEADER_LEN`] or does not start with [`IMAGE_MAGIC`].
    pub fn decode(bytes: &[u8]) -> Result<Self, UpdateError> {
        if bytes.len() < IMAGE_HEADER_LEN {
            return Err(UpdateError::invalid_argument(format!(
                "image header needs {IMAGE_HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let magic = read_u8(bytes, 0, "image magic")?;
        if magic != IMAGE_MAGIC {
            return Err(UpdateError::invalid_argument(format!(
                "not a firmware image: magic byte 0x{magic:02X}, expected 0x{IMAGE_MAGIC:02X}"
            )));
        }
        Ok(Self {
            segment_count: read_u8(bytes, HDR_SEGMENT_COUNT, "segment count")?,
            spi_mode: read_u8(bytes, HDR_SPI_MODE, "spi mode")?,
            entry_addr: read_u32(bytes, HDR_ENTRY_ADDR, "entry address")?,
            chip_id: read_u16(bytes, HDR_CHIP_ID, "chip id")?,
            hash_appended: read_u8(bytes, HDR_HASH_APPENDED, "hash flag")? != 0,
        })
    }

    /// Encode into the fixed 24-byte layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IMAGE_HEADER_LEN);
        out.push(IMAGE_MAGIC);
        out.push(self.segment_count);
        out.push(self.spi_mode);
        out.push(0); // spi speed/size
        out.extend_from_slice(&self.entry_addr.to_le_bytes());
        out.extend_from_slice(&[0xEE, 0, 0, 0]); // wp pin, pin drive
        out.extend_from_slice(&self.chip_id.to_le_bytes());
        out.resize(HDR_HASH_APPENDED, 0);
        out.push(u8::from(self.hash_appended));
        out
    }
}

/// Header of one image segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Load address of the segment
    pub load_addr: u32,
    /// Length of the segment data
    pub data_len: u32,
}

impl SegmentHeader {
    /// Decode a segment header from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if `bytes` is too short.
    pub fn decode(bytes: &[u8]) -> Result<Self, UpdateError> {
        Ok(Self {
            load_addr: read_u32(bytes, 0, "segment load address")?,
            data_len: read_u32(bytes, 4, "segment length")?,
        })
    }

    /// Encode into the fixed 8-byte layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SEGMENT_HEADER_LEN);
        out.extend_from_slice(&self.load_addr.to_le_bytes());
        out.extend_from_slice(&self.data_len.to_le_bytes());
        out
    }
}

/// Application descriptor embedded in the first segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDescriptor {
    /// Anti-rollback security version
    pub secure_version: u32,
    /// Firmware version block
    pub version: ImageVersion,
    /// Project name
    pub project_name: String,
    /// Build time
    pub build_time: String,
    /// Build date
    pub build_date: String,
    /// SDK version the image was built with
    pub idf_version: String,
    /// SHA-256 of the application ELF file
    pub elf_sha256: [u8; 32],
}

impl AppDescriptor {
    /// Create a descriptor carrying `version` and empty build metadata.
    pub fn new(version: ImageVersion) -> Self {
        Self {
            secure_version: 0,
            version,
            project_name: String::new(),
            build_time: String::new(),
            build_date: String::new(),
            idf_version: String::new(),
            elf_sha256: [0; 32],
        }
    }

    /// Decode a descriptor from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if `bytes` is shorter than
    /// [`APP_DESCRIPTOR_LEN`] or the magic word does not match.
    pub fn decode(bytes: &[u8]) -> Result<Self, UpdateError> {
        if bytes.len() < APP_DESCRIPTOR_LEN {
            return Err(UpdateError::invalid_argument(format!(
                "application descriptor needs {APP_DESCRIPTOR_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let magic = read_u32(bytes, DESC_MAGIC, "descriptor magic")?;
        if magic != APP_DESCRIPTOR_MAGIC {
            return Err(UpdateError::invalid_argument(format!(
                "application descriptor magic 0x{magic:08X}, expected 0x{APP_DESCRIPTOR_MAGIC:08X}"
            )));
        }
        Ok(Self {
            secure_version: read_u32(bytes, DESC_SECURE_VERSION, "secure version")?,
            version: ImageVersion(read_array(bytes, DESC_VERSION, "version")?),
            project_name: c_string(&read_array::<32>(bytes, DESC_PROJECT_NAME, "project name")?),
            build_time: c_string(&read_array::<16>(bytes, DESC_TIME, "build time")?),
            build_date: c_string(&read_array::<16>(bytes, DESC_DATE, "build date")?),
            idf_version: c_string(&read_array::<32>(bytes, DESC_IDF_VERSION, "idf version")?),
            elf_sha256: read_array(bytes, DESC_ELF_SHA256, "elf digest")?,
        })
    }

    /// Encode into the fixed 256-byte layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(APP_DESCRIPTOR_LEN);
        out.extend_from_slice(&APP_DESCRIPTOR_MAGIC.to_le_bytes());
        out.extend_from_slice(&self.secure_version.to_le_bytes());
        out.resize(DESC_VERSION, 0);
        out.extend_from_slice(self.version.as_bytes());
        put_c_string(&mut out, &self.project_name, 32);
        put_c_string(&mut out, &self.build_time, 16);
        put_c_string(&mut out, &self.build_date, 16);
        put_c_string(&mut out, &self.idf_version, 32);
        out.extend_from_slice(&self.elf_sha256);
        debug_assert_eq!(out.len(), DESC_FIELDS_END);
        out.resize(APP_DESCRIPTOR_LEN, 0);
        out
    }
}

/// Everything the update policy can learn from the first bytes of an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    /// Image header
    pub header: ImageHeader,
    /// Header of the first segment
    pub first_segment: SegmentHeader,
    /// Application descriptor
    pub app: AppDescriptor,
}

impl ImageMetadata {
    /// Metadata for a single-segment image carrying `app`.
    pub fn for_app(app: AppDescriptor) -> Self {
        Self {
            header: ImageHeader {
                segment_count: 1,
                spi_mode: 2,
                entry_addr: 0x4008_0000,
                chip_id: 0,
                hash_appended: false,
            },
            first_segment: SegmentHeader {
                load_addr: 0x3F40_0020,
                data_len: APP_DESCRIPTOR_LEN as u32,
            },
            app,
        }
    }

    /// Decode the metadata from the leading bytes of an image.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if `prefix` is shorter than
    /// [`HEADER_PROBE_LEN`] or any magic value does not match.
    pub fn parse(prefix: &[u8]) -> Result<Self, UpdateError> {
        if prefix.len() < HEADER_PROBE_LEN {
            return Err(UpdateError::invalid_argument(format!(
                "image metadata needs {HEADER_PROBE_LEN} bytes, got {}",
                prefix.len()
            )));
        }
        let segment = prefix.get(IMAGE_HEADER_LEN..).unwrap_or_default();
        let descriptor = prefix.get(APP_DESCRIPTOR_OFFSET..).unwrap_or_default();
        Ok(Self {
            header: ImageHeader::decode(prefix)?,
            first_segment: SegmentHeader::decode(segment)?,
            app: AppDescriptor::decode(descriptor)?,
        })
    }

    /// Encode the first [`HEADER_PROBE_LEN`] bytes of an image.
    pub fn encode_prefix(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_PROBE_LEN);
        out.extend(self.header.encode());
        out.extend(self.first_segment.encode());
        out.extend(self.app.encode());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> Result<ImageMetadata, UpdateError> {
        let mut app = AppDescriptor::new(ImageVersion::from_label("1.4.2")?);
        app.project_name = "twin-agent".to_string();
        app.build_date = "Oct 19 2026".to_string();
        app.idf_version = "v5.2.1".to_string();
        app.secure_version = 3;
        Ok(ImageMetadata::for_app(app))
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(APP_DESCRIPTOR_OFFSET, 32);
        assert_eq!(HEADER_PROBE_LEN, 288);
    }

    #[test]
    fn test_encoded_prefix_decodes_back() -> Result<(), UpdateError> {
        let metadata = sample_metadata()?;
        let prefix = metadata.encode_prefix();
        assert_eq!(prefix.len(), HEADER_PROBE_LEN);
        assert_eq!(prefix.first(), Some(&IMAGE_MAGIC));

        let decoded = ImageMetadata::parse(&prefix)?;
        assert_eq!(decoded, metadata);
        assert_eq!(decoded.app.project_name, "twin-agent");
        assert_eq!(decoded.app.secure_version, 3);
        Ok(())
    }

    #[test]
    fn test_version_sits_at_fixed_offset() -> Result<(), UpdateError> {
        let prefix = sample_metadata()?.encode_prefix();
        let start = APP_DESCRIPTOR_OFFSET + DESC_VERSION;
        assert_eq!(prefix.get(start..start + 5), Some(&b"1.4.2"[..]));
        Ok(())
    }

    #[test]
    fn test_short_buffer_is_invalid_argument() -> Result<(), UpdateError> {
        let prefix = sample_metadata()?.encode_prefix();
        let short = prefix.get(..HEADER_PROBE_LEN - 1).unwrap_or_default();
        assert!(matches!(
            ImageMetadata::parse(short),
            Err(UpdateError::InvalidArgument(_))
        ));
        assert!(matches!(
            AppDescriptor::decode(&[0u8; 100]),
            Err(UpdateError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_bad_magic_is_rejected() -> Result<(), UpdateError> {
        let mut prefix = sample_metadata()?.encode_prefix();
        if let Some(first) = prefix.first_mut() {
            *first = 0x7F;
        }
        let err = ImageMetadata::parse(&prefix);
        assert!(matches!(err, Err(UpdateError::InvalidArgument(ref msg)) if msg.contains("magic")));

        let mut prefix = sample_metadata()?.encode_prefix();
        if let Some(byte) = prefix.get_mut(APP_DESCRIPTOR_OFFSET) {
            *byte = 0;
        }
        assert!(matches!(ImageMetadata::parse(&prefix), Err(_)));
        Ok(())
    }

    #[test]
    fn test_version_equality_covers_padding() -> Result<(), UpdateError> {
        let a = ImageVersion::from_label("1.0.0")?;
        let b = ImageVersion::from_label("1.0.0")?;
        assert_eq!(a, b);

        let mut raw = *a.as_bytes();
        if let Some(last) = raw.last_mut() {
            *last = b'x';
        }
        let padded_differently = ImageVersion::from_bytes(raw);
        assert_eq!(padded_differently.label(), "1.0.0");
        assert_ne!(a, padded_differently);
        Ok(())
    }

    #[test]
    fn test_version_label_limits() {
        assert!(matches!(ImageVersion::from_label(&"9".repeat(VERSION_LEN)), Ok(_)));
        assert!(matches!(
            ImageVersion::from_label(&"9".repeat(VERSION_LEN + 1)),
            Err(_)
        ));
    }

    #[test]
    fn test_version_display_and_semver() -> Result<(), UpdateError> {
        let v = ImageVersion::from_label("v2.1.0")?;
        assert_eq!(v.to_string(), "v2.1.0");
        assert_eq!(format!("{v:?}"), "ImageVersion(\"v2.1.0\")");
        assert_eq!(v.to_semver(), Some(semver::Version::new(2, 1, 0)));
        assert_eq!(ImageVersion::from_label("nightly-42")?.to_semver(), None);
        Ok(())
    }

    #[test]
    fn test_long_strings_are_truncated_with_terminator() -> Result<(), UpdateError> {
        let mut app = AppDescriptor::new(ImageVersion::from_label("1")?);
        app.build_time = "0123456789abcdefXYZ".to_string();
        let decoded = AppDescriptor::decode(&app.encode())?;
        assert_eq!(decoded.build_time, "0123456789abcde");
        Ok(())
    }
}
