//! Driver configuration

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Default transport read size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Largest accepted transport read size in bytes
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Default spacing of progress log lines in bytes
pub const DEFAULT_PROGRESS_LOG_INTERVAL: u64 = 64 * 1024;

/// Tunables of the streaming update driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Size of the reusable read buffer
    pub chunk_size: usize,
    /// Log progress every this many bytes; 0 disables progress logs
    pub progress_log_interval: u64,
    /// Treat a stream shorter than its declared length as a read failure
    pub enforce_content_length: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_log_interval: DEFAULT_PROGRESS_LOG_INTERVAL,
            enforce_content_length: true,
        }
    }
}

impl DriverConfig {
    /// Check the values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if `chunk_size` is outside
    /// `1..=MAX_CHUNK_SIZE`.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if !(1..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(UpdateError::invalid_argument(format!(
                "chunk_size must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        Ok(())
    }
}
