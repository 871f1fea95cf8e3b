//! Streaming update driver
//!
//! Runs one update attempt end to end: open the transport, resolve the
//! target partition, stage bytes until the image header can be decoded,
//! validate it once, then stream every byte into the target partition,
//! finalize, switch the boot target and restart.
//!
//! Nothing is written before the header has been accepted. Every failure
//! leaves the running partition and the boot target untouched.

use core::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::DriverConfig;
use crate::descriptor::UpdateDescriptor;
use crate::error::{ErrorSeverity, UpdateError};
use crate::image::{HEADER_PROBE_LEN, ImageMetadata, ImageVersion};
use crate::partition::{ImageSize, PartitionHandle, PartitionManager, WriteSession};
use crate::restart::Restart;
use crate::transport::{Connection, ConnectionGuard, Transport};
use crate::validator::{VersionContext, validate_image_header};

/// Phases of an update attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdatePhase {
    /// Checking the descriptor
    Configuring,
    /// Opening the transport and fetching headers
    Connecting,
    /// Looking up the partition to write
    ResolvingPartition,
    /// Reading the image body
    Receiving,
    /// Checking the image header against version policy
    Validating,
    /// Writing into the target partition
    Writing,
    /// Closing the write session
    Finalizing,
    /// Switching the boot target
    Activating,
    /// Restarting into the new image
    Restarting,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdatePhase::Configuring => "configuring",
            UpdatePhase::Connecting => "connecting",
            UpdatePhase::ResolvingPartition => "resolving partition",
            UpdatePhase::Receiving => "receiving",
            UpdatePhase::Validating => "validating",
            UpdatePhase::Writing => "writing",
            UpdatePhase::Finalizing => "finalizing",
            UpdatePhase::Activating => "activating",
            UpdatePhase::Restarting => "restarting",
        };
        f.write_str(name)
    }
}

/// Summary of a staged update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    /// Identifier of this attempt, also attached to its log span
    pub attempt_id: Uuid,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// Partition the image was written into
    pub target: PartitionHandle,

    /// Version of the running image, if it could be read
    pub previous_version: Option<ImageVersion>,

    /// Version of the written image
    pub new_version: ImageVersion,

    /// Bytes written into the target partition
    pub bytes_written: u64,

    /// Hex SHA-256 of the written bytes
    pub image_sha256: String,

    /// Time from start until the boot target was switched
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

mod duration_serde {
    use serde::{Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }
}

/// Result of [`UpdateDriver::run_update`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The image was staged and a restart was requested
    RebootRequested(UpdateReport),
    /// The attempt ended without touching the boot target
    Failed(UpdateError),
}

impl UpdateOutcome {
    /// Check if a restart was requested
    pub fn is_reboot_requested(&self) -> bool {
        matches!(self, UpdateOutcome::RebootRequested(_))
    }

    /// Report of the staged update
    pub fn report(&self) -> Option<&UpdateReport> {
        match self {
            UpdateOutcome::RebootRequested(report) => Some(report),
            UpdateOutcome::Failed(_) => None,
        }
    }

    /// Failure reason
    pub fn error(&self) -> Option<&UpdateError> {
        match self {
            UpdateOutcome::RebootRequested(_) => None,
            UpdateOutcome::Failed(e) => Some(e),
        }
    }

    /// Convert into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the failure reason of a failed attempt.
    pub fn into_result(self) -> Result<UpdateReport, UpdateError> {
        match self {
            UpdateOutcome::RebootRequested(report) => Ok(report),
            UpdateOutcome::Failed(e) => Err(e),
        }
    }
}

/// What a successful attempt left behind
struct StagedImage {
    target: PartitionHandle,
    previous_version: Option<ImageVersion>,
    new_version: ImageVersion,
    bytes_written: u64,
    image_sha256: String,
}

enum SessionState<S> {
    AwaitingHeader {
        staged: Vec<u8>,
    },
    Committing {
        writer: S,
        previous_version: Option<ImageVersion>,
        new_version: ImageVersion,
    },
}

/// Per-attempt streaming state
struct UpdateSession<S> {
    target: PartitionHandle,
    state: SessionState<S>,
    bytes_received: u64,
    bytes_written: u64,
    hasher: Sha256,
    progress_interval: u64,
    next_progress: u64,
}

impl<S: WriteSession> UpdateSession<S> {
    fn new(target: PartitionHandle, progress_interval: u64) -> Self {
        Self {
            target,
            state: SessionState::AwaitingHeader {
                staged: Vec::with_capacity(HEADER_PROBE_LEN),
            },
            bytes_received: 0,
            bytes_written: 0,
            hasher: Sha256::new(),
            progress_interval,
            next_progress: progress_interval,
        }
    }

    /// Take one received chunk.
    ///
    /// Before validation the chunk is staged. Once the staged prefix covers
    /// the header it is validated, the write session is opened and the
    /// whole prefix is written. Afterwards chunks go straight through.
    fn accept<P>(
        &mut self,
        chunk: &[u8],
        descriptor: &mut UpdateDescriptor,
        partitions: &mut P,
    ) -> Result<(), UpdateError>
    where
        P: PartitionManager<Session = S>,
    {
        self.bytes_received = self.bytes_received.saturating_add(chunk.len() as u64);

        let staged = match &mut self.state {
            SessionState::Committing { writer, .. } => {
                return write_chunk(
                    writer,
                    &mut self.hasher,
                    &mut self.bytes_written,
                    chunk,
                    &self.target,
                );
            }
            SessionState::AwaitingHeader { staged } => {
                staged.extend_from_slice(chunk);
                if staged.len() < HEADER_PROBE_LEN {
                    debug!(
                        staged = staged.len(),
                        needed = HEADER_PROBE_LEN,
                        "Waiting for the rest of the image header"
                    );
                    return Ok(());
                }
                std::mem::take(staged)
            }
        };

        let metadata = ImageMetadata::parse(&staged)?;
        let context = VersionContext::from_partitions(&*partitions);
        validate_image_header(Some(&metadata.app.version), &context, descriptor)?;

        let mut writer = partitions
            .begin_write(&self.target, ImageSize::Unknown)
            .map_err(|e| {
                UpdateError::PartitionWrite(format!("cannot open {}: {e}", self.target.label))
            })?;
        info!(partition = %self.target.label, "Write session opened");

        write_chunk(
            &mut writer,
            &mut self.hasher,
            &mut self.bytes_written,
            &staged,
            &self.target,
        )?;
        self.state = SessionState::Committing {
            writer,
            previous_version: context.running,
            new_version: metadata.app.version,
        };
        Ok(())
    }

    fn log_progress(&mut self) {
        if self.progress_interval == 0 {
            return;
        }
        if self.bytes_written >= self.next_progress {
            info!(bytes_written = self.bytes_written, "Written image length");
            while self.next_progress <= self.bytes_written {
                self.next_progress = self.next_progress.saturating_add(self.progress_interval);
            }
        }
    }

    /// Hand over the open writer at a clean end of stream.
    fn finish(self) -> Result<(S, StagedImage), UpdateError> {
        match self.state {
            SessionState::AwaitingHeader { staged } if staged.is_empty() => {
                Err(UpdateError::invalid_argument("image stream is empty"))
            }
            SessionState::AwaitingHeader { staged } => Err(UpdateError::invalid_argument(format!(
                "stream ended after {} bytes, before the {HEADER_PROBE_LEN}-byte image header",
                staged.len()
            ))),
            SessionState::Committing {
                writer,
                previous_version,
                new_version,
            } => Ok((
                writer,
                StagedImage {
                    target: self.target,
                    previous_version,
                    new_version,
                    bytes_written: self.bytes_written,
                    image_sha256: hex::encode(self.hasher.finalize()),
                },
            )),
        }
    }
}

fn write_chunk<S: WriteSession>(
    writer: &mut S,
    hasher: &mut Sha256,
    bytes_written: &mut u64,
    chunk: &[u8],
    target: &PartitionHandle,
) -> Result<(), UpdateError> {
    writer.write(chunk).map_err(|e| {
        UpdateError::PartitionWrite(format!(
            "{} after {bytes_written} bytes: {e}",
            target.label
        ))
    })?;
    hasher.update(chunk);
    *bytes_written = bytes_written.saturating_add(chunk.len() as u64);
    debug!(bytes_written = *bytes_written, "Chunk written");
    Ok(())
}

/// Drives one update attempt at a time against its collaborators
pub struct UpdateDriver<T, P, R> {
    transport: T,
    partitions: P,
    restart: R,
    config: DriverConfig,
}

impl<T, P, R> UpdateDriver<T, P, R>
where
    T: Transport,
    P: PartitionManager,
    R: Restart,
{
    /// Create a driver with the default configuration
    pub fn new(transport: T, partitions: P, restart: R) -> Self {
        Self {
            transport,
            partitions,
            restart,
            config: DriverConfig::default(),
        }
    }

    /// Create a driver with a custom configuration
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if the configuration is invalid.
    pub fn with_config(
        transport: T,
        partitions: P,
        restart: R,
        config: DriverConfig,
    ) -> Result<Self, UpdateError> {
        config.validate()?;
        Ok(Self {
            transport,
            partitions,
            restart,
            config,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Transport collaborator
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Partition manager
    pub fn partitions(&self) -> &P {
        &self.partitions
    }

    /// Partition manager, mutably
    pub fn partitions_mut(&mut self) -> &mut P {
        &mut self.partitions
    }

    /// Restart collaborator
    pub fn restart(&self) -> &R {
        &self.restart
    }

    /// Take the collaborators back
    pub fn into_parts(self) -> (T, P, R) {
        (self.transport, self.partitions, self.restart)
    }

    /// Run one update attempt.
    ///
    /// On success the boot target has been switched and
    /// [`Restart::restart_now`] has been called. On hardware that call does
    /// not return; host restart primitives do, and the caller then sees
    /// [`UpdateOutcome::RebootRequested`].
    pub fn run_update(&mut self, descriptor: &mut UpdateDescriptor) -> UpdateOutcome {
        let attempt_id = Uuid::new_v4();
        let span = info_span!("firmware_update", %attempt_id);
        let _enter = span.enter();

        let started_at = Utc::now();
        let start_time = Instant::now();
        info!("Starting firmware update");

        match self.perform_update(descriptor) {
            Ok(staged) => {
                let report = UpdateReport {
                    attempt_id,
                    started_at,
                    target: staged.target,
                    previous_version: staged.previous_version,
                    new_version: staged.new_version,
                    bytes_written: staged.bytes_written,
                    image_sha256: staged.image_sha256,
                    duration: start_time.elapsed(),
                };
                info!(
                    version = %report.new_version,
                    partition = %report.target.label,
                    bytes = report.bytes_written,
                    sha256 = %report.image_sha256,
                    "Firmware staged, prepare to restart system"
                );
                self.restart.restart_now();
                UpdateOutcome::RebootRequested(report)
            }
            Err(e) => {
                match e.severity() {
                    ErrorSeverity::Info => info!(phase = %e.phase(), "Update not needed: {e}"),
                    ErrorSeverity::Warning => warn!(phase = %e.phase(), "Update aborted: {e}"),
                    ErrorSeverity::Error | ErrorSeverity::Critical => {
                        error!(phase = %e.phase(), "Update failed: {e}");
                    }
                }
                UpdateOutcome::Failed(e)
            }
        }
    }

    fn perform_update(
        &mut self,
        descriptor: &mut UpdateDescriptor,
    ) -> Result<StagedImage, UpdateError> {
        let (url, trust) = descriptor.require_config()?;

        info!(url = %url, "Opening firmware connection");
        let connection = self
            .transport
            .open(&url, &trust)
            .map_err(|e| UpdateError::TransportOpen(e.to_string()))?;
        let mut guard = ConnectionGuard::new(connection);

        let headers = guard
            .connection()
            .fetch_headers()
            .map_err(|e| UpdateError::TransportOpen(e.to_string()))?;
        debug!(
            status = ?headers.status,
            content_length = ?headers.content_length,
            "Response headers received"
        );

        let target = self.partitions.next_update_target().ok_or_else(|| {
            UpdateError::NoUpdatePartition(
                "partition manager reported no update target".to_string(),
            )
        })?;
        info!(
            partition = %target.label,
            subtype = target.subtype,
            offset = target.address,
            "Writing to partition"
        );

        let mut session = UpdateSession::new(target, self.config.progress_log_interval);
        let mut buffer = vec![0u8; self.config.chunk_size];
        loop {
            let read = guard.connection().read(&mut buffer).map_err(|e| {
                UpdateError::TransportRead {
                    bytes_received: session.bytes_received,
                    reason: e.to_string(),
                }
            })?;
            if read == 0 {
                debug!(bytes_received = session.bytes_received, "End of stream");
                break;
            }
            let chunk = buffer.get(..read).ok_or_else(|| {
                UpdateError::invalid_argument(format!(
                    "transport reported {read} bytes for a {}-byte buffer",
                    buffer.len()
                ))
            })?;
            session.accept(chunk, descriptor, &mut self.partitions)?;
            session.log_progress();
        }

        if let Some(expected) = headers.content_length {
            if session.bytes_received < expected && self.config.enforce_content_length {
                return Err(UpdateError::TransportRead {
                    bytes_received: session.bytes_received,
                    reason: format!("stream ended before the declared {expected} bytes"),
                });
            }
            if session.bytes_received != expected {
                warn!(
                    received = session.bytes_received,
                    declared = expected,
                    "Body length differs from Content-Length"
                );
            }
        }

        let (writer, staged) = session.finish()?;
        guard.release();
        info!(total = staged.bytes_written, "Total write binary data length");

        writer.finalize().map_err(|e| {
            UpdateError::PartitionFinalize(format!("{}: {e}", staged.target.label))
        })?;
        self.partitions
            .set_boot_target(&staged.target)
            .map_err(|e| UpdateError::BootTarget(format!("{}: {e}", staged.target.label)))?;
        info!(partition = %staged.target.label, "Boot target switched");
        Ok(staged)
    }
}
