//! In-memory collaborators
//!
//! Deterministic implementations of the transport, partition and restart
//! contracts. They back the test suites and benchmarks and are handy for
//! simulating an update on a host. Every type shares its recorded state
//! through a cloneable handle, so a test can keep a log while the driver
//! owns the collaborator.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::descriptor::TrustMaterial;
use crate::error::UpdateError;
use crate::image::{AppDescriptor, ImageMetadata, ImageVersion};
use crate::partition::{
    ImageSize, PartitionError, PartitionHandle, PartitionManager, Slot, WriteSession,
};
use crate::restart::Restart;
use crate::transport::{Connection, ResponseHeaders, Transport, TransportError};

/// Build a well-formed single-segment image of `len` bytes carrying `version`.
///
/// The body after the header is a repeating byte pattern. A `len` shorter
/// than the header yields a truncated header.
///
/// # Errors
///
/// Returns [`UpdateError::InvalidArgument`] if `version` does not fit the
/// version block.
pub fn synthetic_image(version: &str, len: usize) -> Result<Vec<u8>, UpdateError> {
    let mut app = AppDescriptor::new(ImageVersion::from_label(version)?);
    app.project_name = "twin-ota-synthetic".to_string();
    app.build_date = "Jan  1 2026".to_string();
    app.build_time = "00:00:00".to_string();
    app.idf_version = "v5.2.1".to_string();

    let mut image = ImageMetadata::for_app(app).encode_prefix();
    image.truncate(len);
    let pattern = (0..=250u8).cycle().skip(image.len() % 251);
    let missing = len.saturating_sub(image.len());
    image.extend(pattern.take(missing));
    Ok(image)
}

/// One scripted transport read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStep {
    /// Deliver these bytes, split across reads if the buffer is smaller
    Data(Vec<u8>),
    /// Fail the read with this reason
    Error(String),
}

#[derive(Debug, Default)]
struct TransportCounters {
    opens: u32,
    header_fetches: u32,
    reads: u32,
    closes: u32,
    urls: Vec<String>,
}

/// Shared record of what a [`MemoryTransport`] was asked to do
#[derive(Debug, Clone, Default)]
pub struct TransportLog {
    inner: Arc<Mutex<TransportCounters>>,
}

impl TransportLog {
    /// Number of `open` calls, failed ones included.
    pub fn opens(&self) -> u32 {
        self.inner.lock().opens
    }

    /// Number of `fetch_headers` calls.
    pub fn header_fetches(&self) -> u32 {
        self.inner.lock().header_fetches
    }

    /// Number of `read` calls, including the one that saw end of stream.
    pub fn reads(&self) -> u32 {
        self.inner.lock().reads
    }

    /// Number of `close` calls.
    pub fn closes(&self) -> u32 {
        self.inner.lock().closes
    }

    /// URLs passed to `open`, in order.
    pub fn urls(&self) -> Vec<String> {
        self.inner.lock().urls.clone()
    }
}

/// Transport that replays a fixed script on every connection
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    script: Vec<ReadStep>,
    headers: ResponseHeaders,
    open_failure: Option<String>,
    header_failure: Option<String>,
    log: TransportLog,
}

impl MemoryTransport {
    /// Transport with an empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `image` in steps of `step` bytes, declaring its length.
    pub fn serving(image: &[u8], step: usize) -> Self {
        let script = image
            .chunks(step.max(1))
            .map(|chunk| ReadStep::Data(chunk.to_vec()))
            .collect();
        Self {
            script,
            headers: ResponseHeaders {
                status: Some(200),
                content_length: Some(image.len() as u64),
            },
            ..Self::default()
        }
    }

    /// Replay `steps` without a declared length.
    pub fn with_steps(steps: Vec<ReadStep>) -> Self {
        Self {
            script: steps,
            headers: ResponseHeaders {
                status: Some(200),
                content_length: None,
            },
            ..Self::default()
        }
    }

    /// Override the declared body length.
    #[must_use]
    pub fn with_content_length(mut self, content_length: Option<u64>) -> Self {
        self.headers.content_length = content_length;
        self
    }

    /// Make every `open` fail.
    #[must_use]
    pub fn failing_open(mut self, reason: impl Into<String>) -> Self {
        self.open_failure = Some(reason.into());
        self
    }

    /// Make every `fetch_headers` fail.
    #[must_use]
    pub fn failing_headers(mut self, reason: impl Into<String>) -> Self {
        self.header_failure = Some(reason.into());
        self
    }

    /// Handle on the shared call log.
    pub fn log(&self) -> TransportLog {
        self.log.clone()
    }
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    fn open(
        &mut self,
        url: &str,
        _trust: &TrustMaterial,
    ) -> Result<Self::Connection, TransportError> {
        {
            let mut log = self.log.inner.lock();
            log.opens = log.opens.saturating_add(1);
            log.urls.push(url.to_string());
        }
        if let Some(reason) = &self.open_failure {
            return Err(TransportError::Connect(reason.clone()));
        }
        Ok(MemoryConnection {
            steps: self.script.iter().cloned().collect(),
            headers: self.headers,
            header_failure: self.header_failure.clone(),
            log: self.log.clone(),
        })
    }
}

/// Connection handed out by [`MemoryTransport`]
#[derive(Debug)]
pub struct MemoryConnection {
    steps: VecDeque<ReadStep>,
    headers: ResponseHeaders,
    header_failure: Option<String>,
    log: TransportLog,
}

impl Connection for MemoryConnection {
    fn fetch_headers(&mut self) -> Result<ResponseHeaders, TransportError> {
        {
            let mut log = self.log.inner.lock();
            log.header_fetches = log.header_fetches.saturating_add(1);
        }
        match &self.header_failure {
            Some(reason) => Err(TransportError::Response(reason.clone())),
            None => Ok(self.headers),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        {
            let mut log = self.log.inner.lock();
            log.reads = log.reads.saturating_add(1);
        }
        loop {
            match self.steps.front_mut() {
                None => return Ok(0),
                Some(ReadStep::Error(reason)) => {
                    let reason = std::mem::take(reason);
                    self.steps.pop_front();
                    return Err(TransportError::Io(std::io::Error::other(reason)));
                }
                Some(ReadStep::Data(bytes)) if bytes.is_empty() => {
                    self.steps.pop_front();
                }
                Some(ReadStep::Data(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    for (dst, src) in buf.iter_mut().zip(bytes.drain(..n)) {
                        *dst = src;
                    }
                    if bytes.is_empty() {
                        self.steps.pop_front();
                    }
                    return Ok(n);
                }
            }
        }
    }

    fn close(&mut self) {
        let mut log = self.log.inner.lock();
        log.closes = log.closes.saturating_add(1);
    }
}

/// Failures to inject into a [`MemoryPartitionTable`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Report no update target
    pub no_update_target: bool,
    /// Fail `begin_write`
    pub begin_write: bool,
    /// Fail every `write` once this many bytes have been accepted
    pub write_after: Option<u64>,
    /// Fail `finalize`
    pub finalize: bool,
    /// Fail `set_boot_target`
    pub set_boot_target: bool,
}

/// One recorded partition operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEvent {
    /// A write session was opened
    BeginWrite(Slot),
    /// Bytes were accepted by a session
    Write(Slot, usize),
    /// A session was finalized
    Finalize(Slot),
    /// A session was dropped without finalizing
    Abandon(Slot),
    /// The boot target was switched
    SetBootTarget(Slot),
}

/// Shared record of partition operations
#[derive(Debug, Clone, Default)]
pub struct PartitionJournal {
    events: Arc<Mutex<Vec<JournalEvent>>>,
}

impl PartitionJournal {
    fn record(&self, event: JournalEvent) {
        self.events.lock().push(event);
    }

    /// All events in order.
    pub fn events(&self) -> Vec<JournalEvent> {
        self.events.lock().clone()
    }

    /// Number of write sessions opened.
    pub fn sessions_opened(&self) -> usize {
        self.count(|e| matches!(e, JournalEvent::BeginWrite(_)))
    }

    /// Number of accepted `write` calls.
    pub fn write_calls(&self) -> usize {
        self.count(|e| matches!(e, JournalEvent::Write(..)))
    }

    /// Total bytes accepted across all sessions.
    pub fn bytes_written(&self) -> u64 {
        self.events
            .lock()
            .iter()
            .map(|e| match e {
                JournalEvent::Write(_, len) => *len as u64,
                _ => 0,
            })
            .sum()
    }

    /// Number of sessions finalized.
    pub fn finalized(&self) -> usize {
        self.count(|e| matches!(e, JournalEvent::Finalize(_)))
    }

    /// Number of sessions abandoned.
    pub fn abandoned(&self) -> usize {
        self.count(|e| matches!(e, JournalEvent::Abandon(_)))
    }

    /// Slots made boot target, in order.
    pub fn boot_changes(&self) -> Vec<Slot> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                JournalEvent::SetBootTarget(slot) => Some(*slot),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&JournalEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

#[derive(Debug, Default)]
struct TableState {
    images: [Option<Vec<u8>>; 2],
    running: Option<Slot>,
    boot: Option<Slot>,
    last_invalid: Option<Slot>,
    faults: FaultPlan,
}

impl TableState {
    fn image(&self, slot: Slot) -> Option<&Vec<u8>> {
        self.images.get(usize::from(slot.index())).and_then(Option::as_ref)
    }

    fn set_image(&mut self, slot: Slot, image: Option<Vec<u8>>) {
        if let Some(entry) = self.images.get_mut(usize::from(slot.index())) {
            *entry = image;
        }
    }
}

/// Dual-slot partition table held in memory
#[derive(Debug, Clone)]
pub struct MemoryPartitionTable {
    state: Arc<Mutex<TableState>>,
    journal: PartitionJournal,
}

impl MemoryPartitionTable {
    /// Table running `ota_0` with a synthetic image of `running_version`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if the version label does
    /// not fit the version block.
    pub fn new(running_version: &str) -> Result<Self, UpdateError> {
        let table = Self::blank();
        {
            let mut state = table.state.lock();
            state.set_image(Slot::Ota0, Some(synthetic_image(running_version, 4096)?));
        }
        Ok(table)
    }

    /// Table running `ota_0` without a readable image.
    pub fn blank() -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState {
                running: Some(Slot::Ota0),
                boot: Some(Slot::Ota0),
                ..TableState::default()
            })),
            journal: PartitionJournal::default(),
        }
    }

    /// Place an image of `version` in the spare slot and mark it as the
    /// image that last failed to boot.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidArgument`] if the version label does
    /// not fit the version block.
    pub fn with_last_invalid_version(self, version: &str) -> Result<Self, UpdateError> {
        {
            let mut state = self.state.lock();
            let spare = state.running.unwrap_or(Slot::Ota0).other();
            state.set_image(spare, Some(synthetic_image(version, 4096)?));
            state.last_invalid = Some(spare);
        }
        Ok(self)
    }

    /// Inject failures.
    #[must_use]
    pub fn with_faults(self, faults: FaultPlan) -> Self {
        self.state.lock().faults = faults;
        self
    }

    /// Handle on the shared operation journal.
    pub fn journal(&self) -> PartitionJournal {
        self.journal.clone()
    }

    /// Slot the device booted from.
    pub fn running_slot(&self) -> Slot {
        self.state.lock().running.unwrap_or(Slot::Ota0)
    }

    /// Slot that boots on the next restart.
    pub fn boot_slot(&self) -> Slot {
        self.state.lock().boot.unwrap_or(Slot::Ota0)
    }

    /// Copy of the image stored in `slot`.
    pub fn image(&self, slot: Slot) -> Option<Vec<u8>> {
        self.state.lock().image(slot).cloned()
    }

    /// Version of the image stored in `slot`.
    pub fn version_in(&self, slot: Slot) -> Option<ImageVersion> {
        let state = self.state.lock();
        let image = state.image(slot)?;
        ImageMetadata::parse(image).ok().map(|m| m.app.version)
    }

    fn slot_of(partition: &PartitionHandle) -> Result<Slot, PartitionError> {
        Slot::from_label(&partition.label)
            .ok_or_else(|| PartitionError::NotFound(partition.label.clone()))
    }
}

impl PartitionManager for MemoryPartitionTable {
    type Session = MemoryWriteSession;

    fn running(&self) -> PartitionHandle {
        self.running_slot().handle()
    }

    fn last_invalid(&self) -> Option<PartitionHandle> {
        self.state.lock().last_invalid.map(Slot::handle)
    }

    fn next_update_target(&self) -> Option<PartitionHandle> {
        let state = self.state.lock();
        if state.faults.no_update_target {
            return None;
        }
        Some(state.running.unwrap_or(Slot::Ota0).other().handle())
    }

    fn describe(&self, partition: &PartitionHandle) -> Result<AppDescriptor, PartitionError> {
        let slot = Self::slot_of(partition)?;
        let state = self.state.lock();
        let image = state
            .image(slot)
            .ok_or_else(|| PartitionError::InvalidState(format!("{slot} is empty")))?;
        ImageMetadata::parse(image)
            .map(|m| m.app)
            .map_err(|e| PartitionError::InvalidImage(e.to_string()))
    }

    fn begin_write(
        &mut self,
        partition: &PartitionHandle,
        size: ImageSize,
    ) -> Result<Self::Session, PartitionError> {
        let slot = Self::slot_of(partition)?;
        let mut state = self.state.lock();
        if state.faults.begin_write {
            return Err(PartitionError::InvalidState("erase failed".to_string()));
        }
        if state.running == Some(slot) {
            return Err(PartitionError::InvalidState(format!(
                "{slot} is the running partition"
            )));
        }
        if let ImageSize::Exact(len) = size {
            if len > u64::from(partition.size) {
                return Err(PartitionError::CapacityExceeded {
                    capacity: u64::from(partition.size),
                });
            }
        }
        state.set_image(slot, None);
        if state.last_invalid == Some(slot) {
            state.last_invalid = None;
        }
        self.journal.record(JournalEvent::BeginWrite(slot));
        Ok(MemoryWriteSession {
            state: Arc::clone(&self.state),
            journal: self.journal.clone(),
            slot,
            capacity: u64::from(partition.size),
            buffer: Vec::new(),
            write_limit: state.faults.write_after,
            fail_finalize: state.faults.finalize,
            finalized: false,
        })
    }

    fn set_boot_target(&mut self, partition: &PartitionHandle) -> Result<(), PartitionError> {
        let slot = Self::slot_of(partition)?;
        let mut state = self.state.lock();
        if state.faults.set_boot_target {
            return Err(PartitionError::InvalidState(
                "boot selection could not be persisted".to_string(),
            ));
        }
        if state.image(slot).is_none() {
            return Err(PartitionError::InvalidState(format!(
                "{slot} holds no finalized image"
            )));
        }
        state.boot = Some(slot);
        self.journal.record(JournalEvent::SetBootTarget(slot));
        Ok(())
    }
}

/// Write session of a [`MemoryPartitionTable`]
#[derive(Debug)]
pub struct MemoryWriteSession {
    state: Arc<Mutex<TableState>>,
    journal: PartitionJournal,
    slot: Slot,
    capacity: u64,
    buffer: Vec<u8>,
    write_limit: Option<u64>,
    fail_finalize: bool,
    finalized: bool,
}

impl WriteSession for MemoryWriteSession {
    fn write(&mut self, data: &[u8]) -> Result<(), PartitionError> {
        let written = self.bytes_written();
        if self.write_limit.is_some_and(|limit| written >= limit) {
            return Err(PartitionError::Io(std::io::Error::other("flash write failed")));
        }
        if written.saturating_add(data.len() as u64) > self.capacity {
            return Err(PartitionError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.buffer.extend_from_slice(data);
        self.journal.record(JournalEvent::Write(self.slot, data.len()));
        Ok(())
    }

    fn finalize(mut self) -> Result<(), PartitionError> {
        if self.buffer.is_empty() {
            return Err(PartitionError::NothingWritten);
        }
        if self.fail_finalize {
            return Err(PartitionError::InvalidImage("digest mismatch".to_string()));
        }
        ImageMetadata::parse(&self.buffer)
            .map_err(|e| PartitionError::InvalidImage(e.to_string()))?;
        let image = std::mem::take(&mut self.buffer);
        self.state.lock().set_image(self.slot, Some(image));
        self.finalized = true;
        self.journal.record(JournalEvent::Finalize(self.slot));
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.buffer.len() as u64
    }
}

impl Drop for MemoryWriteSession {
    fn drop(&mut self) {
        if !self.finalized {
            self.journal.record(JournalEvent::Abandon(self.slot));
        }
    }
}

/// Restart primitive that only counts requests
#[derive(Debug, Clone, Default)]
pub struct RecordingRestart {
    count: Arc<AtomicU32>,
}

impl RecordingRestart {
    /// Create a recorder with no restarts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of restart requests so far.
    pub fn restarts(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Restart for RecordingRestart {
    fn restart_now(&mut self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trust() -> Result<TrustMaterial, UpdateError> {
        TrustMaterial::new("CERT")
    }

    #[test]
    fn test_synthetic_image_is_parseable() -> Result<(), UpdateError> {
        let image = synthetic_image("3.2.1", 10_000)?;
        assert_eq!(image.len(), 10_000);
        let metadata = ImageMetadata::parse(&image)?;
        assert_eq!(metadata.app.version, ImageVersion::from_label("3.2.1")?);
        assert_eq!(synthetic_image("3.2.1", 100)?.len(), 100);
        Ok(())
    }

    #[test]
    fn test_connection_splits_large_steps() -> Result<(), Box<dyn std::error::Error>> {
        let mut transport = MemoryTransport::with_steps(vec![ReadStep::Data(vec![7; 10])]);
        let mut connection = transport.open("mem://image", &trust()?)?;
        let mut buf = [0u8; 4];
        assert_eq!(connection.read(&mut buf)?, 4);
        assert_eq!(connection.read(&mut buf)?, 4);
        assert_eq!(connection.read(&mut buf)?, 2);
        assert_eq!(connection.read(&mut buf)?, 0);
        assert_eq!(transport.log().reads(), 4);
        Ok(())
    }

    #[test]
    fn test_scripted_error_is_returned_once() -> Result<(), Box<dyn std::error::Error>> {
        let mut transport = MemoryTransport::with_steps(vec![
            ReadStep::Error("reset by peer".to_string()),
            ReadStep::Data(vec![1, 2]),
        ]);
        let mut connection = transport.open("mem://image", &trust()?)?;
        let mut buf = [0u8; 8];
        assert!(matches!(connection.read(&mut buf), Err(_)));
        assert_eq!(connection.read(&mut buf)?, 2);
        Ok(())
    }

    #[test]
    fn test_begin_write_refuses_running_slot() -> Result<(), UpdateError> {
        let mut table = MemoryPartitionTable::new("1.0.0")?;
        let result = table.begin_write(&Slot::Ota0.handle(), ImageSize::Unknown);
        assert!(matches!(result, Err(PartitionError::InvalidState(_))));
        Ok(())
    }

    #[test]
    fn test_abandoned_session_is_journaled() -> Result<(), Box<dyn std::error::Error>> {
        let mut table = MemoryPartitionTable::new("1.0.0")?;
        let journal = table.journal();
        {
            let mut session = table.begin_write(&Slot::Ota1.handle(), ImageSize::Unknown)?;
            session.write(&[1, 2, 3])?;
        }
        assert_eq!(journal.abandoned(), 1);
        assert_eq!(journal.finalized(), 0);
        assert!(table.image(Slot::Ota1).is_none());
        Ok(())
    }

    #[test]
    fn test_finalize_rejects_empty_and_invalid_images() -> Result<(), Box<dyn std::error::Error>> {
        let mut table = MemoryPartitionTable::new("1.0.0")?;
        let session = table.begin_write(&Slot::Ota1.handle(), ImageSize::Unknown)?;
        assert!(matches!(session.finalize(), Err(PartitionError::NothingWritten)));

        let mut session = table.begin_write(&Slot::Ota1.handle(), ImageSize::Unknown)?;
        session.write(&[0u8; 512])?;
        assert!(matches!(session.finalize(), Err(PartitionError::InvalidImage(_))));
        Ok(())
    }

    #[test]
    fn test_full_write_then_boot_switch() -> Result<(), Box<dyn std::error::Error>> {
        let mut table = MemoryPartitionTable::new("1.0.0")?;
        let image = synthetic_image("2.0.0", 2048)?;
        let mut session = table.begin_write(&Slot::Ota1.handle(), ImageSize::Unknown)?;
        session.write(&image)?;
        session.finalize()?;
        table.set_boot_target(&Slot::Ota1.handle())?;

        assert_eq!(table.boot_slot(), Slot::Ota1);
        assert_eq!(table.running_slot(), Slot::Ota0);
        assert_eq!(table.version_in(Slot::Ota1), Some(ImageVersion::from_label("2.0.0")?));
        assert_eq!(table.journal().boot_changes(), vec![Slot::Ota1]);
        Ok(())
    }

    #[test]
    fn test_restart_recorder_counts() {
        let mut restart = RecordingRestart::new();
        let observer = restart.clone();
        restart.restart_now();
        assert_eq!(observer.restarts(), 1);
    }
}
