//! Scripted stand-ins for the updater's collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use update_core::error::{StorageError, TransportError};
use update_core::memory::{MemorySession, MemoryStorage};
use update_core::storage::{StorageTarget, TargetKind, WriteSession};
use update_core::transport::Transport;
use update_core::DeviceIdentity;

/// A valid executable image of `len` bytes: magic marker, then a counter.
pub fn firmware_image(len: usize) -> Vec<u8> {
    let mut image: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    if let Some(first) = image.first_mut() {
        *first = 0xE9;
    }
    image
}

/// A device with a 2 KiB update slot whose running image is
/// `firmware_image(1024)`.
pub fn identity() -> DeviceIdentity {
    let mut running = MemoryStorage::new(2048);
    let image = firmware_image(1024);
    let mut session = running
        .begin_write(TargetKind::Executable, image.len() as u64)
        .expect("slot fits the running image");
    session.write(&image).expect("running image write");
    session.finalize().expect("running image commit");

    DeviceIdentity {
        chip_size: 4 * 1024 * 1024,
        sdk_version: "v5.3.2".to_string(),
        ..running.identity()
    }
}

/// Transport that replays one canned response.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    status: u16,
    content_length: Option<u64>,
    response_headers: Vec<(String, String)>,
    body: Vec<u8>,
    /// Largest chunk handed out per read.
    max_read: usize,
    connect_error: Option<TransportError>,
    status_error: Option<TransportError>,
    body_error_at: Option<usize>,

    pub sent_headers: Vec<(String, String)>,
    pub requests: usize,
    pub bytes_read: usize,
    pub timeout: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            max_read: usize::MAX,
            ..Default::default()
        }
    }

    /// 200 with `body` and a matching content length.
    pub fn serving(body: Vec<u8>) -> Self {
        Self::new(200).with_content_length(body.len() as u64).with_body(body)
    }

    pub fn with_content_length(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.response_headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_max_read(mut self, max_read: usize) -> Self {
        self.max_read = max_read.max(1);
        self
    }

    pub fn failing_to_connect(mut self, error: TransportError) -> Self {
        self.connect_error = Some(error);
        self
    }

    pub fn failing_before_status(mut self, error: TransportError) -> Self {
        self.status_error = Some(error);
        self
    }

    pub fn failing_body_at(mut self, offset: usize) -> Self {
        self.body_error_at = Some(offset);
        self
    }

    pub fn sent(&self, name: &str) -> Option<&str> {
        self.sent_headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl Transport for ScriptedTransport {
    fn begin_request(&mut self) -> Result<(), TransportError> {
        self.requests += 1;
        match self.connect_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn send_header(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        self.sent_headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn end_request(&mut self) -> Result<u16, TransportError> {
        match self.status_error {
            Some(e) => Err(e),
            None => Ok(self.status),
        }
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if let Some(at) = self.body_error_at {
            if self.bytes_read >= at {
                return Err(TransportError::connection_failed());
            }
        }
        let remaining = self.body.len() - self.bytes_read;
        let mut n = buf.len().min(self.max_read).min(remaining);
        if let Some(at) = self.body_error_at {
            n = n.min(at - self.bytes_read);
        }
        buf[..n].copy_from_slice(&self.body[self.bytes_read..self.bytes_read + n]);
        self.bytes_read += n;
        Ok(n)
    }

    fn set_response_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }
}

/// What the updater did to storage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageJournal {
    pub sessions_opened: usize,
    pub checksums: Vec<String>,
    pub bytes_written: usize,
    pub aborted: usize,
    pub finalized: usize,
}

/// [`MemoryStorage`] with a journal of every session operation.
pub struct JournaledStorage {
    pub memory: MemoryStorage,
    pub journal: StorageJournal,
    /// Accept at most this many bytes per write call.
    pub write_limit: Option<usize>,
    /// Refuse to open sessions with this error.
    pub begin_error: Option<StorageError>,
}

impl JournaledStorage {
    pub fn new(executable_capacity: u64) -> Self {
        Self {
            memory: MemoryStorage::new(executable_capacity),
            journal: StorageJournal::default(),
            write_limit: None,
            begin_error: None,
        }
    }

    pub fn with_data_partition(mut self, capacity: u64) -> Self {
        self.memory = self.memory.with_data_partition(capacity);
        self
    }

    pub fn untouched(&self) -> bool {
        self.journal == StorageJournal::default()
    }
}

impl StorageTarget for JournaledStorage {
    type Session<'a> = JournaledSession<'a>;

    fn capacity_for(&self, kind: TargetKind) -> Option<u64> {
        self.memory.capacity_for(kind)
    }

    fn begin_write(&mut self, kind: TargetKind, size: u64) -> Result<JournaledSession<'_>, StorageError> {
        if let Some(e) = self.begin_error {
            return Err(e);
        }
        let inner = self.memory.begin_write(kind, size)?;
        self.journal.sessions_opened += 1;
        Ok(JournaledSession {
            inner,
            journal: &mut self.journal,
            write_limit: self.write_limit,
        })
    }
}

pub struct JournaledSession<'a> {
    inner: MemorySession<'a>,
    journal: &'a mut StorageJournal,
    write_limit: Option<usize>,
}

impl WriteSession for JournaledSession<'_> {
    fn set_checksum(&mut self, md5_hex: &str) -> Result<(), StorageError> {
        self.journal.checksums.push(md5_hex.to_string());
        self.inner.set_checksum(md5_hex)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, StorageError> {
        let n = self.write_limit.map_or(bytes.len(), |limit| bytes.len().min(limit));
        let accepted = self.inner.write(&bytes[..n])?;
        self.journal.bytes_written += accepted;
        Ok(accepted)
    }

    fn finalize(self) -> Result<(), StorageError> {
        self.journal.finalized += 1;
        self.inner.finalize()
    }

    fn abort(self) -> Result<(), StorageError> {
        self.journal.aborted += 1;
        self.inner.abort()
    }
}

/// Counts restart requests instead of rebooting.
#[derive(Debug, Default)]
pub struct CountingRestart {
    count: AtomicUsize,
}

impl CountingRestart {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl update_core::RestartTrigger for CountingRestart {
    fn restart(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
