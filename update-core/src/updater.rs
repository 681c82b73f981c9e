//! Update state machine.
//!
//! One call to [`HttpUpdater::apply`] is one session:
//!
//! ```text
//! Idle -> Negotiating -> NoUpdate
//!                     -> Rejected
//!                     -> Validating -> Rejected
//!                                   -> Preparing -> Rejected
//!                                                -> Streaming -> Finalizing -> Committed
//!                                                                           -> Failed
//! ```
//!
//! The session only moves forward and is dropped when the call returns.

use crate::capacity;
use crate::config::UpdateConfig;
use crate::error::{StorageError, UpdateError};
use crate::events::{UpdateEvent, UpdateListener};
use crate::identity::DeviceIdentity;
use crate::integrity::{self, Checksum, IntegrityGuard};
use crate::protocol::{self, Negotiation};
use crate::restart::RestartTrigger;
use crate::storage::{StorageTarget, TargetKind, WriteSession};
use crate::transport::{BodyReader, Transport};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Negotiating,
    Validating,
    Preparing,
    Streaming,
    Finalizing,
    Committed,
    NoUpdate,
    /// Refused before any byte reached storage.
    Rejected,
    /// Failed after streaming started.
    Failed,
}

impl Phase {
    const ALL: [Phase; 10] = [
        Phase::Idle,
        Phase::Negotiating,
        Phase::Validating,
        Phase::Preparing,
        Phase::Streaming,
        Phase::Finalizing,
        Phase::Committed,
        Phase::NoUpdate,
        Phase::Rejected,
        Phase::Failed,
    ];

    fn step(&self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Negotiating => 1,
            Phase::Validating => 2,
            Phase::Preparing => 3,
            Phase::Streaming => 4,
            Phase::Finalizing => 5,
            Phase::Committed | Phase::NoUpdate | Phase::Rejected | Phase::Failed => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.step() == 6
    }

    fn code(&self) -> u8 {
        Self::ALL.iter().position(|p| p == self).unwrap_or(0) as u8
    }

    fn from_code(code: u8) -> Phase {
        Self::ALL.get(code as usize).copied().unwrap_or(Phase::Idle)
    }
}

/// Terminal result of one update call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Applied,
    NoUpdateAvailable,
    Failed(UpdateError),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }

    pub fn error(&self) -> Option<UpdateError> {
        match self {
            Outcome::Failed(e) => Some(*e),
            _ => None,
        }
    }
}

/// What to update and who is asking.
#[derive(Debug, Clone, Copy)]
pub struct UpdateRequest<'a> {
    pub target: TargetKind,
    pub identity: &'a DeviceIdentity,
    /// Sent as `x-ESP32-version` unless empty.
    pub current_version: &'a str,
}

/// Per-call state. Never outlives one `apply`.
struct UpdateSession<'u> {
    target: TargetKind,
    declared_len: Option<u64>,
    expected_md5: Option<Checksum>,
    phase: Phase,
    last_error: Option<UpdateError>,
    published: &'u AtomicU8,
}

impl<'u> UpdateSession<'u> {
    fn new(target: TargetKind, published: &'u AtomicU8) -> Self {
        published.store(Phase::Idle.code(), Ordering::Relaxed);
        Self {
            target,
            declared_len: None,
            expected_md5: None,
            phase: Phase::Idle,
            last_error: None,
            published,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(next.step() > self.phase.step(), "{:?} -> {:?}", self.phase, next);
        log::debug!("{} update: {:?} -> {:?}", self.target, self.phase, next);
        self.phase = next;
        self.published.store(next.code(), Ordering::Relaxed);
    }

    fn set_declared_len(&mut self, len: u64) {
        debug_assert!(self.declared_len.is_none());
        self.declared_len.get_or_insert(len);
    }

    /// Record the failure, notify the listener once and end the session.
    fn fail<L: UpdateListener + ?Sized>(&mut self, error: UpdateError, listener: &mut L) -> Outcome {
        debug_assert!(self.last_error.is_none());
        let terminal = if self.phase.step() >= Phase::Streaming.step() {
            Phase::Failed
        } else {
            Phase::Rejected
        };
        self.advance(terminal);
        self.last_error = Some(error);
        log::error!(
            "{} update failed (declared {:?} bytes, md5 {:?}): {}",
            self.target,
            self.declared_len,
            self.expected_md5,
            error
        );
        listener.on_event(&UpdateEvent::Error(error));
        Outcome::Failed(error)
    }
}

/// Over-the-air updater for one device.
///
/// Owns the storage target for its whole lifetime; the storage lock doubles
/// as the single in-flight session guard.
pub struct HttpUpdater<S, R> {
    storage: Mutex<S>,
    restart: R,
    config: UpdateConfig,
    last_error: Mutex<Option<UpdateError>>,
    phase: AtomicU8,
}

impl<S: StorageTarget, R: RestartTrigger> HttpUpdater<S, R> {
    pub fn new(storage: S, restart: R, config: UpdateConfig) -> Self {
        Self {
            storage: Mutex::new(storage),
            restart,
            config,
            last_error: Mutex::new(None),
            phase: AtomicU8::new(Phase::Idle.code()),
        }
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Phase of the running session, or the terminal phase of the last one.
    pub fn phase(&self) -> Phase {
        Phase::from_code(self.phase.load(Ordering::Relaxed))
    }

    /// Blocks while a session is in flight.
    pub fn storage(&self) -> MutexGuard<'_, S> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_storage(self) -> S {
        self.storage.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_error(&self) -> Option<UpdateError> {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Human readable form of [`HttpUpdater::last_error`], empty if none.
    pub fn last_error_string(&self) -> String {
        self.last_error().map(|e| e.description()).unwrap_or_default()
    }

    /// Update the executable image.
    pub fn update<T, L>(
        &self,
        transport: &mut T,
        identity: &DeviceIdentity,
        current_version: &str,
        listener: &mut L,
    ) -> Outcome
    where
        T: Transport + ?Sized,
        L: UpdateListener + ?Sized,
    {
        let request = UpdateRequest {
            target: TargetKind::Executable,
            identity,
            current_version,
        };
        self.apply(&request, transport, listener)
    }

    /// Update the auxiliary data partition.
    pub fn update_data<T, L>(
        &self,
        transport: &mut T,
        identity: &DeviceIdentity,
        current_version: &str,
        listener: &mut L,
    ) -> Outcome
    where
        T: Transport + ?Sized,
        L: UpdateListener + ?Sized,
    {
        let request = UpdateRequest {
            target: TargetKind::AuxiliaryData,
            identity,
            current_version,
        };
        self.apply(&request, transport, listener)
    }

    /// Run one update session to completion.
    pub fn apply<T, L>(&self, request: &UpdateRequest<'_>, transport: &mut T, listener: &mut L) -> Outcome
    where
        T: Transport + ?Sized,
        L: UpdateListener + ?Sized,
    {
        let mut storage = match self.storage.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                let error = UpdateError::SessionInProgress;
                log::warn!("{} update refused: {}", request.target, error);
                listener.on_event(&UpdateEvent::Error(error));
                return Outcome::Failed(error);
            }
        };

        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
        let mut session = UpdateSession::new(request.target, &self.phase);
        let outcome = self.run(&mut session, &mut *storage, request, transport, listener);
        drop(storage);

        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = session.last_error;
        outcome
    }

    fn run<T, L>(
        &self,
        session: &mut UpdateSession<'_>,
        storage: &mut S,
        request: &UpdateRequest<'_>,
        transport: &mut T,
        listener: &mut L,
    ) -> Outcome
    where
        T: Transport + ?Sized,
        L: UpdateListener + ?Sized,
    {
        let target = request.target;

        session.advance(Phase::Negotiating);
        let negotiated = protocol::negotiate(
            transport,
            request.identity,
            target,
            request.current_version,
            &self.config,
        );
        let (declared_len, md5) = match negotiated {
            Ok(Negotiation::Proceed { declared_len, md5 }) => (declared_len, md5),
            Ok(Negotiation::NotModified) => {
                session.advance(Phase::NoUpdate);
                log::info!("No {} update available", target);
                return Outcome::NoUpdateAvailable;
            }
            Err(e) => return session.fail(e, listener),
        };
        session.set_declared_len(declared_len);

        session.advance(Phase::Validating);
        if let Err(e) = capacity::validate(target, declared_len, &*storage) {
            return session.fail(e, listener);
        }

        session.advance(Phase::Preparing);
        listener.on_event(&UpdateEvent::Start);
        log::info!("Starting {} update ({} bytes)", target, declared_len);

        let mut body = BodyReader::new(transport, declared_len);
        let chip_size = (self.config.verify_flash_size && request.identity.chip_size > 0)
            .then_some(request.identity.chip_size);
        if let Err(e) = integrity::verify_image_head(target, &mut body, chip_size) {
            return session.fail(e, listener);
        }

        let mut write = match storage.begin_write(target, declared_len) {
            Ok(write) => write,
            Err(e) if e.code == StorageError::NO_PARTITION => {
                return session.fail(UpdateError::NoPartition, listener)
            }
            Err(e) => return session.fail(UpdateError::Storage(e), listener),
        };

        let expected = match md5.as_deref().map(Checksum::from_header) {
            Some(Ok(checksum)) => checksum,
            Some(Err(e)) => {
                abandon(write);
                return session.fail(e, listener);
            }
            None => None,
        };
        session.expected_md5 = expected.clone();
        let mut guard = IntegrityGuard::new(expected);
        if let Err(e) = guard.arm(&mut write) {
            abandon(write);
            return session.fail(e, listener);
        }
        debug_assert!(guard.is_armed());

        session.advance(Phase::Streaming);
        listener.on_event(&UpdateEvent::Progress { written: 0, total: declared_len });
        if let Err(e) = self.stream(&mut body, &mut write, declared_len, listener) {
            abandon(write);
            return session.fail(e, listener);
        }

        session.advance(Phase::Finalizing);
        if let Err(e) = write.finalize() {
            return session.fail(UpdateError::Storage(e), listener);
        }

        session.advance(Phase::Committed);
        log::info!("{} update ok", target);
        listener.on_event(&UpdateEvent::End);

        if target == TargetKind::Executable && self.config.reboot_on_update {
            log::info!("Restarting into the new image");
            self.restart.restart();
        }

        Outcome::Applied
    }

    /// Copy exactly `total` bytes from the body into the session.
    fn stream<T, W, L>(
        &self,
        body: &mut BodyReader<'_, T>,
        write: &mut W,
        total: u64,
        listener: &mut L,
    ) -> Result<(), UpdateError>
    where
        T: Transport + ?Sized,
        W: WriteSession,
        L: UpdateListener + ?Sized,
    {
        let buf_len = usize::try_from(total)
            .unwrap_or(usize::MAX)
            .min(self.config.chunk_size());
        let mut buf = vec![0u8; buf_len];
        let mut written = 0u64;

        while written < total {
            let n = body.read(&mut buf)?;
            if n == 0 {
                log::error!("Stream ended after {} of {} bytes", written, total);
                return Err(UpdateError::Truncated { received: written, expected: total });
            }

            let accepted = write.write(&buf[..n])?;
            if accepted != n {
                log::error!("Storage accepted {} of {} bytes", accepted, n);
                return Err(UpdateError::Storage(StorageError::new(StorageError::WRITE)));
            }

            written += n as u64;
            listener.on_event(&UpdateEvent::Progress { written, total });
        }

        Ok(())
    }
}

fn abandon<W: WriteSession>(write: W) {
    if let Err(e) = write.abort() {
        log::warn!("Aborting write session failed: {}", e);
    }
}
