//! Request/response byte stream the updater talks to.

use crate::error::TransportError;
use heapless::Vec as HVec;
use std::time::Duration;

/// One HTTP exchange: headers out, status and headers back, then the body.
pub trait Transport {
    fn begin_request(&mut self) -> Result<(), TransportError>;

    fn send_header(&mut self, name: &str, value: &str) -> Result<(), TransportError>;

    /// Finish the request and block until the response status is known.
    fn end_request(&mut self) -> Result<u16, TransportError>;

    /// Declared body length, if the server sent one.
    fn content_length(&self) -> Option<u64>;

    /// Response header lookup. Names compare case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;

    /// Read body bytes. `Ok(0)` means the body ended.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Bound on waiting for the response status and headers.
    fn set_response_timeout(&mut self, _timeout: Duration) {}
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn begin_request(&mut self) -> Result<(), TransportError> {
        (**self).begin_request()
    }

    fn send_header(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        (**self).send_header(name, value)
    }

    fn end_request(&mut self) -> Result<u16, TransportError> {
        (**self).end_request()
    }

    fn content_length(&self) -> Option<u64> {
        (**self).content_length()
    }

    fn header(&self, name: &str) -> Option<&str> {
        (**self).header(name)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf)
    }

    fn set_response_timeout(&mut self, timeout: Duration) {
        (**self).set_response_timeout(timeout)
    }
}

/// Size of the lookahead window used for header inspection.
pub const PEEK_CAPACITY: usize = 4;

/// Body reader bounded by the declared length.
///
/// Bytes inspected with [`BodyReader::peek`] stay in the stream and are
/// returned first by [`BodyReader::read`]. Nothing past `declared` is ever
/// pulled from the transport.
pub struct BodyReader<'t, T: Transport + ?Sized> {
    transport: &'t mut T,
    declared: u64,
    pulled: u64,
    lookahead: HVec<u8, PEEK_CAPACITY>,
    lookahead_pos: usize,
}

impl<'t, T: Transport + ?Sized> BodyReader<'t, T> {
    pub fn new(transport: &'t mut T, declared: u64) -> Self {
        Self {
            transport,
            declared,
            pulled: 0,
            lookahead: HVec::new(),
            lookahead_pos: 0,
        }
    }

    pub fn declared(&self) -> u64 {
        self.declared
    }

    /// Fill the lookahead with up to `n` bytes and return them. Fewer bytes
    /// come back if the body is shorter or the transport ends.
    pub fn peek(&mut self, n: usize) -> Result<&[u8], TransportError> {
        let want = n.min(PEEK_CAPACITY);
        while self.lookahead.len() < want && self.pulled < self.declared {
            let mut byte = [0u8; 1];
            let read = self.transport.read(&mut byte)?;
            if read == 0 {
                break;
            }
            self.pulled += 1;
            // Capacity is checked by the loop condition.
            let _ = self.lookahead.push(byte[0]);
        }
        let end = self.lookahead.len().min(want);
        Ok(&self.lookahead[self.lookahead_pos.min(end)..end])
    }

    /// Read the next chunk of the body, lookahead first.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.lookahead_pos < self.lookahead.len() {
            let pending = &self.lookahead[self.lookahead_pos..];
            let n = pending.len().min(buf.len());
            buf[..n].copy_from_slice(&pending[..n]);
            self.lookahead_pos += n;
            return Ok(n);
        }

        let remaining = self.declared - self.pulled;
        if remaining == 0 {
            return Ok(0);
        }
        let cap = usize::try_from(remaining).unwrap_or(usize::MAX).min(buf.len());
        let n = self.transport.read(&mut buf[..cap])?;
        let n = n.min(cap);
        self.pulled += n as u64;
        Ok(n)
    }
}
