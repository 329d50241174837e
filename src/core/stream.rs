//! Non-blocking byte-stream engine
//!
//! Turns a [`ByteSource`] that may or may not have a byte ready into bounded
//! read operations:
//! - read exactly `len` bytes
//! - read until a line delimiter (`0x0A`), appending a `0x00` terminator
//!
//! The engine never waits. Each call to [`InputStream::step`] consumes at most
//! one byte; when nothing is ready it checks the operation's timeout and
//! returns. A finished operation comes back as a [`Completion`] that owns the
//! buffer again, so one operation yields exactly one completion.

use crate::core::timer::{Clock, Timer};
use crate::core::transport::{ByteSource, TransportError};
use thiserror::Error;

/// Delimiter ending a line read
pub const DELIMITER: u8 = 0x0A;

/// Byte written after the delimiter of a line read
pub const TERMINATOR: u8 = 0x00;

/// Shape of a read operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Complete after exactly `len` bytes
    Exact {
        /// Number of bytes to read
        len: usize,
    },
    /// Complete after [`DELIMITER`]; `capacity` includes the terminator
    UntilDelimiter {
        /// Bytes reserved in the buffer, terminator included
        capacity: usize,
    },
}

/// Failure of a started operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// No byte arrived within the operation's budget
    #[error("timed out after {timeout_ms} ms ({received} bytes received)")]
    Timeout {
        /// Budget of the operation
        timeout_ms: u64,
        /// Bytes stored before the timeout fired
        received: usize,
    },

    /// Delimiter did not show up before the buffer filled
    #[error("no delimiter within {capacity} bytes")]
    BufferOverflow {
        /// Capacity of the line read
        capacity: usize,
    },
}

/// Reason a `start_*` call was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartError {
    /// Another operation is still pending
    #[error("an operation is already pending")]
    Busy,

    /// Zero-length read requested
    #[error("empty read requested")]
    EmptyRead,

    /// Buffer cannot hold the requested region
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes the operation needs past the start of the buffer
        needed: usize,
        /// Bytes the buffer actually has
        available: usize,
    },
}

/// Refused `start_*` call; hands the buffer back
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct Rejected {
    /// Why the operation was not started
    pub reason: StartError,
    /// The caller's buffer, untouched
    pub buffer: Vec<u8>,
}

/// Result of a finished operation
#[derive(Debug)]
pub struct Completion {
    mode: ReadMode,
    buffer: Vec<u8>,
    offset: usize,
    filled: usize,
    result: Result<(), StreamError>,
}

impl Completion {
    /// Read mode the operation was started with
    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    /// Outcome of the operation
    pub fn result(&self) -> Result<(), StreamError> {
        self.result.clone()
    }

    /// Whether the operation finished without error
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Bytes stored by this operation (delimiter included, terminator excluded)
    pub fn data(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.filled]
    }

    /// Number of bytes stored
    pub fn len(&self) -> usize {
        self.filled
    }

    /// True if no byte was stored
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Take the buffer back
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

#[derive(Debug)]
struct Operation {
    mode: ReadMode,
    buffer: Vec<u8>,
    offset: usize,
    filled: usize,
    timeout_ms: u64,
}

#[derive(Debug)]
enum State {
    Idle,
    Pending(Operation),
}

/// Byte-stream engine over a [`ByteSource`]
pub struct InputStream<S: ByteSource, C: Clock> {
    source: S,
    timer: Timer<C>,
    state: State,
    available: bool,
}

impl<S: ByteSource, C: Clock> InputStream<S, C> {
    /// Wrap a byte source
    pub fn new(source: S, clock: C) -> Self {
        Self {
            source,
            timer: Timer::new(clock),
            state: State::Idle,
            available: false,
        }
    }

    /// Start reading exactly `len` bytes into `buffer[offset..offset + len]`
    pub fn start_read_exact(
        &mut self,
        buffer: Vec<u8>,
        offset: usize,
        len: usize,
        timeout_ms: u64,
    ) -> Result<(), Rejected> {
        if len == 0 {
            return Err(Rejected {
                reason: StartError::EmptyRead,
                buffer,
            });
        }
        self.start(ReadMode::Exact { len }, buffer, offset, len, timeout_ms)
    }

    /// Start reading a line into `buffer[offset..offset + capacity]`
    ///
    /// At most `capacity - 1` bytes are stored, the last of which is the
    /// delimiter; the terminator takes the final slot.
    pub fn start_read_until_delimiter(
        &mut self,
        buffer: Vec<u8>,
        offset: usize,
        capacity: usize,
        timeout_ms: u64,
    ) -> Result<(), Rejected> {
        if capacity == 0 {
            return Err(Rejected {
                reason: StartError::EmptyRead,
                buffer,
            });
        }
        if capacity < 2 {
            return Err(Rejected {
                reason: StartError::BufferTooSmall {
                    needed: 2,
                    available: capacity,
                },
                buffer,
            });
        }
        self.start(
            ReadMode::UntilDelimiter { capacity },
            buffer,
            offset,
            capacity,
            timeout_ms,
        )
    }

    fn start(
        &mut self,
        mode: ReadMode,
        mut buffer: Vec<u8>,
        offset: usize,
        region: usize,
        timeout_ms: u64,
    ) -> Result<(), Rejected> {
        if self.has_pending() {
            return Err(Rejected {
                reason: StartError::Busy,
                buffer,
            });
        }

        let needed = offset.saturating_add(region);
        if needed > buffer.len() {
            return Err(Rejected {
                reason: StartError::BufferTooSmall {
                    needed,
                    available: buffer.len(),
                },
                buffer,
            });
        }

        buffer[offset..needed].fill(0);
        self.timer.restart();
        self.state = State::Pending(Operation {
            mode,
            buffer,
            offset,
            filled: 0,
            timeout_ms,
        });

        tracing::trace!("stream: started {:?} at offset {}", mode, offset);
        Ok(())
    }

    /// True while an operation has been started and not yet completed
    pub fn has_pending(&self) -> bool {
        matches!(self.state, State::Pending(_))
    }

    /// Mode of the pending operation, if any
    pub fn pending_mode(&self) -> Option<ReadMode> {
        match &self.state {
            State::Pending(op) => Some(op.mode),
            State::Idle => None,
        }
    }

    /// Bytes stored so far by the pending operation
    pub fn received(&self) -> usize {
        match &self.state {
            State::Pending(op) => op.filled,
            State::Idle => 0,
        }
    }

    /// Whether a byte can be read now
    ///
    /// A positive answer is cached until a read consumes it, so the source
    /// is not polled twice for the same byte.
    pub fn is_available(&mut self) -> Result<bool, TransportError> {
        if !self.available {
            self.available = self.source.poll()?;
        }
        Ok(self.available)
    }

    /// Advance the pending operation by at most one byte
    ///
    /// Returns `Ok(Some(_))` exactly once per started operation. A transport
    /// error leaves the operation pending.
    pub fn step(&mut self) -> Result<Option<Completion>, TransportError> {
        if !self.has_pending() {
            return Ok(None);
        }

        let byte = if self.is_available()? {
            let byte = self.source.read_byte()?;
            self.available = false;
            byte
        } else {
            None
        };

        let Some(byte) = byte else {
            return Ok(self.check_timeout());
        };

        let State::Pending(op) = &mut self.state else {
            return Ok(None);
        };

        match op.mode {
            ReadMode::Exact { len } => {
                op.buffer[op.offset + op.filled] = byte;
                op.filled += 1;
                if op.filled == len {
                    return Ok(self.finish(Ok(())));
                }
            }
            ReadMode::UntilDelimiter { capacity } => {
                if op.filled >= capacity - 1 {
                    return Ok(self.finish(Err(StreamError::BufferOverflow { capacity })));
                }
                op.buffer[op.offset + op.filled] = byte;
                op.filled += 1;
                if byte == DELIMITER {
                    op.buffer[op.offset + op.filled] = TERMINATOR;
                    return Ok(self.finish(Ok(())));
                }
            }
        }

        Ok(None)
    }

    fn check_timeout(&mut self) -> Option<Completion> {
        let State::Pending(op) = &self.state else {
            return None;
        };
        if self.timer.elapsed_ms() < op.timeout_ms {
            return None;
        }
        let err = StreamError::Timeout {
            timeout_ms: op.timeout_ms,
            received: op.filled,
        };
        self.finish(Err(err))
    }

    fn finish(&mut self, result: Result<(), StreamError>) -> Option<Completion> {
        let State::Pending(op) = std::mem::replace(&mut self.state, State::Idle) else {
            return None;
        };
        if let Err(ref e) = result {
            tracing::trace!("stream: {:?} failed: {}", op.mode, e);
        }
        Some(Completion {
            mode: op.mode,
            buffer: op.buffer,
            offset: op.offset,
            filled: op.filled,
            result,
        })
    }

    /// Drop the pending operation without completing it
    ///
    /// Returns the operation's buffer, or `None` when idle.
    pub fn abandon(&mut self) -> Option<Vec<u8>> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Pending(op) => {
                tracing::trace!("stream: {:?} abandoned after {} bytes", op.mode, op.filled);
                Some(op.buffer)
            }
            State::Idle => None,
        }
    }

    /// Read and drop one byte while idle
    ///
    /// Returns `Ok(true)` if a byte was consumed. Does nothing while an
    /// operation is pending.
    pub fn discard_byte(&mut self) -> Result<bool, TransportError> {
        if self.has_pending() || !self.is_available()? {
            return Ok(false);
        }
        let byte = self.source.read_byte()?;
        self.available = false;
        Ok(byte.is_some())
    }

    /// Milliseconds since the current operation started
    pub fn elapsed_ms(&self) -> u64 {
        self.timer.elapsed_ms()
    }

    /// Clock driving the timeouts
    pub fn clock(&self) -> &C {
        self.timer.clock()
    }

    /// Borrow the byte source
    pub fn get_ref(&self) -> &S {
        &self.source
    }

    /// Mutably borrow the byte source, e.g. to write a request on a
    /// half-duplex line
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Unwrap the byte source, dropping any pending operation
    pub fn into_inner(self) -> S {
        self.source
    }
}
