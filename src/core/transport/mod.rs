//! Transport layer
//!
//! The polling core talks to the wire through two small traits:
//! - [`ByteSource`]: non-blocking "is a byte ready?" / "read one byte"
//! - [`ByteSink`]: write a whole frame
//!
//! [`SerialLine`] implements both on top of a real serial port. Opening and
//! configuring the line happens outside the core; errors come back as
//! [`TransportError`] and the caller decides whether they are fatal.

mod serial;

pub use serial::{list_ports, SerialConfig, SerialFlowControl, SerialLine, SerialParity};

use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Disconnected
    #[error("Disconnected")]
    Disconnected,
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Frames sent
    pub frames_sent: u64,
    /// Bytes dropped by [`ByteSource::discard_input`]
    pub bytes_discarded: u64,
}

/// Non-blocking byte source
#[cfg_attr(test, mockall::automock)]
pub trait ByteSource {
    /// Check whether at least one byte can be read right now.
    ///
    /// Sources without a readiness probe keep the default, which reports
    /// "always ready" and lets [`ByteSource::read_byte`] decide.
    fn poll(&mut self) -> Result<bool, TransportError> {
        Ok(true)
    }

    /// Read a single byte if one is available.
    ///
    /// `Ok(None)` means nothing was available at call time. Must not block.
    fn read_byte(&mut self) -> Result<Option<u8>, TransportError>;

    /// Drop any bytes already buffered on the input side
    fn discard_input(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Frame-oriented byte sink
#[cfg_attr(test, mockall::automock)]
pub trait ByteSink {
    /// Write every byte of `data`, in order
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;
}
