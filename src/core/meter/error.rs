//! Meter polling errors

use super::Register;
use crate::core::protocol::{ExceptionCode, FrameError};
use crate::core::stream::{StartError, StreamError};
use crate::core::transport::TransportError;
use std::sync::Arc;
use thiserror::Error;

/// Errors observed while polling the meter
#[derive(Error, Debug, Clone)]
pub enum MeterError {
    /// `poll_async` while a session is running
    #[error("a poll session is already active")]
    SessionActive,

    /// No complete response within the session timeout
    #[error("{register}: no response within {timeout_ms} ms ({received} bytes received)")]
    Timeout {
        /// Register being polled
        register: Register,
        /// Session timeout
        timeout_ms: u64,
        /// Bytes of the current read that did arrive
        received: usize,
    },

    /// Response did not fit the receive buffer
    #[error("{register}: receive buffer overflow")]
    BufferOverflow {
        /// Register being polled
        register: Register,
    },

    /// Header is not a valid answer to the query
    #[error("{register}: malformed response: {reason}")]
    MalformedHeader {
        /// Register being polled
        register: Register,
        /// What was wrong
        reason: FrameError,
    },

    /// Response body failed the CRC check
    #[error("{register}: CRC mismatch (received 0x{received:04X}, computed 0x{computed:04X})")]
    CrcMismatch {
        /// Register being polled
        register: Register,
        /// CRC carried by the frame
        received: u16,
        /// CRC computed over the frame
        computed: u16,
    },

    /// Slave answered with a Modbus exception
    #[error("{register}: slave exception 0x{code:02X} ({})", ExceptionCode::describe(*.code))]
    Exception {
        /// Register being polled
        register: Register,
        /// Exception code
        code: u8,
    },

    /// Stream engine refused to start a read
    #[error("{register}: read not started: {reason}")]
    ReadRefused {
        /// Register being polled
        register: Register,
        /// Why the read was refused
        reason: StartError,
    },

    /// Byte source or sink failed
    #[error("transport error: {0}")]
    Transport(Arc<TransportError>),
}

impl MeterError {
    /// Map a failed stream read for `register`
    pub fn from_stream(register: Register, err: StreamError) -> Self {
        match err {
            StreamError::Timeout {
                timeout_ms,
                received,
            } => MeterError::Timeout {
                register,
                timeout_ms,
                received,
            },
            StreamError::BufferOverflow { .. } => MeterError::BufferOverflow { register },
        }
    }

    /// Register the error belongs to, if any
    pub fn register(&self) -> Option<Register> {
        match self {
            MeterError::Timeout { register, .. }
            | MeterError::BufferOverflow { register }
            | MeterError::MalformedHeader { register, .. }
            | MeterError::CrcMismatch { register, .. }
            | MeterError::Exception { register, .. }
            | MeterError::ReadRefused { register, .. } => Some(*register),
            MeterError::SessionActive | MeterError::Transport(_) => None,
        }
    }
}

impl From<TransportError> for MeterError {
    fn from(err: TransportError) -> Self {
        MeterError::Transport(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_mapping() {
        let err = MeterError::from_stream(
            Register::Current,
            StreamError::Timeout {
                timeout_ms: 3000,
                received: 2,
            },
        );
        assert!(matches!(
            err,
            MeterError::Timeout {
                register: Register::Current,
                timeout_ms: 3000,
                received: 2
            }
        ));

        let err = MeterError::from_stream(Register::Voltage, StreamError::BufferOverflow { capacity: 16 });
        assert!(matches!(err, MeterError::BufferOverflow { register: Register::Voltage }));
    }

    #[test]
    fn test_display() {
        let err = MeterError::Exception {
            register: Register::Frequency,
            code: 0x02,
        };
        assert_eq!(
            err.to_string(),
            "frequency (0x0046): slave exception 0x02 (Illegal Data Address)"
        );
        assert_eq!(err.register(), Some(Register::Frequency));
        assert_eq!(MeterError::from(TransportError::Disconnected).register(), None);
    }
}
