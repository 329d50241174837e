//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::meter::MeterError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Meter did not answer in time
    pub const TIMEOUT: u8 = 4;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Protocol error
    pub const PROTOCOL_ERROR: u8 = 9;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Data validation failed (CRC)
    pub const VALIDATION_FAILED: u8 = 17;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Invalid command-line arguments
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::INVALID_ARGS, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<&TransportError> for CliResult {
    fn from(err: &TransportError) -> Self {
        let code = match err {
            TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            TransportError::InvalidConfiguration(_) => ExitCodes::CONFIG_ERROR,
            TransportError::ConnectionFailed(_) | TransportError::Disconnected => {
                ExitCodes::CONNECTION_FAILED
            }
            TransportError::IoError(io) => return Self::from(io),
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&MeterError> for CliResult {
    fn from(err: &MeterError) -> Self {
        let code = match err {
            MeterError::Transport(inner) => return Self::from(inner.as_ref()),
            MeterError::Timeout { .. } => ExitCodes::TIMEOUT,
            MeterError::CrcMismatch { .. } => ExitCodes::VALIDATION_FAILED,
            MeterError::MalformedHeader { .. }
            | MeterError::Exception { .. }
            | MeterError::BufferOverflow { .. } => ExitCodes::PROTOCOL_ERROR,
            MeterError::SessionActive | MeterError::ReadRefused { .. } => ExitCodes::ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&ConfigError> for CliResult {
    fn from(err: &ConfigError) -> Self {
        let code = match err {
            ConfigError::NotFound(_) => ExitCodes::FILE_NOT_FOUND,
            _ => ExitCodes::CONFIG_ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&std::io::Error> for CliResult {
    fn from(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::NotFound => ExitCodes::PORT_NOT_FOUND,
            ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
            ErrorKind::ConnectionRefused | ErrorKind::BrokenPipe => ExitCodes::CONNECTION_FAILED,
            ErrorKind::TimedOut => ExitCodes::TIMEOUT,
            _ => ExitCodes::ERROR,
        };

        Self::Error(code, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Meter timeout",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Protocol error",
        14 => "Port not found",
        17 => "Validation failed",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 6, 7, 8, 9, 14, 17] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::meter::Register;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::error(3, "Connection failed");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection failed"));
    }

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::PortNotFound("/dev/ttyUSB9".into());
        assert_eq!(CliResult::from(&err).code(), ExitCodes::PORT_NOT_FOUND);

        let err = TransportError::IoError(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert_eq!(CliResult::from(&err).code(), ExitCodes::PERMISSION_DENIED);
    }

    #[test]
    fn test_from_meter_error() {
        let err = MeterError::CrcMismatch {
            register: Register::Voltage,
            received: 0,
            computed: 1,
        };
        assert_eq!(CliResult::from(&err).code(), ExitCodes::VALIDATION_FAILED);

        let err = MeterError::Timeout {
            register: Register::Current,
            timeout_ms: 3000,
            received: 0,
        };
        assert_eq!(CliResult::from(&err).code(), ExitCodes::TIMEOUT);

        let err = MeterError::from(TransportError::Disconnected);
        assert_eq!(CliResult::from(&err).code(), ExitCodes::CONNECTION_FAILED);

        let err = MeterError::ReadRefused {
            register: Register::Frequency,
            reason: crate::core::stream::StartError::Busy,
        };
        assert_eq!(CliResult::from(&err).code(), ExitCodes::ERROR);
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(exit_code_description(ExitCodes::PROTOCOL_ERROR), "Protocol error");
        assert_eq!(exit_code_description(200), "Unknown error");
    }
}
