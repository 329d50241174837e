//! Modbus RTU framing
//!
//! Only the read side of the protocol is implemented: building read
//! requests, recognising response and exception headers, and decoding the
//! two-register IEEE-754 values metering devices expose.

use super::checksum;
use thiserror::Error;

/// Length of a read request frame
pub const REQUEST_LEN: usize = 8;

/// Slave, function and byte-count/exception-code bytes
pub const HEADER_LEN: usize = 3;

/// CRC trailer length
pub const CRC_LEN: usize = 2;

/// Bit set in the function byte of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Registers holding one 32-bit float
pub const FLOAT_REGISTERS: u16 = 2;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    /// Function not supported by the slave
    IllegalFunction = 0x01,
    /// Register address not available
    IllegalDataAddress = 0x02,
    /// Value in the query is not allowed
    IllegalDataValue = 0x03,
    /// Unrecoverable error in the slave
    SlaveDeviceFailure = 0x04,
    /// Request accepted, processing takes long
    Acknowledge = 0x05,
    /// Slave is processing another command
    SlaveDeviceBusy = 0x06,
    /// Memory parity error
    MemoryParityError = 0x08,
    /// Gateway misconfigured
    GatewayPathUnavailable = 0x0A,
    /// Target behind the gateway did not answer
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ExceptionCode {
    /// Get exception from u8
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::SlaveDeviceFailure),
            0x05 => Some(ExceptionCode::Acknowledge),
            0x06 => Some(ExceptionCode::SlaveDeviceBusy),
            0x08 => Some(ExceptionCode::MemoryParityError),
            0x0A => Some(ExceptionCode::GatewayPathUnavailable),
            0x0B => Some(ExceptionCode::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    /// Get name of exception
    pub fn name(&self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::SlaveDeviceFailure => "Slave Device Failure",
            ExceptionCode::Acknowledge => "Acknowledge",
            ExceptionCode::SlaveDeviceBusy => "Slave Device Busy",
            ExceptionCode::MemoryParityError => "Memory Parity Error",
            ExceptionCode::GatewayPathUnavailable => "Gateway Path Unavailable",
            ExceptionCode::GatewayTargetDeviceFailedToRespond => "Gateway Target Failed to Respond",
        }
    }

    /// Human-readable name for a raw code, including unknown ones
    pub fn describe(code: u8) -> String {
        match Self::from_u8(code) {
            Some(known) => known.name().to_string(),
            None => format!("Unknown exception 0x{code:02X}"),
        }
    }
}

/// Framing problems
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the frame layout needs
    #[error("frame too short: {0} bytes")]
    Truncated(usize),

    /// Response came from another slave
    #[error("slave address mismatch: expected {expected}, got {actual}")]
    SlaveMismatch {
        /// Address the request went to
        expected: u8,
        /// Address in the response
        actual: u8,
    },

    /// Response echoes another function
    #[error("function mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    FunctionMismatch {
        /// Function of the request
        expected: u8,
        /// Function byte in the response
        actual: u8,
    },

    /// Byte count of zero
    #[error("response announces an empty payload")]
    EmptyPayload,

    /// Payload cannot hold the expected value
    #[error("payload of {0} bytes is too short")]
    ShortPayload(usize),

    /// Announced frame does not fit the receive buffer
    #[error("frame of {len} bytes exceeds the {max}-byte receive buffer")]
    Oversized {
        /// Frame length implied by the header
        len: usize,
        /// Receive buffer size
        max: usize,
    },

    /// CRC trailer does not match
    #[error("CRC mismatch")]
    CrcMismatch,
}

/// Build Modbus RTU request frame
pub fn build_rtu_request(slave_id: u8, function: FunctionCode, start_address: u16, quantity: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REQUEST_LEN);
    frame.push(slave_id);
    frame.push(function as u8);
    frame.extend_from_slice(&start_address.to_be_bytes());
    frame.extend_from_slice(&quantity.to_be_bytes());

    checksum::append_crc16_modbus(&mut frame);

    frame
}

/// Request for the float stored at `address`
pub fn build_read_input_registers(slave_id: u8, address: u16) -> Vec<u8> {
    build_rtu_request(slave_id, FunctionCode::ReadInputRegisters, address, FLOAT_REGISTERS)
}

/// Decoded read request (the slave's view)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// Addressed slave
    pub slave_id: u8,
    /// Raw function byte
    pub function: u8,
    /// First register
    pub start_address: u16,
    /// Number of registers
    pub quantity: u16,
}

impl ReadRequest {
    /// Parse an 8-byte request, checking its CRC
    pub fn parse(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() < REQUEST_LEN {
            return Err(FrameError::Truncated(frame.len()));
        }
        let frame = &frame[..REQUEST_LEN];
        if !checksum::verify_crc16_modbus(frame) {
            return Err(FrameError::CrcMismatch);
        }
        Ok(Self {
            slave_id: frame[0],
            function: frame[1],
            start_address: u16::from_be_bytes([frame[2], frame[3]]),
            quantity: u16::from_be_bytes([frame[4], frame[5]]),
        })
    }
}

/// First three bytes of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHeader {
    /// Normal response; `byte_count` payload bytes and the CRC follow
    Data {
        /// Responding slave
        slave_id: u8,
        /// Echoed function
        function: u8,
        /// Payload length
        byte_count: u8,
    },
    /// Exception response; only the CRC follows
    Exception {
        /// Responding slave
        slave_id: u8,
        /// Function the exception refers to (flag cleared)
        function: u8,
        /// Exception code
        code: u8,
    },
}

impl ResponseHeader {
    /// Parse a header and check it answers `slave_id` / `function`
    pub fn parse(header: &[u8], slave_id: u8, function: FunctionCode) -> Result<Self, FrameError> {
        if header.len() < HEADER_LEN {
            return Err(FrameError::Truncated(header.len()));
        }

        if header[0] != slave_id {
            return Err(FrameError::SlaveMismatch {
                expected: slave_id,
                actual: header[0],
            });
        }

        let expected = function as u8;
        if header[1] == expected | EXCEPTION_FLAG {
            return Ok(ResponseHeader::Exception {
                slave_id: header[0],
                function: expected,
                code: header[2],
            });
        }
        if header[1] != expected {
            return Err(FrameError::FunctionMismatch {
                expected,
                actual: header[1],
            });
        }
        if header[2] == 0 {
            return Err(FrameError::EmptyPayload);
        }

        Ok(ResponseHeader::Data {
            slave_id: header[0],
            function: header[1],
            byte_count: header[2],
        })
    }

    /// Bytes following the header, CRC included
    pub fn body_len(&self) -> usize {
        match self {
            ResponseHeader::Data { byte_count, .. } => usize::from(*byte_count) + CRC_LEN,
            ResponseHeader::Exception { .. } => CRC_LEN,
        }
    }

    /// Whole frame length
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.body_len()
    }
}

/// Build a normal read response carrying `payload`
pub fn build_read_response(slave_id: u8, function: FunctionCode, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
    frame.push(slave_id);
    frame.push(function as u8);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);

    checksum::append_crc16_modbus(&mut frame);

    frame
}

/// Build an exception response
pub fn build_exception_response(slave_id: u8, function: FunctionCode, code: ExceptionCode) -> Vec<u8> {
    let mut frame = vec![slave_id, function as u8 | EXCEPTION_FLAG, code as u8];
    checksum::append_crc16_modbus(&mut frame);
    frame
}

/// Decode the leading four bytes as a big-endian IEEE-754 single
pub fn decode_f32_be(payload: &[u8]) -> Result<f32, FrameError> {
    match payload {
        [a, b, c, d, ..] => Ok(f32::from_be_bytes([*a, *b, *c, *d])),
        _ => Err(FrameError::ShortPayload(payload.len())),
    }
}

/// Format Modbus RTU frame for display
pub fn format_frame(data: &[u8]) -> String {
    if data.len() < 4 {
        return format!("RTU: ?? {}", hex::encode(data));
    }
    format!(
        "RTU: Slave={:02X} Func={:02X} Data={} CRC={:04X}",
        data[0],
        data[1],
        hex::encode(&data[2..data.len() - 2]),
        u16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]])
    )
}
