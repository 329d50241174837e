//! Protocol implementations
//!
//! - Modbus RTU read requests and responses
//! - CRC-16/MODBUS

pub mod checksum;
pub mod modbus;

pub use checksum::{crc16_modbus, verify_crc16_modbus};
pub use modbus::{
    FunctionCode, ExceptionCode, FrameError, ReadRequest, ResponseHeader,
    build_read_input_registers, build_rtu_request, decode_f32_be, format_frame,
};
