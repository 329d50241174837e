//! Core module containing the polling machinery
//!
//! This module provides:
//! - Transport layer (byte source/sink traits, serial line)
//! - Monotonic clock and timer
//! - Non-blocking byte-stream engine
//! - Modbus RTU framing and CRC-16
//! - SDM220 register table and poller
//! - Virtual meter simulation

pub mod meter;
pub mod protocol;
pub mod simulator;
pub mod stream;
pub mod timer;
pub mod transport;
