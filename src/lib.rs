//! # meterpoll core library
//!
//! Cooperative, non-blocking poller for SDM220 single-phase energy meters
//! on a Modbus RTU (RS-485) line:
//! - byte-stream engine turning a "maybe a byte is ready" source into
//!   bounded reads with timeouts
//! - Modbus RTU read requests, response validation (CRC-16) and float decoding
//! - register poller stepping through the fourteen measurements
//! - serial line transport and a simulated meter for tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use meterpoll_core::{MeterPoller, PollOptions, SerialConfig, SerialLine, SystemClock};
//!
//! fn main() -> anyhow::Result<()> {
//!     let line = SerialLine::open(SerialConfig::new("/dev/ttyUSB0", 9600))?;
//!     let mut meter = MeterPoller::new(1, line, SystemClock::new());
//!
//!     meter.poll_async(PollOptions::default())?;
//!     while meter.has_pending() {
//!         meter.iterate()?;
//!     }
//!
//!     println!("{:.2} V", meter.voltage());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::meter::{
    ErrorPolicy, MeterError, MeterPoller, PollEvent, PollOptions, PollReport, Register,
    RegisterTable,
};
pub use crate::core::simulator::{Fault, SimulatedMeter};
pub use crate::core::stream::{Completion, InputStream, StreamError};
pub use crate::core::timer::{Clock, ManualClock, SystemClock};
pub use crate::core::transport::{
    ByteSink, ByteSource, SerialConfig, SerialLine, SerialParity, TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
