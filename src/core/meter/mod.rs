//! SDM220 energy meter
//!
//! - [`Register`] / [`RegisterTable`]: the fourteen measurements and their values
//! - [`MeterPoller`]: cooperative query/response state machine
//! - [`MeterError`]: everything that can go wrong while polling

mod error;
mod poller;
mod registers;

pub use error::MeterError;
pub use poller::{
    ErrorPolicy, MeterPoller, PollEvent, PollOptions, PollReport, DEFAULT_FRAME_GAP_MS,
    DEFAULT_SLAVE_ADDRESS, DEFAULT_TIMEOUT_MS, RX_BUFFER_SIZE,
};
pub use registers::{Register, RegisterTable};
