//! Cooperative SDM220 poller
//!
//! One session queries all fourteen registers in order. Every register goes
//! through the same cycle:
//!
//! ```text
//! BeginQuery ──send──▶ ReadHeader ──3 bytes──▶ ReadBody ──N+2 bytes──▶ BeginQuery (next)
//! ```
//!
//! [`MeterPoller::iterate`] performs at most one step: either one byte of the
//! pending read, or one protocol transition. Nothing blocks; a caller loops
//! `while poller.has_pending() { poller.iterate()?; }`.

use super::{MeterError, Register, RegisterTable};
use crate::core::protocol::checksum::crc16_modbus;
use crate::core::protocol::modbus::{
    build_read_input_registers, decode_f32_be, format_frame, FrameError, FunctionCode,
    ResponseHeader, CRC_LEN, HEADER_LEN,
};
use crate::core::stream::{Completion, InputStream, StreamError};
use crate::core::timer::Clock;
use crate::core::transport::{ByteSink, ByteSource, TransportError};
use serde::{Deserialize, Serialize};

/// Size of the receive buffer; a float response is 9 bytes
pub const RX_BUFFER_SIZE: usize = 16;

/// Default per-read timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Default Modbus slave address of the meter
pub const DEFAULT_SLAVE_ADDRESS: u8 = 1;

/// Default silence that marks the end of a frame on the line
///
/// Modbus RTU asks for 3.5 character times; at 9600 baud that is about 4 ms.
pub const DEFAULT_FRAME_GAP_MS: u64 = 5;

/// What to do when a register cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Keep the old value, report the failure and go on with the next register
    #[default]
    Lenient,
    /// End the session on the first failure
    Strict,
}

impl std::str::FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown error policy '{other}'")),
        }
    }
}

/// Settings of one poll session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Budget of every header and body read
    pub timeout_ms: u64,
    /// Failure handling
    pub policy: ErrorPolicy,
    /// Quiet time that ends a resynchronisation after a broken frame
    pub frame_gap_ms: u64,
}

impl PollOptions {
    /// Lenient session with the given timeout
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            policy: ErrorPolicy::Lenient,
            frame_gap_ms: DEFAULT_FRAME_GAP_MS,
        }
    }

    /// Set the inter-frame gap
    #[must_use]
    pub fn frame_gap(mut self, ms: u64) -> Self {
        self.frame_gap_ms = ms;
        self
    }

    /// Set the error policy
    #[must_use]
    pub fn policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shorthand for [`ErrorPolicy::Strict`]
    #[must_use]
    pub fn strict(self) -> Self {
        self.policy(ErrorPolicy::Strict)
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_MS)
    }
}

/// Summary of a finished session
#[derive(Debug, Clone, Default)]
pub struct PollReport {
    /// Registers that received a fresh value
    pub updated: Vec<Register>,
    /// Registers skipped, with the reason
    pub failures: Vec<MeterError>,
    /// Duration of the session
    pub elapsed_ms: u64,
}

impl PollReport {
    /// True if every register was updated
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.updated.len() == Register::COUNT
    }
}

/// Something worth telling the caller about
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// A register finished and the session goes on
    Register {
        /// Register that finished
        register: Register,
        /// Decoded value or the reason it was skipped
        outcome: Result<f64, MeterError>,
    },
    /// All registers went through; the session is over
    Completed(PollReport),
    /// Strict session ended early; the session is over
    Failed(MeterError),
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// Drop whatever is still arriving until the line has been quiet for a
    /// frame gap, so the next header starts on a frame boundary
    Resync { quiet_since: u64, started: u64 },
    BeginQuery,
    ReadHeader,
    ReadBody(ResponseHeader),
}

impl Phase {
    fn resync(now: u64) -> Self {
        Phase::Resync {
            quiet_since: now,
            started: now,
        }
    }
}

#[derive(Debug)]
struct Session {
    options: PollOptions,
    index: usize,
    phase: Phase,
    report: PollReport,
    started_ms: u64,
}

impl Session {
    fn register(&self) -> Register {
        Register::ALL[self.index.min(Register::COUNT - 1)]
    }
}

/// SDM220 poller over a half-duplex transport
pub struct MeterPoller<T: ByteSource + ByteSink, C: Clock> {
    slave_address: u8,
    stream: InputStream<T, C>,
    rx: Option<Vec<u8>>,
    values: RegisterTable,
    session: Option<Session>,
    resync_next: bool,
}

impl<T: ByteSource + ByteSink, C: Clock> MeterPoller<T, C> {
    /// Create a poller for the meter at `slave_address`
    pub fn new(slave_address: u8, transport: T, clock: C) -> Self {
        Self {
            slave_address,
            stream: InputStream::new(transport, clock),
            rx: Some(vec![0u8; RX_BUFFER_SIZE]),
            values: RegisterTable::new(),
            session: None,
            resync_next: false,
        }
    }

    /// Modbus address of the meter
    pub fn slave_address(&self) -> u8 {
        self.slave_address
    }

    /// Start a session
    ///
    /// Fails with [`MeterError::SessionActive`] while another session runs;
    /// the running session is left as it was.
    pub fn poll_async(&mut self, options: PollOptions) -> Result<(), MeterError> {
        if self.session.is_some() {
            return Err(MeterError::SessionActive);
        }

        tracing::debug!(
            "slave {}: poll started (timeout {} ms, {:?})",
            self.slave_address,
            options.timeout_ms,
            options.policy
        );

        let now = self.stream.clock().now_ms();
        let phase = if std::mem::take(&mut self.resync_next) {
            Phase::resync(now)
        } else {
            Phase::BeginQuery
        };
        self.session = Some(Session {
            options,
            index: 0,
            phase,
            report: PollReport::default(),
            started_ms: now,
        });
        Ok(())
    }

    /// Drop the running session, if any
    ///
    /// A read in flight is dropped too; the next session first waits for the
    /// line to go quiet. Values decoded so far are kept.
    pub fn abandon(&mut self) {
        if self.session.take().is_none() {
            return;
        }
        if let Some(buffer) = self.stream.abandon() {
            self.rx = Some(buffer);
            self.resync_next = true;
        }
        tracing::debug!("slave {}: poll abandoned", self.slave_address);
    }

    /// True while a session is running
    pub fn has_pending(&self) -> bool {
        self.session.is_some()
    }

    /// Index of the register being polled, if a session runs
    pub fn progress(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.index)
    }

    /// Advance the session by one step
    ///
    /// Transport errors are returned as they are and leave the session where
    /// it was, so the call can be retried or the session abandoned.
    pub fn iterate(&mut self) -> Result<Option<PollEvent>, TransportError> {
        let Some(session) = self.session.as_ref() else {
            return Ok(None);
        };

        if self.stream.has_pending() {
            return match self.stream.step()? {
                Some(done) => Ok(self.on_read_complete(done)),
                None => Ok(None),
            };
        }

        let register = session.register();
        let timeout_ms = session.options.timeout_ms;
        let frame_gap_ms = session.options.frame_gap_ms;
        let phase = session.phase;

        match phase {
            Phase::Resync {
                quiet_since,
                started,
            } => {
                let dropped = self.stream.discard_byte()?;
                let now = self.stream.clock().now_ms();
                if dropped {
                    self.set_phase(Phase::Resync {
                        quiet_since: now,
                        started,
                    });
                } else if now.saturating_sub(quiet_since) >= frame_gap_ms
                    || now.saturating_sub(started) >= timeout_ms
                {
                    tracing::trace!("{}: line quiet after {} ms", register, now.saturating_sub(started));
                    self.set_phase(Phase::BeginQuery);
                }
                Ok(None)
            }
            Phase::BeginQuery => {
                let request = build_read_input_registers(self.slave_address, register.address());
                let transport = self.stream.get_mut();
                transport.discard_input()?;
                tracing::trace!("TX {}", format_frame(&request));
                transport.write_all(&request)?;
                self.set_phase(Phase::ReadHeader);
                Ok(None)
            }
            Phase::ReadHeader => Ok(self.start_read(register, 0, HEADER_LEN, timeout_ms)),
            Phase::ReadBody(header) => {
                Ok(self.start_read(register, HEADER_LEN, header.body_len(), timeout_ms))
            }
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if let Some(session) = self.session.as_mut() {
            session.phase = phase;
        }
    }

    fn start_read(
        &mut self,
        register: Register,
        offset: usize,
        len: usize,
        timeout_ms: u64,
    ) -> Option<PollEvent> {
        let buffer = self.rx.take().unwrap_or_else(|| vec![0u8; RX_BUFFER_SIZE]);
        match self.stream.start_read_exact(buffer, offset, len, timeout_ms) {
            Ok(()) => None,
            Err(rejected) => {
                self.rx = Some(rejected.buffer);
                let err = MeterError::ReadRefused {
                    register,
                    reason: rejected.reason,
                };
                self.finish_register(register, Err(err), false)
            }
        }
    }

    fn on_read_complete(&mut self, done: Completion) -> Option<PollEvent> {
        let session = self.session.as_ref()?;
        let register = session.register();
        let phase = session.phase;

        let result = done.result();
        let buffer = done.into_buffer();

        // Bytes of a frame we gave up on may still be on the wire.
        let resync = match (&phase, &result) {
            (_, Err(StreamError::Timeout { received, .. })) => {
                *received > 0 || matches!(phase, Phase::ReadBody(_))
            }
            (_, Err(StreamError::BufferOverflow { .. })) => true,
            (_, Ok(())) => false,
        };

        let outcome = match (phase, result) {
            (Phase::Resync { .. } | Phase::BeginQuery, _) => {
                unreachable!("no read is started in {:?}", phase)
            }
            (_, Err(err)) => Err(MeterError::from_stream(register, err)),
            (Phase::ReadHeader, Ok(())) => {
                match self.check_header(register, &buffer[..HEADER_LEN]) {
                    Ok(header) => {
                        self.rx = Some(buffer);
                        self.set_phase(Phase::ReadBody(header));
                        return None;
                    }
                    Err(err) => {
                        self.rx = Some(buffer);
                        return self.finish_register(register, Err(err), true);
                    }
                }
            }
            (Phase::ReadBody(header), Ok(())) => {
                let frame = &buffer[..header.frame_len()];
                tracing::trace!("RX {}", format_frame(frame));
                self.decode_body(register, header, frame)
            }
        };

        self.rx = Some(buffer);
        self.finish_register(register, outcome, resync)
    }

    fn check_header(&self, register: Register, bytes: &[u8]) -> Result<ResponseHeader, MeterError> {
        let header = ResponseHeader::parse(bytes, self.slave_address, FunctionCode::ReadInputRegisters)
            .map_err(|reason| MeterError::MalformedHeader { register, reason })?;

        if header.frame_len() > RX_BUFFER_SIZE {
            return Err(MeterError::MalformedHeader {
                register,
                reason: FrameError::Oversized {
                    len: header.frame_len(),
                    max: RX_BUFFER_SIZE,
                },
            });
        }
        Ok(header)
    }

    fn decode_body(
        &mut self,
        register: Register,
        header: ResponseHeader,
        frame: &[u8],
    ) -> Result<f64, MeterError> {
        let (body, trailer) = frame.split_at(frame.len() - CRC_LEN);
        let received = u16::from_le_bytes([trailer[0], trailer[1]]);
        let computed = crc16_modbus(body);
        if received != computed {
            return Err(MeterError::CrcMismatch {
                register,
                received,
                computed,
            });
        }

        match header {
            ResponseHeader::Exception { code, .. } => Err(MeterError::Exception { register, code }),
            ResponseHeader::Data { .. } => {
                let value = decode_f32_be(&body[HEADER_LEN..])
                    .map_err(|reason| MeterError::MalformedHeader { register, reason })?;
                let value = f64::from(value);
                self.values.set(register, value);
                Ok(value)
            }
        }
    }

    /// Record the outcome of `register` and move on
    ///
    /// `resync` asks for the line to go quiet before the next query.
    fn finish_register(
        &mut self,
        register: Register,
        outcome: Result<f64, MeterError>,
        resync: bool,
    ) -> Option<PollEvent> {
        let policy = self.session.as_ref()?.options.policy;
        let now = self.stream.clock().now_ms();

        match &outcome {
            Ok(value) => tracing::debug!("{}: {:.2}", register, value),
            Err(err) => {
                tracing::warn!("{}", err);
                if policy == ErrorPolicy::Strict {
                    self.session = None;
                    self.resync_next = resync;
                    return Some(PollEvent::Failed(err.clone()));
                }
            }
        }

        let session = self.session.as_mut()?;
        match &outcome {
            Ok(_) => session.report.updated.push(register),
            Err(err) => session.report.failures.push(err.clone()),
        }
        session.index += 1;
        session.phase = if resync {
            Phase::resync(now)
        } else {
            Phase::BeginQuery
        };

        if session.index < Register::COUNT {
            return Some(PollEvent::Register { register, outcome });
        }

        self.resync_next = resync;

        let session = self.session.take()?;
        let mut report = session.report;
        report.elapsed_ms = self.stream.clock().now_ms().saturating_sub(session.started_ms);
        tracing::debug!(
            "slave {}: poll finished in {} ms, {} updated, {} failed",
            self.slave_address,
            report.elapsed_ms,
            report.updated.len(),
            report.failures.len()
        );
        Some(PollEvent::Completed(report))
    }

    /// Run a whole session on the calling thread
    ///
    /// `on_event` sees every event, the final one included. A transport
    /// error abandons the session before it is returned.
    pub fn poll(
        &mut self,
        options: PollOptions,
        mut on_event: impl FnMut(&PollEvent),
    ) -> Result<PollReport, MeterError> {
        self.poll_async(options)?;

        while self.has_pending() {
            let event = match self.iterate() {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) => {
                    self.abandon();
                    return Err(err.into());
                }
            };
            on_event(&event);
            match event {
                PollEvent::Completed(report) => return Ok(report),
                PollEvent::Failed(err) => return Err(err),
                PollEvent::Register { .. } => {}
            }
        }

        Ok(PollReport::default())
    }

    /// Values decoded so far
    pub fn values(&self) -> &RegisterTable {
        &self.values
    }

    /// Last value of `register`
    pub fn value(&self, register: Register) -> f64 {
        self.values.get(register)
    }

    /// Line to neutral voltage (V)
    pub fn voltage(&self) -> f64 {
        self.value(Register::Voltage)
    }

    /// Current (A)
    pub fn current(&self) -> f64 {
        self.value(Register::Current)
    }

    /// Active power (W)
    pub fn active_power(&self) -> f64 {
        self.value(Register::ActivePower)
    }

    /// Apparent power (VA)
    pub fn apparent_power(&self) -> f64 {
        self.value(Register::ApparentPower)
    }

    /// Reactive power (VAr)
    pub fn reactive_power(&self) -> f64 {
        self.value(Register::ReactivePower)
    }

    /// Power factor
    pub fn power_factor(&self) -> f64 {
        self.value(Register::PowerFactor)
    }

    /// Phase angle (degrees)
    pub fn phase_angle(&self) -> f64 {
        self.value(Register::PhaseAngle)
    }

    /// Frequency (Hz)
    pub fn frequency(&self) -> f64 {
        self.value(Register::Frequency)
    }

    /// Import active energy (kWh)
    pub fn import_active_energy(&self) -> f64 {
        self.value(Register::ImportActiveEnergy)
    }

    /// Export active energy (kWh)
    pub fn export_active_energy(&self) -> f64 {
        self.value(Register::ExportActiveEnergy)
    }

    /// Import reactive energy (kvarh)
    pub fn import_reactive_energy(&self) -> f64 {
        self.value(Register::ImportReactiveEnergy)
    }

    /// Export reactive energy (kvarh)
    pub fn export_reactive_energy(&self) -> f64 {
        self.value(Register::ExportReactiveEnergy)
    }

    /// Total active energy (kWh)
    pub fn total_active_energy(&self) -> f64 {
        self.value(Register::TotalActiveEnergy)
    }

    /// Total reactive energy (kvarh)
    pub fn total_reactive_energy(&self) -> f64 {
        self.value(Register::TotalReactiveEnergy)
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        self.stream.get_ref()
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        self.stream.get_mut()
    }

    /// Clock driving the timeouts
    pub fn clock(&self) -> &C {
        self.stream.clock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::modbus::{build_exception_response, build_read_response, ExceptionCode};
    use crate::core::stream::StartError;
    use crate::core::timer::ManualClock;
    use std::collections::VecDeque;

    /// Half-duplex line that answers each request with a canned reply
    #[derive(Default)]
    struct Line {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<Vec<u8>>,
        rx: VecDeque<u8>,
        failed_writes: usize,
    }

    impl ByteSource for Line {
        fn poll(&mut self) -> Result<bool, TransportError> {
            Ok(!self.rx.is_empty())
        }

        fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
            Ok(self.rx.pop_front())
        }

        fn discard_input(&mut self) -> Result<(), TransportError> {
            self.rx.clear();
            Ok(())
        }
    }

    impl ByteSink for Line {
        fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
            if self.failed_writes > 0 {
                self.failed_writes -= 1;
                return Err(TransportError::Disconnected);
            }
            self.sent.push(data.to_vec());
            if let Some(reply) = self.replies.pop_front() {
                self.rx.extend(reply);
            }
            Ok(())
        }
    }

    /// Line where replies travel one byte per poll; only bytes that have
    /// arrived can be discarded. Every poll takes 1 ms.
    struct SlowLine {
        clock: ManualClock,
        replies: VecDeque<Vec<u8>>,
        wire: VecDeque<u8>,
        rx: VecDeque<u8>,
    }

    impl ByteSource for SlowLine {
        fn poll(&mut self) -> Result<bool, TransportError> {
            self.clock.advance(1);
            if let Some(byte) = self.wire.pop_front() {
                self.rx.push_back(byte);
            }
            Ok(!self.rx.is_empty())
        }

        fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
            Ok(self.rx.pop_front())
        }

        fn discard_input(&mut self) -> Result<(), TransportError> {
            self.rx.clear();
            Ok(())
        }
    }

    impl ByteSink for SlowLine {
        fn write_all(&mut self, _data: &[u8]) -> Result<(), TransportError> {
            if let Some(reply) = self.replies.pop_front() {
                self.wire.extend(reply);
            }
            Ok(())
        }
    }

    fn float_reply(value: f32) -> Vec<u8> {
        build_read_response(1, FunctionCode::ReadInputRegisters, &value.to_be_bytes())
    }

    fn run<T: ByteSource + ByteSink>(poller: &mut MeterPoller<T, ManualClock>, max: usize) -> Vec<PollEvent> {
        let mut events = Vec::new();
        for _ in 0..max {
            if !poller.has_pending() {
                break;
            }
            if let Some(event) = poller.iterate().unwrap() {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn test_single_register_cycle() {
        let mut line = Line::default();
        line.replies.push_back(float_reply(230.0));
        let mut poller = MeterPoller::new(1, line, ManualClock::new());

        poller.poll_async(PollOptions::default()).unwrap();
        assert_eq!(poller.progress(), Some(0));

        // send query
        assert!(poller.iterate().unwrap().is_none());
        assert_eq!(
            poller.transport().sent[0],
            vec![0x01, 0x04, 0x00, 0x00, 0x00, 0x02, 0x71, 0xCB]
        );

        // start header read, then one byte per step
        assert!(poller.iterate().unwrap().is_none());
        for _ in 0..3 {
            assert!(poller.iterate().unwrap().is_none());
        }

        // start body read, then 6 bytes; the last completes the register
        assert!(poller.iterate().unwrap().is_none());
        for _ in 0..5 {
            assert!(poller.iterate().unwrap().is_none());
        }
        let event = poller.iterate().unwrap().unwrap();
        assert!(matches!(
            event,
            PollEvent::Register {
                register: Register::Voltage,
                outcome: Ok(v)
            } if v == 230.0
        ));
        assert_eq!(poller.voltage(), 230.0);
        assert_eq!(poller.progress(), Some(1));
    }

    #[test]
    fn test_full_session_completes_once() {
        let mut line = Line::default();
        for (i, _) in Register::ALL.iter().enumerate() {
            line.replies.push_back(float_reply(i as f32 + 0.5));
        }
        let mut poller = MeterPoller::new(1, line, ManualClock::new());
        poller.poll_async(PollOptions::default()).unwrap();

        let events = run(&mut poller, 10_000);
        let completed: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, PollEvent::Completed(_)))
            .collect();
        assert_eq!(completed.len(), 1);
        assert_eq!(events.len(), Register::COUNT);

        let PollEvent::Completed(report) = events.last().unwrap() else {
            panic!("last event is not Completed");
        };
        assert!(report.is_complete());
        assert_eq!(poller.total_reactive_energy(), 13.5);
        assert!(!poller.has_pending());
        assert!(poller.iterate().unwrap().is_none());

        let sent = &poller.transport().sent;
        assert_eq!(sent.len(), Register::COUNT);
        assert_eq!(&sent[12][2..4], &[0x01, 0x56]);
    }

    #[test]
    fn test_second_poll_rejected() {
        let mut poller = MeterPoller::new(1, Line::default(), ManualClock::new());
        poller.poll_async(PollOptions::default()).unwrap();
        poller.iterate().unwrap();

        assert!(matches!(
            poller.poll_async(PollOptions::default().strict()),
            Err(MeterError::SessionActive)
        ));
        assert_eq!(poller.progress(), Some(0));
    }

    #[test]
    fn test_exception_response_skipped() {
        let mut line = Line::default();
        line.replies.push_back(build_exception_response(
            1,
            FunctionCode::ReadInputRegisters,
            ExceptionCode::IllegalDataAddress,
        ));
        line.replies.push_back(float_reply(1.25));
        let mut poller = MeterPoller::new(1, line, ManualClock::new());
        poller.poll_async(PollOptions::default()).unwrap();

        let events = run(&mut poller, 40);
        assert!(matches!(
            &events[0],
            PollEvent::Register {
                register: Register::Voltage,
                outcome: Err(MeterError::Exception { code: 0x02, .. })
            }
        ));
        assert!(matches!(
            &events[1],
            PollEvent::Register {
                register: Register::Current,
                outcome: Ok(v)
            } if *v == 1.25
        ));
        assert_eq!(poller.voltage(), 0.0);
    }

    #[test]
    fn test_wrong_slave_is_malformed() {
        let mut line = Line::default();
        line.replies.push_back(build_read_response(
            9,
            FunctionCode::ReadInputRegisters,
            &1.0f32.to_be_bytes(),
        ));
        let mut poller = MeterPoller::new(1, line, ManualClock::new());
        poller.poll_async(PollOptions::default().strict()).unwrap();

        let events = run(&mut poller, 20);
        assert!(matches!(
            events.as_slice(),
            [PollEvent::Failed(MeterError::MalformedHeader {
                reason: FrameError::SlaveMismatch { expected: 1, actual: 9 },
                ..
            })]
        ));
        assert!(!poller.has_pending());

        // rest of the rejected frame may still be arriving
        poller.poll_async(PollOptions::default()).unwrap();
        assert!(matches!(
            poller.session.as_ref().map(|s| s.phase),
            Some(Phase::Resync { .. })
        ));
    }

    #[test]
    fn test_rejected_header_does_not_shift_next_frames() {
        let clock = ManualClock::new();
        let mut replies = VecDeque::new();
        replies.push_back(build_read_response(
            7,
            FunctionCode::ReadInputRegisters,
            &63.0f32.to_be_bytes(),
        ));
        replies.push_back(float_reply(1.5));
        replies.push_back(float_reply(2.5));
        let line = SlowLine {
            clock: clock.clone(),
            replies,
            wire: VecDeque::new(),
            rx: VecDeque::new(),
        };
        let mut poller = MeterPoller::new(1, line, clock);
        poller.poll_async(PollOptions::new(50)).unwrap();

        let events = run(&mut poller, 20_000);
        assert!(matches!(
            &events[0],
            PollEvent::Register {
                register: Register::Voltage,
                outcome: Err(MeterError::MalformedHeader {
                    reason: FrameError::SlaveMismatch { actual: 7, .. },
                    ..
                })
            }
        ));
        assert!(matches!(
            &events[1],
            PollEvent::Register {
                register: Register::Current,
                outcome: Ok(v)
            } if *v == 1.5
        ));
        assert!(matches!(
            &events[2],
            PollEvent::Register {
                register: Register::ActivePower,
                outcome: Ok(v)
            } if *v == 2.5
        ));
        assert!(matches!(events.last(), Some(PollEvent::Completed(_))));
        assert_eq!(poller.current(), 1.5);
    }

    #[test]
    fn test_transport_error_abandons_blocking_poll() {
        let mut line = Line::default();
        line.failed_writes = 1;
        for (i, _) in Register::ALL.iter().enumerate() {
            line.replies.push_back(float_reply(i as f32));
        }
        let mut poller = MeterPoller::new(1, line, ManualClock::new());

        let err = poller.poll(PollOptions::default(), |_| {}).unwrap_err();
        assert!(matches!(err, MeterError::Transport(ref e) if matches!(**e, TransportError::Disconnected)));
        assert!(!poller.has_pending());

        let report = poller.poll(PollOptions::default(), |_| {}).unwrap();
        assert!(report.is_complete());
    }

    #[test]
    fn test_abandon_mid_read() {
        let mut line = Line::default();
        line.replies.push_back(float_reply(3.0));
        let mut poller = MeterPoller::new(1, line, ManualClock::new());
        poller.poll_async(PollOptions::default()).unwrap();
        for _ in 0..4 {
            poller.iterate().unwrap();
        }
        assert!(poller.stream.has_pending());

        poller.abandon();
        assert!(!poller.has_pending());
        assert!(!poller.stream.has_pending());
        assert!(poller.iterate().unwrap().is_none());
        assert_eq!(poller.voltage(), 0.0);
    }

    #[test]
    fn test_refused_read_reported() {
        let mut poller = MeterPoller::new(1, Line::default(), ManualClock::new());
        poller.poll_async(PollOptions::default()).unwrap();

        let event = poller.start_read(Register::Voltage, 0, RX_BUFFER_SIZE + 1, 100);
        assert!(matches!(
            event,
            Some(PollEvent::Register {
                register: Register::Voltage,
                outcome: Err(MeterError::ReadRefused {
                    reason: StartError::BufferTooSmall { .. },
                    ..
                })
            })
        ));
        assert_eq!(poller.progress(), Some(1));
        assert!(poller.rx.is_some());
    }

    #[test]
    fn test_oversized_byte_count_rejected() {
        let mut line = Line::default();
        line.replies.push_back(vec![0x01, 0x04, 0x40]);
        let mut poller = MeterPoller::new(1, line, ManualClock::new());
        poller.poll_async(PollOptions::default().strict()).unwrap();

        let events = run(&mut poller, 20);
        assert!(matches!(
            events.as_slice(),
            [PollEvent::Failed(MeterError::MalformedHeader {
                reason: FrameError::Oversized { len: 69, max: RX_BUFFER_SIZE },
                ..
            })]
        ));
    }

    #[test]
    fn test_stale_input_discarded_before_query() {
        let mut line = Line::default();
        line.rx.extend([0xAA, 0xBB]);
        line.replies.push_back(float_reply(42.0));
        let mut poller = MeterPoller::new(1, line, ManualClock::new());
        poller.poll_async(PollOptions::default()).unwrap();

        let events = run(&mut poller, 20);
        assert!(matches!(
            &events[0],
            PollEvent::Register { outcome: Ok(v), .. } if *v == 42.0
        ));
    }
}
