//! Virtual SDM220 meter
//!
//! A scriptable slave that sits where the serial line would: it decodes the
//! read requests written to it and queues correctly framed answers on its
//! input side. Faults can be injected per register to exercise the poller's
//! error paths without hardware.

use crate::core::meter::{Register, RegisterTable};
use crate::core::protocol::modbus::{
    build_exception_response, build_read_response, ExceptionCode, FunctionCode, ReadRequest,
    FLOAT_REGISTERS, REQUEST_LEN,
};
use crate::core::timer::ManualClock;
use crate::core::transport::{ByteSink, ByteSource, TransportError};
use std::collections::{HashMap, VecDeque};

/// Misbehaviour injected for one register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Answer with a broken CRC
    CorruptCrc,
    /// Do not answer at all
    Silent,
    /// Answer with a Modbus exception
    Exception(ExceptionCode),
    /// Answer from another slave address
    WrongSlave(u8),
    /// Send only the first `n` bytes of the answer
    Truncate(usize),
}

/// Counters kept by the simulator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    /// Well-formed requests addressed to this meter
    pub requests: u64,
    /// Answers queued, faulty ones included
    pub responses: u64,
    /// Faults applied
    pub faults_injected: u64,
    /// Requests ignored (bad CRC, other slave)
    pub ignored: u64,
}

/// Simulated SDM220 slave
pub struct SimulatedMeter {
    address: u8,
    values: RegisterTable,
    faults: HashMap<Register, Fault>,
    request: Vec<u8>,
    tx: VecDeque<u8>,
    trickle: u64,
    polls: u64,
    clock: Option<(ManualClock, u64)>,
    stats: SimulatorStats,
}

impl SimulatedMeter {
    /// Meter at `address` showing typical household readings
    pub fn new(address: u8) -> Self {
        let mut values = RegisterTable::new();
        for (register, value) in [
            (Register::Voltage, 230.4),
            (Register::Current, 4.87),
            (Register::ActivePower, 1072.5),
            (Register::ApparentPower, 1122.0),
            (Register::ReactivePower, -329.8),
            (Register::PowerFactor, 0.956),
            (Register::PhaseAngle, 17.1),
            (Register::Frequency, 50.02),
            (Register::ImportActiveEnergy, 1843.27),
            (Register::ExportActiveEnergy, 0.0),
            (Register::ImportReactiveEnergy, 12.4),
            (Register::ExportReactiveEnergy, 411.9),
            (Register::TotalActiveEnergy, 1843.27),
            (Register::TotalReactiveEnergy, 424.3),
        ] {
            values.set(register, value);
        }

        Self {
            address,
            values,
            faults: HashMap::new(),
            request: Vec::with_capacity(REQUEST_LEN),
            tx: VecDeque::new(),
            trickle: 1,
            polls: 0,
            clock: None,
            stats: SimulatorStats::default(),
        }
    }

    /// Set the value reported for `register`
    #[must_use]
    pub fn with_value(mut self, register: Register, value: f64) -> Self {
        self.values.set(register, value);
        self
    }

    /// Replace every value
    #[must_use]
    pub fn with_values(mut self, values: RegisterTable) -> Self {
        self.values = values;
        self
    }

    /// Inject `fault` whenever `register` is queried
    #[must_use]
    pub fn with_fault(mut self, register: Register, fault: Fault) -> Self {
        self.faults.insert(register, fault);
        self
    }

    /// Report data only on every `n`-th poll
    #[must_use]
    pub fn with_trickle(mut self, n: u64) -> Self {
        self.trickle = n.max(1);
        self
    }

    /// Advance `clock` by `ms` on every poll that finds nothing to read
    #[must_use]
    pub fn with_clock(mut self, clock: ManualClock, ms: u64) -> Self {
        self.clock = Some((clock, ms));
        self
    }

    /// Values served
    pub fn values(&self) -> &RegisterTable {
        &self.values
    }

    /// Counters
    pub fn stats(&self) -> &SimulatorStats {
        &self.stats
    }

    /// Bytes queued but not read yet
    pub fn pending_output(&self) -> usize {
        self.tx.len()
    }

    fn handle_request(&mut self, frame: &[u8]) {
        let request = match ReadRequest::parse(frame) {
            Ok(request) if request.slave_id == self.address => request,
            Ok(request) => {
                tracing::trace!("sim: request for slave {} ignored", request.slave_id);
                self.stats.ignored += 1;
                return;
            }
            Err(e) => {
                tracing::trace!("sim: request dropped: {}", e);
                self.stats.ignored += 1;
                return;
            }
        };
        self.stats.requests += 1;

        let function = FunctionCode::ReadInputRegisters;
        if request.function != function as u8 {
            self.queue(build_exception_response(self.address, function, ExceptionCode::IllegalFunction));
            return;
        }

        let register = match Register::from_address(request.start_address) {
            Some(register) if request.quantity == FLOAT_REGISTERS => register,
            _ => {
                self.queue(build_exception_response(
                    self.address,
                    function,
                    ExceptionCode::IllegalDataAddress,
                ));
                return;
            }
        };

        #[allow(clippy::cast_possible_truncation)]
        let payload = (self.values.get(register) as f32).to_be_bytes();
        let mut response = build_read_response(self.address, function, &payload);

        if let Some(fault) = self.faults.get(&register).copied() {
            tracing::debug!("sim: {} -> {:?}", register, fault);
            self.stats.faults_injected += 1;
            match fault {
                Fault::Silent => return,
                Fault::CorruptCrc => {
                    if let Some(last) = response.last_mut() {
                        *last ^= 0xFF;
                    }
                }
                Fault::Exception(code) => {
                    response = build_exception_response(self.address, function, code);
                }
                Fault::WrongSlave(address) => {
                    response = build_read_response(address, function, &payload);
                }
                Fault::Truncate(n) => response.truncate(n),
            }
        }

        self.queue(response);
    }

    fn queue(&mut self, response: Vec<u8>) {
        self.stats.responses += 1;
        self.tx.extend(response);
    }
}

impl ByteSource for SimulatedMeter {
    fn poll(&mut self) -> Result<bool, TransportError> {
        self.polls += 1;
        if self.tx.is_empty() {
            if let Some((clock, ms)) = &self.clock {
                clock.advance(*ms);
            }
            return Ok(false);
        }
        Ok(self.polls % self.trickle == 0)
    }

    fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
        Ok(self.tx.pop_front())
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        self.tx.clear();
        Ok(())
    }
}

impl ByteSink for SimulatedMeter {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.request.extend_from_slice(data);
        while self.request.len() >= REQUEST_LEN {
            let frame: Vec<u8> = self.request.drain(..REQUEST_LEN).collect();
            self.handle_request(&frame);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::checksum::verify_crc16_modbus;
    use crate::core::protocol::modbus::build_read_input_registers;
    use crate::core::timer::Clock;

    fn drain(sim: &mut SimulatedMeter) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = sim.read_byte().unwrap() {
            out.push(b);
        }
        out
    }

    #[test]
    fn test_answers_read_request() {
        let mut sim = SimulatedMeter::new(1).with_value(Register::Voltage, 230.0);
        sim.write_all(&build_read_input_registers(1, 0x0000)).unwrap();

        let response = drain(&mut sim);
        assert_eq!(&response[..7], &[0x01, 0x04, 0x04, 0x43, 0x66, 0x00, 0x00]);
        assert!(verify_crc16_modbus(&response));
        assert_eq!(sim.stats().requests, 1);
    }

    #[test]
    fn test_request_split_across_writes() {
        let mut sim = SimulatedMeter::new(1);
        let request = build_read_input_registers(1, 0x0046);
        sim.write_all(&request[..3]).unwrap();
        assert_eq!(sim.pending_output(), 0);
        sim.write_all(&request[3..]).unwrap();
        assert_eq!(sim.pending_output(), 9);
    }

    #[test]
    fn test_other_slave_ignored() {
        let mut sim = SimulatedMeter::new(1);
        sim.write_all(&build_read_input_registers(2, 0x0000)).unwrap();
        assert_eq!(sim.pending_output(), 0);
        assert_eq!(sim.stats().ignored, 1);
    }

    #[test]
    fn test_unknown_address_raises_exception() {
        let mut sim = SimulatedMeter::new(1);
        sim.write_all(&build_read_input_registers(1, 0x0002)).unwrap();
        let response = drain(&mut sim);
        assert_eq!(&response[..3], &[0x01, 0x84, 0x02]);
    }

    #[test]
    fn test_faults() {
        let mut sim = SimulatedMeter::new(1)
            .with_fault(Register::Voltage, Fault::CorruptCrc)
            .with_fault(Register::Current, Fault::Silent)
            .with_fault(Register::Frequency, Fault::Truncate(4));

        sim.write_all(&build_read_input_registers(1, Register::Voltage.address())).unwrap();
        assert!(!verify_crc16_modbus(&drain(&mut sim)));

        sim.write_all(&build_read_input_registers(1, Register::Current.address())).unwrap();
        assert!(drain(&mut sim).is_empty());

        sim.write_all(&build_read_input_registers(1, Register::Frequency.address())).unwrap();
        assert_eq!(drain(&mut sim).len(), 4);

        assert_eq!(sim.stats().faults_injected, 3);
    }

    #[test]
    fn test_trickle_and_clock() {
        let clock = ManualClock::new();
        let mut sim = SimulatedMeter::new(1)
            .with_trickle(3)
            .with_clock(clock.clone(), 10);

        assert!(!sim.poll().unwrap());
        assert_eq!(clock.now_ms(), 10);

        sim.write_all(&build_read_input_registers(1, 0)).unwrap();
        let ready: Vec<bool> = (0..6).map(|_| sim.poll().unwrap()).collect();
        assert_eq!(ready.iter().filter(|r| **r).count(), 2);
        assert_eq!(clock.now_ms(), 10);
    }
}
