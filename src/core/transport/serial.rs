//! Serial line transport (RS-485 adapters, USB-serial)

use super::{ByteSink, ByteSource, TransportError, TransportStats};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

impl std::str::FromStr for SerialFlowControl {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "no" => Ok(Self::None),
            "hardware" | "hw" | "rtscts" => Ok(Self::Hardware),
            "software" | "sw" | "xonxoff" => Ok(Self::Software),
            other => Err(TransportError::InvalidConfiguration(format!(
                "unknown flow control '{other}'"
            ))),
        }
    }
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(TransportError::InvalidConfiguration(format!(
                "unknown parity '{other}'"
            ))),
        }
    }
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., /dev/ttyUSB0, COM3)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
}

impl SerialConfig {
    /// Default line speed of the metering device
    pub const DEFAULT_BAUD_RATE: u32 = 9600;

    /// Create a new 8N1 serial configuration
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }

    /// Reject settings the port driver cannot express
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.port.is_empty() {
            return Err(TransportError::InvalidConfiguration(
                "port name is empty".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(TransportError::InvalidConfiguration(
                "baud rate must be non-zero".to_string(),
            ));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(TransportError::InvalidConfiguration(format!(
                "data bits must be 5-8, got {}",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(TransportError::InvalidConfiguration(format!(
                "stop bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        Ok(())
    }

    /// Short human-readable description, e.g. `/dev/ttyUSB0 @ 9600 baud (8N1 No FC)`
    pub fn describe(&self) -> String {
        format!(
            "{} @ {} baud ({}{}{} {})",
            self.port,
            self.baud_rate,
            self.data_bits,
            match self.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.stop_bits,
            match self.flow_control {
                SerialFlowControl::None => "No FC",
                SerialFlowControl::Hardware => "HW FC",
                SerialFlowControl::Software => "SW FC",
            }
        )
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", Self::DEFAULT_BAUD_RATE)
    }
}

/// Open serial line to the meter
pub struct SerialLine {
    config: SerialConfig,
    port: Box<dyn SerialPort>,
    stats: TransportStats,
}

impl SerialLine {
    /// Open and configure the port described by `config`
    pub fn open(config: SerialConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let data_bits = match config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match config.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match config.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        // The engine reads only after bytes_to_read() reported data, so the
        // timeout bounds a read that finds nothing rather than being a wait.
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(config.port.clone()),
                serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                    TransportError::PortNotFound(config.port.clone())
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(config.port.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        port.clear(ClearBuffer::All)
            .map_err(|e| TransportError::IoError(e.into()))?;

        tracing::debug!("opened serial line {}", config.describe());

        Ok(Self::from_port(config, port))
    }

    /// Wrap a port that is already open and configured
    ///
    /// Reads rely on the port's own timeout, so keep it short.
    pub fn from_port(config: SerialConfig, port: Box<dyn SerialPort>) -> Self {
        Self {
            config,
            port,
            stats: TransportStats::default(),
        }
    }

    /// Configuration the line was opened with
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Connection info string
    pub fn connection_info(&self) -> String {
        self.config.describe()
    }

    /// Traffic counters
    pub fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

impl ByteSource for SerialLine {
    fn poll(&mut self) -> Result<bool, TransportError> {
        let pending = self
            .port
            .bytes_to_read()
            .map_err(|e| TransportError::IoError(e.into()))?;
        Ok(pending > 0)
    }

    fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(1) => {
                self.stats.bytes_received += 1;
                Ok(Some(byte[0]))
            }
            Ok(_) => Ok(None),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TransportError::IoError(e)),
        }
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        let pending = self
            .port
            .bytes_to_read()
            .map_err(|e| TransportError::IoError(e.into()))?;
        if pending > 0 {
            self.port
                .clear(ClearBuffer::Input)
                .map_err(|e| TransportError::IoError(e.into()))?;
            self.stats.bytes_discarded += u64::from(pending);
            tracing::debug!("discarded {} stale input bytes", pending);
        }
        Ok(())
    }
}

impl ByteSink for SerialLine {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(data)?;
        self.port.flush()?;

        self.stats.bytes_sent += data.len() as u64;
        self.stats.frames_sent += 1;
        Ok(())
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parity_and_flow() {
        assert_eq!("E".parse::<SerialParity>().unwrap(), SerialParity::Even);
        assert_eq!("none".parse::<SerialParity>().unwrap(), SerialParity::None);
        assert!("mark".parse::<SerialParity>().is_err());

        assert_eq!(
            "hw".parse::<SerialFlowControl>().unwrap(),
            SerialFlowControl::Hardware
        );
        assert!("maybe".parse::<SerialFlowControl>().is_err());
    }

    #[test]
    fn test_describe() {
        let config = SerialConfig::new("/dev/ttyUSB1", 9600).parity(SerialParity::Odd);
        assert_eq!(config.describe(), "/dev/ttyUSB1 @ 9600 baud (8O1 No FC)");
    }

    #[test]
    fn test_validate() {
        assert!(SerialConfig::default().validate().is_ok());
        assert!(SerialConfig::new("", 9600).validate().is_err());
        assert!(SerialConfig::new("/dev/ttyS0", 0).validate().is_err());
        assert!(SerialConfig::default().data_bits(9).validate().is_err());
        assert!(SerialConfig::default().stop_bits(3).validate().is_err());
    }

    #[test]
    fn test_open_missing_port_fails() {
        let result = SerialLine::open(SerialConfig::new("/dev/does-not-exist-meterpoll", 9600));
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_read_byte_over_pty() {
        let (master, mut slave) = serialport::TTYPort::pair().unwrap();
        let mut master: Box<dyn SerialPort> = Box::new(master);
        master.set_timeout(Duration::from_millis(10)).unwrap();
        let mut line = SerialLine::from_port(SerialConfig::new("pty", 9600), master);

        // nothing sent: the read comes back empty instead of blocking
        assert_eq!(line.read_byte().unwrap(), None);

        slave.write_all(&[0x01, 0x04]).unwrap();
        slave.flush().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert!(line.poll().unwrap());
        assert_eq!(line.read_byte().unwrap(), Some(0x01));
        assert_eq!(line.read_byte().unwrap(), Some(0x04));
        assert_eq!(line.read_byte().unwrap(), None);
        assert_eq!(line.stats().bytes_received, 2);
    }
}
