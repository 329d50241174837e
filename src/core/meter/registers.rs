//! Measurement registers of the SDM220 and the table holding their values

use std::fmt;

/// Measurement exposed by the meter, in poll order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    /// Line to neutral voltage (V)
    Voltage,
    /// Current (A)
    Current,
    /// Active power (W)
    ActivePower,
    /// Apparent power (VA)
    ApparentPower,
    /// Reactive power (VAr)
    ReactivePower,
    /// Power factor
    PowerFactor,
    /// Phase angle (degrees)
    PhaseAngle,
    /// Frequency (Hz)
    Frequency,
    /// Import active energy (kWh)
    ImportActiveEnergy,
    /// Export active energy (kWh)
    ExportActiveEnergy,
    /// Import reactive energy (kvarh)
    ImportReactiveEnergy,
    /// Export reactive energy (kvarh)
    ExportReactiveEnergy,
    /// Total active energy (kWh)
    TotalActiveEnergy,
    /// Total reactive energy (kvarh)
    TotalReactiveEnergy,
}

impl Register {
    /// Number of registers polled per session
    pub const COUNT: usize = 14;

    /// Every register, in poll order
    pub const ALL: [Register; Register::COUNT] = [
        Register::Voltage,
        Register::Current,
        Register::ActivePower,
        Register::ApparentPower,
        Register::ReactivePower,
        Register::PowerFactor,
        Register::PhaseAngle,
        Register::Frequency,
        Register::ImportActiveEnergy,
        Register::ExportActiveEnergy,
        Register::ImportReactiveEnergy,
        Register::ExportReactiveEnergy,
        Register::TotalActiveEnergy,
        Register::TotalReactiveEnergy,
    ];

    /// Position in poll order
    pub fn index(self) -> usize {
        self as usize
    }

    /// Input register address of the value's high word
    pub fn address(self) -> u16 {
        match self {
            Register::Voltage => 0x0000,
            Register::Current => 0x0006,
            Register::ActivePower => 0x000C,
            Register::ApparentPower => 0x0012,
            Register::ReactivePower => 0x0018,
            Register::PowerFactor => 0x001E,
            Register::PhaseAngle => 0x0024,
            Register::Frequency => 0x0046,
            Register::ImportActiveEnergy => 0x0048,
            Register::ExportActiveEnergy => 0x004A,
            Register::ImportReactiveEnergy => 0x004C,
            Register::ExportReactiveEnergy => 0x004E,
            Register::TotalActiveEnergy => 0x0156,
            Register::TotalReactiveEnergy => 0x0158,
        }
    }

    /// Register stored at `address`
    pub fn from_address(address: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.address() == address)
    }

    /// Display label, unit included
    pub fn label(self) -> &'static str {
        match self {
            Register::Voltage => "Line to neutral volts (V):",
            Register::Current => "Current (A):",
            Register::ActivePower => "Active power (W):",
            Register::ApparentPower => "Apparent power (VA):",
            Register::ReactivePower => "Reactive power (VAr):",
            Register::PowerFactor => "Power factor (None):",
            Register::PhaseAngle => "Phase angle (Degree):",
            Register::Frequency => "Frequency (Hz):",
            Register::ImportActiveEnergy => "Import active energy (kWh):",
            Register::ExportActiveEnergy => "Export active energy (kWh):",
            Register::ImportReactiveEnergy => "Import reactive energy (kvarh):",
            Register::ExportReactiveEnergy => "Export reactive energy (kvarh):",
            Register::TotalActiveEnergy => "Total active energy (kWh):",
            Register::TotalReactiveEnergy => "Total reactive energy (kvarh):",
        }
    }

    /// Machine-readable name
    pub fn key(self) -> &'static str {
        match self {
            Register::Voltage => "voltage",
            Register::Current => "current",
            Register::ActivePower => "active_power",
            Register::ApparentPower => "apparent_power",
            Register::ReactivePower => "reactive_power",
            Register::PowerFactor => "power_factor",
            Register::PhaseAngle => "phase_angle",
            Register::Frequency => "frequency",
            Register::ImportActiveEnergy => "import_active_energy",
            Register::ExportActiveEnergy => "export_active_energy",
            Register::ImportReactiveEnergy => "import_reactive_energy",
            Register::ExportReactiveEnergy => "export_reactive_energy",
            Register::TotalActiveEnergy => "total_active_energy",
            Register::TotalReactiveEnergy => "total_reactive_energy",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04X})", self.key(), self.address())
    }
}

/// Last decoded value of every register
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RegisterTable {
    values: [f64; Register::COUNT],
}

impl RegisterTable {
    /// Table with every slot at 0.0
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `register`; 0.0 until first populated
    pub fn get(&self, register: Register) -> f64 {
        self.values[register.index()]
    }

    /// Store a value
    pub fn set(&mut self, register: Register, value: f64) {
        self.values[register.index()] = value;
    }

    /// Registers and values in poll order
    pub fn iter(&self) -> impl Iterator<Item = (Register, f64)> + '_ {
        Register::ALL.iter().map(move |&r| (r, self.get(r)))
    }
}
