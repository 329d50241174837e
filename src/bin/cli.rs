//! meterpoll - read an SDM220 energy meter over Modbus RTU
//!
//! Polls all fourteen measurement registers once and prints them.

use clap::{ArgAction, Parser};
use meterpoll_core::cli::{self, CliResult, OutputFormat};
use meterpoll_core::config::AppConfig;
use meterpoll_core::core::meter::{ErrorPolicy, MeterPoller, PollEvent};
use meterpoll_core::core::simulator::SimulatedMeter;
use meterpoll_core::core::timer::SystemClock;
use meterpoll_core::core::transport::{list_ports, ByteSink, ByteSource, SerialLine, SerialParity};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

/// meterpoll CLI
#[derive(Parser, Debug)]
#[command(
    name = "meterpoll",
    version,
    about = "Poll an SDM220 energy meter over a Modbus RTU serial line",
    long_about = None
)]
struct Cli {
    /// Serial device (e.g., /dev/ttyUSB0, COM3)
    #[arg(required_unless_present_any = ["list_ports", "exit_codes"])]
    device: Option<String>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, env = "METERPOLL_CONFIG")]
    config: Option<PathBuf>,

    /// Modbus slave address of the meter
    #[arg(short, long)]
    address: Option<u8>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Parity (none, odd, even)
    #[arg(long)]
    parity: Option<String>,

    /// Read timeout in milliseconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Stop at the first register that cannot be read
    #[arg(long)]
    strict: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output (-v debug, -vv trace with frame dumps)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Poll the built-in simulated meter instead of DEVICE
    #[arg(long)]
    simulate: bool,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Print the exit code table and exit
    #[arg(long)]
    exit_codes: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match run(&cli) {
        Ok(result) => result,
        Err(e) => CliResult::error(cli::ExitCodes::ERROR, format!("{e:#}")),
    };

    if let CliResult::Error(code, msg) = &result {
        tracing::error!("{}", msg);
        if !cli.quiet {
            eprintln!("meterpoll: {msg} ({})", cli::exit_code_description(*code));
        }
    }
    result.to_exit_code()
}

fn run(cli: &Cli) -> anyhow::Result<CliResult> {
    if cli.exit_codes {
        cli::print_exit_codes();
        return Ok(CliResult::success());
    }

    let loaded = AppConfig::load(cli.config.as_deref());

    let logging = loaded.as_ref().map(|c| c.logging.clone()).unwrap_or_default();
    let directive = cli::level_directive(&logging, cli.verbose, cli.quiet);
    if let Err(e) = cli::init_tracing(&directive, logging.json) {
        eprintln!("meterpoll: logging disabled: {e}");
    }

    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => return Ok(CliResult::from(&e)),
    };

    if cli.list_ports {
        return print_ports(cli);
    }

    if let Some(address) = cli.address {
        config.meter.address = address;
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(parity) = &cli.parity {
        match parity.parse::<SerialParity>() {
            Ok(parity) => config.serial.parity = parity,
            Err(e) => return Ok(CliResult::invalid_args(e.to_string())),
        }
    }
    if let Some(timeout) = cli.timeout {
        config.meter.timeout_ms = timeout;
    }
    if cli.strict {
        config.meter.policy = ErrorPolicy::Strict;
    }
    if let Err(e) = config.validate() {
        return Ok(CliResult::invalid_args(e.to_string()));
    }

    let device = cli.device.clone().unwrap_or_default();
    let address = config.meter.address;

    tracing::info!("meterpoll v{}", meterpoll_core::VERSION);

    if cli.simulate {
        tracing::info!("polling simulated meter (slave {}) as {}", address, device);
        let mut poller = MeterPoller::new(address, SimulatedMeter::new(address), SystemClock::new());
        return poll_meter(cli, &config, &mut poller);
    }

    let serial = config.serial.to_serial_config(&device);
    let line = match SerialLine::open(serial) {
        Ok(line) => line,
        Err(e) => return Ok(CliResult::from(&e)),
    };
    tracing::info!("polling {} (slave {})", line.connection_info(), address);

    let mut poller = MeterPoller::new(address, line, SystemClock::new());
    let result = poll_meter(cli, &config, &mut poller);

    let stats = poller.transport().stats();
    tracing::debug!(
        "line stats: {} bytes sent in {} frames, {} received, {} discarded",
        stats.bytes_sent,
        stats.frames_sent,
        stats.bytes_received,
        stats.bytes_discarded
    );
    result
}

fn poll_meter<T: ByteSource + ByteSink>(
    cli: &Cli,
    config: &AppConfig,
    poller: &mut MeterPoller<T, SystemClock>,
) -> anyhow::Result<CliResult> {
    let options = config.meter.poll_options();

    let result = poller.poll(options, |event| {
        if let PollEvent::Register {
            register,
            outcome: Ok(value),
        } = event
        {
            tracing::debug!("{} = {}", register.key(), value);
        }
    });

    match result {
        Ok(report) => {
            if !report.failures.is_empty() {
                tracing::warn!(
                    "{} of {} registers could not be read",
                    report.failures.len(),
                    report.failures.len() + report.updated.len()
                );
            }
            let rendered = cli::format_output(
                poller.values(),
                poller.slave_address(),
                Some(&report),
                cli.format,
            );
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            if cli.format == OutputFormat::Json {
                writeln!(stdout)?;
            }
            stdout.flush()?;
            Ok(CliResult::success())
        }
        Err(e) => Ok(CliResult::from(&e)),
    }
}

fn print_ports(cli: &Cli) -> anyhow::Result<CliResult> {
    let ports = match list_ports() {
        Ok(ports) => ports,
        Err(e) => return Ok(CliResult::from(&e)),
    };

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if ports.is_empty() && !cli.quiet {
                println!("No serial ports found.");
            }
            for port in &ports {
                println!("{}", port.port_name);
            }
        }
    }
    Ok(CliResult::success())
}
