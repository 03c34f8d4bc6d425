use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Subcommand, ValueEnum};
use motelink_device::{Device, DeviceConfig, DeviceError, ExtensionType, ReportMode};
use motelink_frame::AddressSpace;
use motelink_transport::TransportError;

use crate::exit::{device_error, CliError, CliResult, TIMEOUT};
use crate::output::OutputFormat;

pub mod detect;
pub mod emulate;
pub mod memory;
pub mod monitor;
pub mod status;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a simulated controller on a socket directory.
    Emulate(EmulateArgs),
    /// Request and print a status report.
    Status(StatusArgs),
    /// Read controller memory.
    Read(ReadArgs),
    /// Write controller memory.
    Write(WriteArgs),
    /// Stream event batches.
    Monitor(MonitorArgs),
    /// Identify the attached extension.
    Detect(DetectArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Emulate(args) => emulate::run(args),
        Command::Status(args) => status::run(args, format),
        Command::Read(args) => memory::read(args, format),
        Command::Write(args) => memory::write(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Detect(args) => detect::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where the controller's sockets live and how long to wait on it.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Directory holding control.sock and interrupt.sock.
    pub dir: PathBuf,
    /// Reply timeout, also bounding the connect retries (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct EmulateArgs {
    /// Directory to create the sockets in.
    pub dir: PathBuf,
    /// Extension plugged into the simulated controller.
    #[arg(long, value_enum, default_value = "none")]
    pub extension: ExtensionArg,
    /// Fit a MotionPlus between the controller and its extension.
    #[arg(long)]
    pub motionplus: bool,
    /// Battery level reported in status replies.
    #[arg(long, value_parser = parse_u8)]
    pub battery: Option<u8>,
    /// Exit after serving N host sessions.
    #[arg(long)]
    pub sessions: Option<usize>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Address space to read from.
    #[arg(long, value_enum, default_value = "eeprom")]
    pub space: SpaceArg,
    /// Start address (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_u32)]
    pub offset: u32,
    /// Number of bytes to read.
    #[arg(long, value_parser = parse_u32)]
    pub len: u32,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Address space to write to.
    #[arg(long, value_enum, default_value = "eeprom")]
    pub space: SpaceArg,
    /// Start address (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_u32)]
    pub offset: u32,
    /// Bytes to write as hex (e.g. deadbeef or de:ad:be:ef).
    #[arg(long, value_parser = parse_hex)]
    pub data: HexBytes,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Report mode (comma-separated).
    #[arg(long, value_enum, value_delimiter = ',', default_value = "status,btn")]
    pub mode: Vec<ModeArg>,
    /// Exit after N event batches.
    #[arg(long)]
    pub count: Option<usize>,
    /// Ask for reports even when nothing changes.
    #[arg(long)]
    pub continuous: bool,
}

#[derive(Args, Debug)]
pub struct DetectArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Also try to activate a MotionPlus.
    #[arg(long)]
    pub motionplus: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ExtensionArg {
    None,
    Nunchuk,
    Classic,
    Balance,
}

impl From<ExtensionArg> for ExtensionType {
    fn from(arg: ExtensionArg) -> Self {
        match arg {
            ExtensionArg::None => ExtensionType::None,
            ExtensionArg::Nunchuk => ExtensionType::Nunchuk,
            ExtensionArg::Classic => ExtensionType::Classic,
            ExtensionArg::Balance => ExtensionType::Balance,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum SpaceArg {
    Eeprom,
    Register,
}

impl From<SpaceArg> for AddressSpace {
    fn from(arg: SpaceArg) -> Self {
        match arg {
            SpaceArg::Eeprom => AddressSpace::Eeprom,
            SpaceArg::Register => AddressSpace::Register,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Status,
    Btn,
    Acc,
    Ir,
    Nunchuk,
    Classic,
    Balance,
    Motionplus,
}

impl ModeArg {
    pub fn flag(self) -> ReportMode {
        match self {
            ModeArg::Status => ReportMode::STATUS,
            ModeArg::Btn => ReportMode::BTN,
            ModeArg::Acc => ReportMode::ACC,
            ModeArg::Ir => ReportMode::IR,
            ModeArg::Nunchuk => ReportMode::NUNCHUK,
            ModeArg::Classic => ReportMode::CLASSIC,
            ModeArg::Balance => ReportMode::BALANCE,
            ModeArg::Motionplus => ReportMode::MOTIONPLUS,
        }
    }
}

pub fn report_mode(modes: &[ModeArg]) -> ReportMode {
    modes
        .iter()
        .fold(ReportMode::empty(), |mode, arg| mode | arg.flag())
}

/// Parsed `--data` bytes. A newtype so clap does not treat it as a list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

fn parse_u32(input: &str) -> Result<u32, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(digits) => u32::from_str_radix(digits, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("invalid number: {input}"))
}

fn parse_u8(input: &str) -> Result<u8, String> {
    let value = parse_u32(input)?;
    u8::try_from(value).map_err(|_| format!("value out of range (max 255): {input}"))
}

fn parse_hex(input: &str) -> Result<HexBytes, String> {
    let digits: String = input
        .chars()
        .filter(|c| !matches!(c, ':' | ' ' | '-'))
        .collect();
    if digits.is_empty() {
        return Err("data must not be empty".to_string());
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits: {input}"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex data: {input}"))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(HexBytes)
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Connect to the socket directory, retrying while the sockets are not up.
pub fn connect(args: &ConnectArgs) -> CliResult<Device> {
    let timeout = parse_duration(&args.timeout)?;
    let config = DeviceConfig::default()
        .with_reply_timeout(timeout)
        .with_transfer_timeout(Some(timeout));

    let start = Instant::now();
    loop {
        match Device::connect_path(&args.dir, config.clone()) {
            Ok(device) => return Ok(device),
            Err(err) => {
                if !is_retryable_connect_error(&err) {
                    return Err(device_error("connect failed", err));
                }
                if start.elapsed() >= timeout {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!(
                            "connect to {} timed out after {timeout:?}",
                            args.dir.display()
                        ),
                    ));
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

fn is_retryable_connect_error(err: &DeviceError) -> bool {
    match err {
        DeviceError::Transport(TransportError::Connect { source, .. }) => {
            source.kind() == std::io::ErrorKind::NotFound
                || source.kind() == std::io::ErrorKind::ConnectionRefused
        }
        _ => false,
    }
}

/// Close the session and join its threads.
pub fn finish(device: Device) -> CliResult<()> {
    device
        .disconnect()
        .map_err(|err| device_error("disconnect failed", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_and_hex_offsets() {
        assert_eq!(parse_u32("4000").unwrap(), 4000);
        assert_eq!(parse_u32("0x16").unwrap(), 0x16);
        assert_eq!(parse_u32("0XA400FA").unwrap(), 0xA4_00FA);
        assert!(parse_u32("0xZZ").is_err());
        assert!(parse_u8("0x100").is_err());
    }

    #[test]
    fn parses_hex_data_with_separators() {
        assert_eq!(parse_hex("deadBEEF").unwrap().0, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(parse_hex("01:02 03").unwrap().0, vec![1, 2, 3]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
        assert!(parse_hex("").is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn modes_combine() {
        assert_eq!(
            report_mode(&[ModeArg::Btn, ModeArg::Acc, ModeArg::Ir]),
            ReportMode::BTN | ReportMode::ACC | ReportMode::IR
        );
        assert_eq!(report_mode(&[]), ReportMode::empty());
    }
}
