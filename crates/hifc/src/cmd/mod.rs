use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod bus;
pub mod classify;
pub mod doctor;
pub mod listen;
pub mod send;
pub mod trace;
pub mod version;

use bus::BusSpec;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the wire format of command opcodes.
    Classify(ClassifyArgs),
    /// Send one message to the controller.
    Send(SendArgs),
    /// Service the controller and print received envelopes.
    Listen(ListenArgs),
    /// Decode a captured trace file.
    Trace(TraceArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Classify(args) => classify::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Trace(args) => trace::run(args, format),
        Command::Version(args) => version::run(args, format),
        Command::Doctor(args) => doctor::run(args, format),
    }
}

/// Connection options shared by commands that open the bus.
#[derive(Args, Debug)]
pub struct BusArgs {
    /// Bus to open: `i2c:/dev/i2c-N@ADDR` or `spi:/dev/spidevB.C[@HZ]`.
    #[arg(long, env = "HIFC_BUS", value_parser = bus::parse_bus_spec)]
    pub bus: BusSpec,
    /// Engine configuration file (JSON).
    #[arg(long, value_name = "FILE", env = "HIFC_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Opcodes to classify (decimal or 0x-prefixed hex). Default: all 256.
    #[arg(value_parser = parse_u8)]
    pub opcodes: Vec<u8>,
    /// Omit unsupported opcodes.
    #[arg(long)]
    pub supported_only: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub bus: BusArgs,
    /// Handler id the message is addressed to.
    #[arg(long, default_value = "0", value_parser = parse_u8)]
    pub handler: u8,
    /// API id within the handler.
    #[arg(long, default_value = "0", value_parser = parse_u16)]
    pub api: u16,
    /// Hex-encoded body.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Raw string body.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Read body from file.
    #[arg(long, conflicts_with_all = ["hex", "data"])]
    pub file: Option<PathBuf>,
    /// Send the body as-is, without a payload header.
    #[arg(long)]
    pub raw: bool,
    /// Maximum time to wait for the controller to take the message (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub bus: BusArgs,
    /// Interrupt polling interval (e.g. 10ms, 1s).
    #[arg(long, default_value = "10ms")]
    pub poll_interval: String,
    /// Only print envelopes for these handler ids (comma-separated).
    #[arg(long, value_delimiter = ',', value_parser = parse_u8)]
    pub handlers: Option<Vec<u8>>,
    /// Exit after printing N envelopes.
    #[arg(long)]
    pub count: Option<usize>,
    /// Also append every received envelope to this capture file.
    #[arg(long, value_name = "FILE")]
    pub capture: Option<PathBuf>,
    /// Ask the controller for its firmware version before listening.
    #[arg(long)]
    pub query_version: bool,
}

#[derive(Args, Debug)]
pub struct TraceArgs {
    /// Capture file to decode.
    pub path: PathBuf,
    /// Only print envelopes for these handler ids (comma-separated).
    #[arg(long, value_delimiter = ',', value_parser = parse_u8)]
    pub handlers: Option<Vec<u8>>,
    /// Print a per-handler summary instead of every envelope.
    #[arg(long)]
    pub summary: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

fn parse_u8(input: &str) -> Result<u8, String> {
    let value = parse_int(input)?;
    u8::try_from(value).map_err(|_| format!("{input} does not fit in a byte"))
}

fn parse_u16(input: &str) -> Result<u16, String> {
    let value = parse_int(input)?;
    u16::try_from(value).map_err(|_| format!("{input} does not fit in 16 bits"))
}

pub(crate) fn parse_int(input: &str) -> Result<u64, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("invalid number: {input}"))
}
