mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "hifc", version, about = "Companion MCU protocol CLI")]
struct Cli {
    /// Output format for command results on stdout.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log record format on stderr.
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Most verbose log level written to stderr.
    #[arg(
        long,
        value_name = "LEVEL",
        env = "HIFC_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

/// Parse arguments, mapping clap failures onto the usage exit code.
fn parse_cli() -> Result<Cli, i32> {
    Cli::try_parse().map_err(|err| {
        let code = if err.use_stderr() { exit::USAGE } else { exit::SUCCESS };
        // Help and version output go to stdout; printing can only fail on a closed pipe.
        let _ = err.print();
        code
    })
}

fn main() {
    let cli = match parse_cli() {
        Ok(cli) => cli,
        Err(code) => std::process::exit(code),
    };
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let code = cmd::run(cli.command, format).unwrap_or_else(|err| {
        eprintln!("hifc: {err}");
        err.code
    });
    std::process::exit(code);
}
