use std::fs;
use std::time::Duration;

use hifc_frame::handler_name;
use serde::Serialize;
use tracing::info;

use crate::cmd::bus::{load_config, start_engine, with_poller};
use crate::cmd::SendArgs;
use crate::exit::{engine_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_json, OutputFormat};

/// How often the poller checks for the write-ready signal.
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Serialize)]
struct SendOutput {
    handler: u8,
    handler_name: &'static str,
    api: u16,
    raw: bool,
    body_size: usize,
    elapsed_ms: u128,
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let body = resolve_body(&args)?;

    // The engine's own bound on the send is the user's timeout.
    let mut config = load_config(&args.bus)?;
    config.sync_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let engine = start_engine(&args.bus, config, |builder| builder)?;

    let started = std::time::Instant::now();
    let result = with_poller(&engine, SEND_POLL_INTERVAL, || {
        if args.raw {
            engine.send_raw(&body)
        } else {
            engine.send(args.handler, args.api, &body)
        }
    });
    engine.shutdown();
    result.map_err(|err| engine_error("send failed", err))?;

    let out = SendOutput {
        handler: args.handler,
        handler_name: handler_name(args.handler),
        api: args.api,
        raw: args.raw,
        body_size: body.len(),
        elapsed_ms: started.elapsed().as_millis(),
    };
    info!(handler = out.handler, api = out.api, size = out.body_size, "message sent");
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Raw => {}
        OutputFormat::Table | OutputFormat::Pretty => println!(
            "sent {} bytes to {} (0x{:02x}) api=0x{:04x} in {}ms",
            out.body_size, out.handler_name, out.handler, out.api, out.elapsed_ms
        ),
    }

    Ok(SUCCESS)
}

fn resolve_body(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(hex) = &args.hex {
        return decode_hex(hex);
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

fn decode_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "--hex needs an even number of digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| CliError::new(USAGE, format!("--hex is not valid hex: {input}")))
        })
        .collect()
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
