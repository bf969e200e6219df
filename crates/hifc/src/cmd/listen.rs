use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};

use hifc_engine::{Engine, SystemService, VersionKind};
use hifc_frame::{Envelope, TraceReader, TraceSink, TraceWriter};
use tracing::{error, info, warn};

use crate::cmd::bus::{load_config, start_engine, with_poller};
use crate::cmd::send::parse_duration;
use crate::cmd::ListenArgs;
use crate::exit::{engine_error, io_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_envelope, OutputFormat};

/// Receives unclaimed envelopes from the engine.
///
/// Records are decoded and handed to the printing thread; with `--capture`
/// the wire bytes are also appended to a file.
struct ListenSink {
    tx: Sender<Envelope>,
    capture: Option<Mutex<TraceWriter<File>>>,
}

impl TraceSink for ListenSink {
    fn record(&self, bytes: &[u8]) {
        if let Some(capture) = &self.capture {
            capture.record(bytes);
        }
        match TraceReader::new(bytes).next_envelope() {
            Ok(Some(envelope)) => {
                let _ = self.tx.send(envelope);
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, len = bytes.len(), "undecodable trace record"),
        }
    }
}

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.poll_interval)?;
    let capture = args.capture.as_deref().map(open_capture).transpose()?;

    let (tx, rx) = mpsc::channel();
    let sink = Arc::new(ListenSink {
        tx,
        capture: capture.map(|file| Mutex::new(TraceWriter::new(file))),
    });

    let config = load_config(&args.bus)?;
    let engine = start_engine(&args.bus, config, |builder| builder.trace_sink(sink))?;
    let (system, _registration) = SystemService::install(&engine);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    if args.query_version {
        let timeout = engine.config().sync_timeout();
        let version = with_poller(&engine, interval, || {
            system.query_version(&engine, VersionKind::Firmware, timeout)
        })
        .map_err(|err| engine_error("version query failed", err))?;
        info!(%version, "controller firmware");
    }

    let printed = pump(&engine, &rx, &args, format, &running, interval);

    info!(
        printed,
        stats = %serde_json::to_string(&engine.stats()).unwrap_or_default(),
        "listen finished"
    );
    engine.shutdown();
    Ok(SUCCESS)
}

/// Poll the engine and print envelopes until Ctrl-C or `--count` is reached.
fn pump(
    engine: &Engine,
    rx: &Receiver<Envelope>,
    args: &ListenArgs,
    format: OutputFormat,
    running: &AtomicBool,
    interval: std::time::Duration,
) -> usize {
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        if engine.is_faulted() {
            error!("engine faulted, resetting");
            engine.clear_fault();
        }
        engine.interrupt();

        loop {
            let envelope = match rx.recv_timeout(interval) {
                Ok(envelope) => envelope,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return printed,
            };

            if let Some(handlers) = &args.handlers {
                if !handlers.contains(&envelope.handler) {
                    continue;
                }
            }

            print_envelope(&envelope, format);
            printed = printed.saturating_add(1);

            if let Some(count) = args.count {
                if printed >= count {
                    return printed;
                }
            }
        }
    }

    printed
}

fn open_capture(path: &Path) -> CliResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
