use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;

use hifc_frame::{handler_name, Envelope, TraceReader};
use serde::Serialize;

use crate::cmd::TraceArgs;
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_envelope, print_json, print_table, OutputFormat};

#[derive(Debug, Default, Serialize)]
struct HandlerSummary {
    handler: u8,
    handler_name: &'static str,
    envelopes: u64,
    payload_bytes: u64,
}

pub fn run(args: TraceArgs, format: OutputFormat) -> CliResult<i32> {
    let file = File::open(&args.path)
        .map_err(|err| io_error(&format!("failed opening {}", args.path.display()), err))?;
    let mut reader = TraceReader::new(BufReader::new(file));

    let mut summary: BTreeMap<u8, HandlerSummary> = BTreeMap::new();
    while let Some(envelope) = reader
        .next_envelope()
        .map_err(|err| frame_error("trace decode failed", err))?
    {
        if !selected(&envelope, args.handlers.as_deref()) {
            continue;
        }
        if args.summary {
            tally(&mut summary, &envelope);
        } else {
            print_envelope(&envelope, format);
        }
    }

    if args.summary {
        print_summary(summary.into_values().collect(), format);
    }
    Ok(SUCCESS)
}

fn selected(envelope: &Envelope, handlers: Option<&[u8]>) -> bool {
    handlers.is_none_or(|handlers| handlers.contains(&envelope.handler))
}

fn tally(summary: &mut BTreeMap<u8, HandlerSummary>, envelope: &Envelope) {
    let entry = summary
        .entry(envelope.handler)
        .or_insert_with(|| HandlerSummary {
            handler: envelope.handler,
            handler_name: handler_name(envelope.handler),
            ..HandlerSummary::default()
        });
    entry.envelopes += 1;
    entry.payload_bytes += envelope.payload.len() as u64;
}

fn print_summary(rows: Vec<HandlerSummary>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for row in &rows {
                print_json(row);
            }
        }
        OutputFormat::Table => print_table(
            &["HANDLER", "ENVELOPES", "BYTES"],
            rows.iter()
                .map(|row| {
                    vec![
                        format!("{} (0x{:02x})", row.handler_name, row.handler),
                        row.envelopes.to_string(),
                        row.payload_bytes.to_string(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            for row in &rows {
                println!(
                    "{} (0x{:02x}) envelopes={} bytes={}",
                    row.handler_name, row.handler, row.envelopes, row.payload_bytes
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use hifc_frame::{AUDIO, RTC};

    use super::*;

    #[test]
    fn summary_counts_per_handler() {
        let mut summary = BTreeMap::new();
        tally(&mut summary, &Envelope::message(RTC, &b"ab"[..]));
        tally(&mut summary, &Envelope::message(RTC, &b"cde"[..]));
        tally(&mut summary, &Envelope::message(AUDIO, &b"x"[..]));

        let rtc = &summary[&RTC];
        assert_eq!((rtc.envelopes, rtc.payload_bytes), (2, 5));
        assert_eq!(summary[&AUDIO].envelopes, 1);
    }

    #[test]
    fn handler_filter() {
        let envelope = Envelope::message(RTC, &b""[..]);
        assert!(selected(&envelope, None));
        assert!(selected(&envelope, Some(&[RTC, AUDIO][..])));
        assert!(!selected(&envelope, Some(&[AUDIO][..])));
    }
}
