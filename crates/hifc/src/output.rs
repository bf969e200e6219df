use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use hifc_frame::{handler_name, Envelope, EnvelopeKind, PayloadHeader};
use serde::Serialize;

/// Bytes of payload shown before the preview is elided.
const PREVIEW_BYTES: usize = 32;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EnvelopeOutput {
    pub kind: &'static str,
    pub handler: u8,
    pub handler_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_timestamp: Option<u64>,
    pub payload_size: usize,
    pub payload: String,
    pub received_at: String,
}

impl EnvelopeOutput {
    pub fn new(envelope: &Envelope) -> Self {
        let samples = envelope.stream_samples();
        let api = match envelope.kind {
            EnvelopeKind::Message => PayloadHeader::parse(&envelope.payload).ok().map(|h| h.api),
            _ => None,
        };
        Self {
            kind: envelope.kind.as_str(),
            handler: envelope.handler,
            handler_name: handler_name(envelope.handler),
            stream: (envelope.kind == EnvelopeKind::Stream).then_some(envelope.stream),
            api,
            sample_bytes: samples.map(|s| s.samples.len()),
            sample_timestamp: samples.map(|s| s.timestamp),
            payload_size: envelope.payload.len(),
            payload: hex_preview(&envelope.payload),
            received_at: now_unix_seconds(),
        }
    }
}

pub fn print_envelope(envelope: &Envelope, format: OutputFormat) {
    let out = EnvelopeOutput::new(envelope);
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "HANDLER", "STREAM/API", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    out.kind.to_string(),
                    format!("{} (0x{:02x})", out.handler_name, out.handler),
                    detail(&out),
                    out.payload_size.to_string(),
                    out.payload.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "kind={} handler={} (0x{:02x}) {} size={} payload={}",
                out.kind,
                out.handler_name,
                out.handler,
                detail(&out),
                out.payload_size,
                out.payload
            );
        }
        OutputFormat::Raw => print_raw(&envelope.payload),
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Render rows as a table with `header`.
pub fn print_table(header: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

fn detail(out: &EnvelopeOutput) -> String {
    match (out.stream, out.api, out.sample_timestamp) {
        (Some(stream), _, Some(ts)) => format!("stream={stream} ts={ts}"),
        (Some(stream), _, None) => format!("stream={stream}"),
        (None, Some(api), _) => format!("api=0x{api:04x}"),
        _ => "-".to_string(),
    }
}

pub fn hex_preview(payload: &[u8]) -> String {
    let shown = &payload[..payload.len().min(PREVIEW_BYTES)];
    let mut out: String = shown.iter().map(|b| format!("{b:02x}")).collect();
    if payload.len() > PREVIEW_BYTES {
        out.push_str(&format!("..(+{})", payload.len() - PREVIEW_BYTES));
    }
    out
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
