use hifc_transport::{CommandFormat, HeaderLayout};
use serde::Serialize;

use crate::cmd::ClassifyArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Debug, Serialize)]
struct OpcodeRow {
    opcode: u8,
    format: String,
    layout: Option<String>,
    header_len: Option<usize>,
    supported: bool,
}

impl OpcodeRow {
    fn new(opcode: u8) -> Self {
        let format = CommandFormat::classify(opcode);
        let layout = format.layout();
        Self {
            opcode,
            format: format!("{format:?}"),
            layout: layout.map(|l| format!("{l:?}")),
            header_len: layout.map(HeaderLayout::len),
            supported: format.is_supported(),
        }
    }
}

pub fn run(args: ClassifyArgs, format: OutputFormat) -> CliResult<i32> {
    let opcodes: Vec<u8> = if args.opcodes.is_empty() {
        (0..=u8::MAX).collect()
    } else {
        args.opcodes
    };
    let rows: Vec<OpcodeRow> = opcodes
        .into_iter()
        .map(OpcodeRow::new)
        .filter(|row| row.supported || !args.supported_only)
        .collect();

    match format {
        OutputFormat::Json => {
            for row in &rows {
                print_json(row);
            }
        }
        OutputFormat::Table => print_table(
            &["OPCODE", "FORMAT", "LAYOUT", "HEADER"],
            rows.iter()
                .map(|row| {
                    vec![
                        format!("0x{:02x}", row.opcode),
                        row.format.clone(),
                        row.layout.clone().unwrap_or_else(|| "-".to_string()),
                        row.header_len
                            .map_or_else(|| "-".to_string(), |len| len.to_string()),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            for row in &rows {
                println!(
                    "0x{:02x} {} {}",
                    row.opcode,
                    row.format,
                    row.layout.as_deref().unwrap_or("-")
                );
            }
        }
    }

    Ok(SUCCESS)
}
