use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use sdrlink_stream::AsyncEvent;
use sdrlink_vrt::sid::sid_name;
use sdrlink_vrt::Packet;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
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
pub struct PacketOutput {
    pub packet_type: &'static str,
    pub stream_id: u32,
    pub stream_name: &'static str,
    pub packet_count: u8,
    pub sequence: u32,
    pub start_of_burst: bool,
    pub end_of_burst: bool,
    pub integer_time: Option<u32>,
    pub fractional_time: Option<u64>,
    pub trailer: Option<u32>,
    pub payload_words: usize,
    pub body_bytes: usize,
}

impl PacketOutput {
    pub fn from_packet(packet: &Packet<'_>) -> Self {
        let header = &packet.header;
        Self {
            packet_type: header.packet_type.name(),
            stream_id: header.stream_id,
            stream_name: sid_name(header.stream_id),
            packet_count: header.packet_count,
            sequence: packet.sequence,
            start_of_burst: header.start_of_burst,
            end_of_burst: header.end_of_burst,
            integer_time: header.integer_time,
            fractional_time: header.fractional_time,
            trailer: header.trailer,
            payload_words: header.payload_words,
            body_bytes: packet.body.len(),
        }
    }
}

pub fn print_packet(out: &PacketOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            table.add_row(vec!["type".to_string(), out.packet_type.to_string()]);
            table.add_row(vec![
                "stream".to_string(),
                format!("{} ({})", out.stream_id, out.stream_name),
            ]);
            table.add_row(vec!["count".to_string(), out.packet_count.to_string()]);
            table.add_row(vec!["sequence".to_string(), out.sequence.to_string()]);
            table.add_row(vec!["sob".to_string(), out.start_of_burst.to_string()]);
            table.add_row(vec!["eob".to_string(), out.end_of_burst.to_string()]);
            table.add_row(vec!["time".to_string(), time_field(out)]);
            table.add_row(vec![
                "trailer".to_string(),
                out.trailer
                    .map(|t| format!("{t:#010x}"))
                    .unwrap_or_else(|| "-".to_string()),
            ]);
            table.add_row(vec!["payload".to_string(), format!("{} words", out.payload_words)]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} sid={} ({}) count={} seq={} sob={} eob={} time={} body={}B",
                out.packet_type,
                out.stream_id,
                out.stream_name,
                out.packet_count,
                out.sequence,
                out.start_of_burst,
                out.end_of_burst,
                time_field(out),
                out.body_bytes
            );
        }
    }
}

#[derive(Debug, Serialize)]
struct EventOutput {
    channel: usize,
    code: u8,
    flags: Vec<&'static str>,
    letter: Option<String>,
    time: Option<f64>,
}

pub fn print_event(event: &AsyncEvent, format: OutputFormat) {
    let out = EventOutput {
        channel: event.channel,
        code: event.code.bits(),
        flags: event.code.flag_names(),
        letter: event.code.letter().map(String::from),
        time: event.time_spec.map(|t| t.as_secs_f64()),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "CODE", "FLAGS", "TIME"])
                .add_row(vec![
                    out.channel.to_string(),
                    format!("{:#04x}", out.code),
                    out.flags.join("|"),
                    event
                        .time_spec
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} code={:#04x} flags={} time={}",
                out.channel,
                out.code,
                out.flags.join("|"),
                event
                    .time_spec
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn time_field(out: &PacketOutput) -> String {
    match (out.integer_time, out.fractional_time) {
        (Some(secs), Some(ticks)) => format!("{secs}s+{ticks}"),
        (Some(secs), None) => format!("{secs}s"),
        (None, Some(ticks)) => format!("+{ticks}"),
        (None, None) => "-".to_string(),
    }
}
