use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use vein_peer::Packet;

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

#[derive(Serialize)]
struct PacketOutput<'a> {
    packet_type: &'a str,
    sender_id: String,
    sender_username: &'a str,
    correlation_id: Option<String>,
    is_reply: bool,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_packet(packet: &Packet, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PacketOutput {
                packet_type: &packet.packet_type,
                sender_id: packet.sender_id.to_string(),
                sender_username: &packet.sender_username,
                correlation_id: packet.correlation_id().map(|id| id.to_string()),
                is_reply: packet.is_reply(),
                payload_size: packet.payload.len(),
                payload: payload_preview(packet.payload.as_ref()),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "SENDER", "USER", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    packet.packet_type.clone(),
                    packet.sender_id.to_string(),
                    packet.sender_username.clone(),
                    packet.payload.len().to_string(),
                    payload_preview(packet.payload.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "type={} sender={} user={} size={} payload={}",
                packet.packet_type,
                packet.sender_id,
                display_username(&packet.sender_username),
                packet.payload.len(),
                payload_preview(packet.payload.as_ref())
            );
        }
        OutputFormat::Raw => print_raw(packet.payload.as_ref()),
    }
}

/// Print a flat record: JSON object, two-column table, or `key=value` pairs.
pub fn print_record<T: Serialize>(record: &T, rows: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(record),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in rows {
                table.add_row(vec![key.to_string(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            let line: Vec<String> = rows
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
    let _ = std::io::stdout().flush();
}

fn display_username(username: &str) -> &str {
    if username.is_empty() {
        "-"
    } else {
        username
    }
}

pub fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_marks_binary_payloads() {
        assert_eq!(payload_preview(b"hello"), "hello");
        assert_eq!(payload_preview(&[0xFF, 0xFE, 0x00]), "<binary 3 bytes>");
    }

    #[test]
    fn empty_username_is_dashed() {
        assert_eq!(display_username(""), "-");
        assert_eq!(display_username("alice"), "alice");
    }
}
