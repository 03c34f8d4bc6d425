use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use motelink_device::EventBatch;
use serde::Serialize;
use serde_json::Value;

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

/// Print a flat record. `Raw` prints only the values, one per line.
pub fn print_record<T: Serialize>(record: &T, format: OutputFormat) {
    let value = serde_json::to_value(record).unwrap_or(Value::Null);
    match format {
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, field) in fields(&value) {
                table.add_row(vec![key, field]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line = fields(&value)
                .into_iter()
                .map(|(key, field)| format!("{key}={field}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("{line}");
        }
        OutputFormat::Raw => {
            for (_, field) in fields(&value) {
                println!("{field}");
            }
        }
    }
}

pub fn print_batch(batch: &EventBatch, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(batch).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TIME", "EVENT", "DATA"]);
            let time = format!("{:.3}", batch_seconds(batch));
            for (kind, data) in batch_rows(batch) {
                table.add_row(vec![time.clone(), kind, data]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let time = batch_seconds(batch);
            for (kind, data) in batch_rows(batch) {
                println!("[{time:.3}] {kind} {data}");
            }
        }
        OutputFormat::Raw => {
            for event in &batch.events {
                println!(
                    "{}",
                    serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn hex(data: &[u8]) -> String {
    data.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn fields(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, field)| (key.clone(), scalar(field)))
            .collect(),
        other => vec![("value".to_string(), scalar(other))],
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn batch_seconds(batch: &EventBatch) -> f64 {
    batch
        .timestamp
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// One `(type, fields)` pair per event, with the tag split out of the JSON.
fn batch_rows(batch: &EventBatch) -> Vec<(String, String)> {
    batch
        .events
        .iter()
        .map(|event| {
            let mut value = serde_json::to_value(event).unwrap_or(Value::Null);
            let kind = value
                .as_object_mut()
                .and_then(|map| map.remove("type"))
                .map(|tag| scalar(&tag))
                .unwrap_or_default();
            (kind, value.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use motelink_device::Event;
    use motelink_frame::Buttons;

    #[test]
    fn hex_is_lowercase_and_unseparated() {
        assert_eq!(hex(&[0x00, 0xAB, 0x10]), "00ab10");
        assert_eq!(hex(&[]), "");
    }

    #[test]
    fn rows_split_event_tag() {
        let batch = EventBatch::new(vec![Event::Buttons {
            buttons: Buttons::A,
        }]);
        let rows = batch_rows(&batch);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "buttons");
        assert!(!rows[0].1.contains("\"type\""));
    }

    #[test]
    fn record_fields_flatten_strings() {
        #[derive(Serialize)]
        struct Out {
            name: &'static str,
            count: u8,
        }
        let value = serde_json::to_value(Out {
            name: "nunchuk",
            count: 2,
        })
        .unwrap();
        assert_eq!(
            fields(&value),
            vec![
                ("count".to_string(), "2".to_string()),
                ("name".to_string(), "nunchuk".to_string())
            ]
        );
    }
}
