use std::fmt::Write as _;

use chrono::{DateTime, Local};

use crate::error::{Error, Result};
use crate::telemetry::TelemetryRecord;

/// Width of the separator line that closes a text record.
const SEPARATOR_WIDTH: usize = 50;

/// Output format for emitted telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// One compact JSON object per line (machine-readable, also the worker wire format).
    Json,

    /// Indented JSON, one object per block.
    #[default]
    Pretty,

    /// Human-readable `key: value` block with a heading and separator.
    Text,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Pretty => "pretty",
            Format::Text => "text",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "pretty" => Ok(Format::Pretty),
            "text" => Ok(Format::Text),
            other => Err(format!(
                "unknown format '{}' (expected json, pretty or text)",
                other
            )),
        }
    }
}

/// Render a record as one complete output block, including the trailing newline.
///
/// The block is meant to be written to the sink in a single write so that
/// concurrent emitters never interleave inside a record.
pub fn render(record: &TelemetryRecord, format: Format) -> Result<String> {
    let mut out = match format {
        Format::Json => serde_json::to_string(record)?,
        Format::Pretty => serde_json::to_string_pretty(record)?,
        Format::Text => render_text(record)?,
    };
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

fn render_text(record: &TelemetryRecord) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "[{}] {}:", record.source, record.category.title())?;
    for (name, value) in record.metrics.iter() {
        writeln!(out, "  {}: {}", name, value)?;
    }
    writeln!(out, "  Timestamp: {}", format_local_time(record.timestamp))?;
    out.push_str(&"-".repeat(SEPARATOR_WIDTH));
    out.push('\n');
    Ok(out)
}

/// Format epoch milliseconds as local `%Y-%m-%d %H:%M:%S`.
pub fn format_local_time(timestamp_millis: i64) -> String {
    match DateTime::from_timestamp_millis(timestamp_millis) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => timestamp_millis.to_string(),
    }
}

/// Decode one JSON line produced with [`Format::Json`].
pub fn decode_record(line: &str) -> Result<TelemetryRecord> {
    let line = line.trim();
    if line.is_empty() {
        return Err(Error::Config("empty record line".to_string()));
    }
    serde_json::from_str(line).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Category, TelemetryRecord, TelemetrySnapshot, TelemetryValue};

    fn sample_record() -> TelemetryRecord {
        let snapshot = TelemetrySnapshot::new(Category::Environment)
            .with_metric("mars_base_internal_temperature", 21.5)
            .with_metric("mars_base_internal_co2", 0.042);
        TelemetryRecord::stamp("Threaded-Computer", snapshot)
    }

    #[test]
    fn test_json_is_single_line() {
        let out = render(&sample_record(), Format::Json).unwrap();
        assert!(out.ends_with('\n'));
        assert_eq!(out.matches('\n').count(), 1);
        assert!(out.contains("\"source\":\"Threaded-Computer\""));
        assert!(out.contains("\"category\":\"environment\""));
    }

    #[test]
    fn test_json_line_decodes() {
        let record = sample_record();
        let line = render(&record, Format::Json).unwrap();
        let decoded = decode_record(&line).unwrap();

        assert_eq!(decoded, record);
    }

    #[test]
    fn test_pretty_is_indented() {
        let out = render(&sample_record(), Format::Pretty).unwrap();
        assert!(out.lines().count() > 3);
        assert!(out.contains("  \"metrics\": {"));
    }

    #[test]
    fn test_text_block_layout() {
        let out = render(&sample_record(), Format::Text).unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], "[Threaded-Computer] Sensor Data:");
        assert_eq!(lines[1], "  mars_base_internal_temperature: 21.5");
        assert_eq!(lines[2], "  mars_base_internal_co2: 0.042");
        assert!(lines[3].starts_with("  Timestamp: "));
        assert_eq!(lines[4], "-".repeat(50));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_record("").is_err());
        assert!(decode_record("not json").is_err());
        assert!(decode_record("{\"timestamp\": 1}").is_err());
    }

    #[test]
    fn test_decode_keeps_value_types() {
        let line = r#"{"timestamp":5,"source":"p","category":"load","metrics":{"count":3,"pct":12.5,"name":"x","ok":true}}"#;
        let record = decode_record(line).unwrap();

        assert_eq!(record.get("count"), Some(&TelemetryValue::Counter(3)));
        assert_eq!(record.get("pct"), Some(&TelemetryValue::Gauge(12.5)));
        assert_eq!(record.get("name"), Some(&TelemetryValue::Text("x".into())));
        assert_eq!(record.get("ok"), Some(&TelemetryValue::Boolean(true)));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<Format>(), Ok(Format::Json));
        assert_eq!("pretty".parse::<Format>(), Ok(Format::Pretty));
        assert_eq!("text".parse::<Format>(), Ok(Format::Text));
        assert!("cbor".parse::<Format>().is_err());
    }
}
