//! Alert persistence sinks.
//!
//! The durable format is append-only JSON lines, one alert object per line,
//! timestamp-ordered by construction since the manager serializes writes.

use super::Alert;

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("alert sink I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("alert serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination for durable alert records.
///
/// Implementations must not block for unbounded time; a failed write is
/// reported to the caller, which falls back to in-memory retention.
pub trait AlertSink: Send {
    fn write(&mut self, alert: &Alert) -> Result<(), SinkError>;
}

/// Append-only JSON-lines file sink.
pub struct JsonLinesSink {
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Open (creating parent directories and the file as needed) in append
    /// mode.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl AlertSink for JsonLinesSink {
    fn write(&mut self, alert: &Alert) -> Result<(), SinkError> {
        let line = serde_json::to_string(alert)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Discards every alert. Used when durable logging is disabled and in tests.
pub struct NullSink;

impl AlertSink for NullSink {
    fn write(&mut self, _alert: &Alert) -> Result<(), SinkError> {
        Ok(())
    }
}
