//! Telemetry emitters.

use std::io::Write;
use std::sync::Mutex;

use mission_common::{Format, TelemetryRecord, TelemetrySnapshot, render};

use crate::error::EmitError;

/// Renders telemetry to an observable sink.
///
/// Implementations must make each record appear as one uninterrupted block,
/// even when many tasks emit concurrently.
pub trait Emitter: Send + Sync + 'static {
    /// Write an already stamped record.
    fn emit_record(&self, record: &TelemetryRecord) -> Result<(), EmitError>;

    /// Stamp a snapshot with `identity` and the current time, then write it.
    fn emit(&self, identity: &str, snapshot: TelemetrySnapshot) -> Result<(), EmitError> {
        self.emit_record(&TelemetryRecord::stamp(identity, snapshot))
    }
}

/// Emitter writing rendered records to any byte stream.
///
/// The sink sits behind a mutex; a record is rendered before the lock is
/// taken and written with a single `write_all`.
#[derive(Debug)]
pub struct StreamEmitter<W> {
    sink: Mutex<W>,
    format: Format,
}

impl<W: Write + Send + 'static> StreamEmitter<W> {
    /// Create an emitter over a writer.
    pub fn new(sink: W, format: Format) -> Self {
        Self {
            sink: Mutex::new(sink),
            format,
        }
    }

    /// Get the output format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Consume the emitter and return the sink.
    pub fn into_inner(self) -> W {
        match self.sink.into_inner() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl StreamEmitter<std::io::Stdout> {
    /// Create an emitter writing to standard output.
    pub fn stdout(format: Format) -> Self {
        Self::new(std::io::stdout(), format)
    }
}

impl<W: Write + Send + 'static> Emitter for StreamEmitter<W> {
    fn emit_record(&self, record: &TelemetryRecord) -> Result<(), EmitError> {
        let block = render(record, self.format)?;

        let mut sink = self.sink.lock().map_err(|_| EmitError::Poisoned)?;
        sink.write_all(block.as_bytes())?;
        sink.flush()?;

        Ok(())
    }
}

/// Emitter that keeps every record in memory.
///
/// Useful for embedding the scheduler and for tests.
#[derive(Debug, Default)]
pub struct MemoryEmitter {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl MemoryEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record emitted so far, in emission order.
    pub fn records(&self) -> Vec<TelemetryRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Records emitted under one identity.
    pub fn records_from(&self, identity: &str) -> Vec<TelemetryRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.source == identity)
            .collect()
    }

    /// Number of records emitted so far.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Emitter for MemoryEmitter {
    fn emit_record(&self, record: &TelemetryRecord) -> Result<(), EmitError> {
        self.records
            .lock()
            .map_err(|_| EmitError::Poisoned)?
            .push(record.clone());
        Ok(())
    }
}
