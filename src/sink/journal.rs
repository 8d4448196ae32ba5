//! Append-only JSON Lines sink.
//!
//! Writes one JSON object per approved crossing. Implements both sink traits
//! so a single journal can record traffic in both directions.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::{ApprovedEvidence, ApprovedIntent, InnerSink, OuterSink, SinkError};

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JournalRecord<'a> {
    Evidence {
        written_at: String,
        #[serde(flatten)]
        evidence: &'a ApprovedEvidence,
    },
    Intent {
        written_at: String,
        #[serde(flatten)]
        intent: &'a ApprovedIntent,
    },
}

/// JSON Lines journal over any writer.
pub struct JsonlSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for JsonlSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlSink").finish_non_exhaustive()
    }
}

impl JsonlSink {
    /// Create a journal that appends to the given file path.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the file cannot be opened.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }

    /// Create a journal from an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    fn write_record(&self, record: &JournalRecord<'_>) -> Result<(), SinkError> {
        let line = serde_json::to_string(record)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| SinkError::Unavailable(format!("journal lock poisoned: {e}")))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl InnerSink for JsonlSink {
    async fn write(&self, evidence: &ApprovedEvidence) -> Result<(), SinkError> {
        self.write_record(&JournalRecord::Evidence {
            written_at: Utc::now().to_rfc3339(),
            evidence,
        })
    }
}

#[async_trait]
impl OuterSink for JsonlSink {
    async fn send(&self, intent: &ApprovedIntent) -> Result<(), SinkError> {
        self.write_record(&JournalRecord::Intent {
            written_at: Utc::now().to_rfc3339(),
            intent,
        })
    }
}
