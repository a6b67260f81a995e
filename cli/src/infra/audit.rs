//! Audit sinks: implements the `AuditSink` port.
//!
//! `JsonLinesAuditLog` appends one JSON object per line to a file opened in
//! append mode. `MemoryAuditLog` keeps records in memory for tests and
//! one-shot commands.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tether_common::AuditRecord;

use crate::application::ports::AuditSink;

/// Append-only JSON Lines audit log.
pub struct JsonLinesAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesAuditLog {
    /// Open (or create) the log at `path`, creating its parent directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open audit log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonLinesAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("cannot serialize audit record")?;
        line.push(b'\n');
        // One write per record so concurrent appends never interleave.
        self.file
            .lock()
            .write_all(&line)
            .with_context(|| format!("cannot append to {}", self.path.display()))
    }
}

/// In-memory audit sink.
#[derive(Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
