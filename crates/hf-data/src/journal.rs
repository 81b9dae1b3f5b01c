//! Append-only JSON-lines ledger.
//!
//! Each upsert appends one line and syncs it. Rewrites of the same key
//! simply append again; readers keep the entry with the latest timestamp.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use hf_types::{DataError, HfResult, LedgerRow};
use tracing::{debug, warn};

use crate::ledger::LedgerStore;

#[derive(Debug, Clone)]
pub struct JournalStore {
    path: PathBuf,
}

impl JournalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn truncate(&self, len: u64) -> HfResult<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        file.sync_data()?;
        Ok(())
    }
}

impl LedgerStore for JournalStore {
    fn load(&mut self) -> HfResult<Vec<LedgerRow>> {
        if !self.path.exists() {
            debug!("No journal at {}, starting empty", self.path.display());
            return Ok(Vec::new());
        }

        let bytes = fs::read(&self.path)?;
        let mut lines = Vec::new();
        let mut offset = 0;
        for (line_num, line) in bytes.split_inclusive(|&b| b == b'\n').enumerate() {
            if !line.trim_ascii().is_empty() {
                lines.push((line_num + 1, offset, line));
            }
            offset += line.len();
        }

        let mut rows: Vec<LedgerRow> = Vec::with_capacity(lines.len());
        let last = lines.len().saturating_sub(1);
        for (i, &(line_num, start, line)) in lines.iter().enumerate() {
            match serde_json::from_slice(line) {
                Ok(row) => rows.push(row),
                // Only an interrupted append can leave the tail half written.
                Err(e) if i == last => {
                    warn!(
                        "Dropping torn entry at {} line {}: {}",
                        self.path.display(),
                        line_num,
                        e
                    );
                    self.truncate(start as u64)?;
                    return Ok(rows);
                }
                Err(e) => {
                    return Err(DataError::InvalidFormat {
                        message: format!("{} line {}: {}", self.path.display(), line_num, e),
                    }
                    .into());
                }
            }
        }

        if bytes.last().is_some_and(|&b| b != b'\n') {
            let mut file = OpenOptions::new().append(true).open(&self.path)?;
            file.write_all(b"\n")?;
            file.sync_data()?;
        }
        Ok(rows)
    }

    fn persist(&mut self, row: &LedgerRow, _rows: &[LedgerRow]) -> HfResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(row)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
