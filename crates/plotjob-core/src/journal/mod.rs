//! Per-job append-only journal.
//!
//! One JSONL file per job id under `<data>/journal/`. Each line is a
//! self-describing record with a `type` discriminator. The journal is the
//! authoritative event log; the job row in SQLite is a derived view of it.
//! Only the process driving a job writes its journal -- readers (the
//! recovery scanner, monitoring) never write.
//!
//! Files are strictly append-only. The one exception is [`Journal::repair`],
//! an explicit operation that rewrites a file to drop undecodable lines and
//! logs everything it drops.

pub mod entry;

pub use entry::{JournalKind, JournalRecord};

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, JournalError};
use crate::job::JobState;
use crate::storage::data_dir;

/// Handle to the journal directory.
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    /// Open the journal at `<data_dir>/journal/`.
    pub fn open_default() -> Result<Self, CoreError> {
        let dir = data_dir()?.join("journal");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Open a journal rooted at an explicit directory (tests, tooling).
    pub fn open_at(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The journal file for a job id.
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.jsonl"))
    }

    /// Append a record. The line is flushed and fsynced before returning,
    /// so an entry that append() acknowledged survives a crash.
    pub fn append(&self, job_id: &str, record: &JournalRecord) -> Result<(), JournalError> {
        let path = self.path_for(job_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| JournalError::OpenFailed {
                job_id: job_id.to_string(),
                source: e,
            })?;

        let line = serde_json::to_string(record).map_err(|e| JournalError::AppendFailed {
            job_id: job_id.to_string(),
            message: e.to_string(),
        })?;
        writeln!(file, "{line}").map_err(|e| JournalError::AppendFailed {
            job_id: job_id.to_string(),
            message: e.to_string(),
        })?;
        file.flush().map_err(|e| JournalError::AppendFailed {
            job_id: job_id.to_string(),
            message: e.to_string(),
        })?;
        file.sync_all().map_err(|e| JournalError::AppendFailed {
            job_id: job_id.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Read all records for a job, in append order. A missing file is an
    /// empty journal. A line that fails to decode is an error; use
    /// [`Journal::read_lossy`] or [`Journal::repair`] to get past one.
    pub fn read(&self, job_id: &str) -> Result<Vec<JournalRecord>, JournalError> {
        let path = self.path_for(job_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path).map_err(|e| JournalError::OpenFailed {
            job_id: job_id.to_string(),
            source: e,
        })?;
        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| JournalError::AppendFailed {
                job_id: job_id.to_string(),
                message: e.to_string(),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord =
                serde_json::from_str(&line).map_err(|_| JournalError::CorruptLine {
                    job_id: job_id.to_string(),
                    line: idx + 1,
                })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Read all decodable records, returning the count of lines skipped.
    /// Used by readers that must make progress over a torn tail write.
    pub fn read_lossy(&self, job_id: &str) -> Result<(Vec<JournalRecord>, usize), JournalError> {
        let path = self.path_for(job_id);
        if !path.exists() {
            return Ok((Vec::new(), 0));
        }
        let file = File::open(&path).map_err(|e| JournalError::OpenFailed {
            job_id: job_id.to_string(),
            source: e,
        })?;
        let mut records = Vec::new();
        let mut skipped = 0;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| JournalError::AppendFailed {
                job_id: job_id.to_string(),
                message: e.to_string(),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(&line) {
                Ok(record) => records.push(record),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(job_id, skipped, "journal contains undecodable lines");
        }
        Ok((records, skipped))
    }

    /// The most recent record, if any.
    pub fn last(&self, job_id: &str) -> Result<Option<JournalRecord>, JournalError> {
        let (mut records, _) = self.read_lossy(job_id)?;
        Ok(records.pop())
    }

    /// Fold the journal down to the state it implies: the `to` of the most
    /// recent state_change. `None` if no state change was ever recorded.
    pub fn replay_state(&self, job_id: &str) -> Result<Option<JobState>, JournalError> {
        let (records, _) = self.read_lossy(job_id)?;
        Ok(replay(&records))
    }

    /// Rewrite a journal file keeping only decodable lines. Returns the
    /// number of lines dropped. This is the only operation that rewrites
    /// a journal, and every drop is logged.
    pub fn repair(&self, job_id: &str) -> Result<usize, JournalError> {
        let path = self.path_for(job_id);
        if !path.exists() {
            return Ok(0);
        }
        let (records, skipped) = self.read_lossy(job_id)?;
        if skipped == 0 {
            return Ok(0);
        }
        tracing::warn!(job_id, dropped = skipped, "repairing journal");

        let tmp = path.with_extension("jsonl.repair");
        {
            let mut file = File::create(&tmp).map_err(|e| JournalError::RepairFailed {
                job_id: job_id.to_string(),
                message: e.to_string(),
            })?;
            for record in &records {
                let line =
                    serde_json::to_string(record).map_err(|e| JournalError::RepairFailed {
                        job_id: job_id.to_string(),
                        message: e.to_string(),
                    })?;
                writeln!(file, "{line}").map_err(|e| JournalError::RepairFailed {
                    job_id: job_id.to_string(),
                    message: e.to_string(),
                })?;
            }
            file.sync_all().map_err(|e| JournalError::RepairFailed {
                job_id: job_id.to_string(),
                message: e.to_string(),
            })?;
        }
        std::fs::rename(&tmp, &path).map_err(|e| JournalError::RepairFailed {
            job_id: job_id.to_string(),
            message: e.to_string(),
        })?;
        Ok(skipped)
    }

    /// Job ids that have a journal file.
    pub fn job_ids(&self) -> Result<Vec<String>, JournalError> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.dir).map_err(|e| JournalError::OpenFailed {
            job_id: "<dir>".to_string(),
            source: e,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Replay a record sequence to the implied job state.
pub fn replay(records: &[JournalRecord]) -> Option<JobState> {
    records.iter().rev().find_map(|r| match &r.kind {
        JournalKind::StateChange { to, .. } => Some(*to),
        _ => None,
    })
}
