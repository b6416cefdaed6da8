//! Emergency shutdown capture.
//!
//! On SIGINT/SIGTERM the process gets one chance to leave a breadcrumb:
//! a best-effort `emergency_shutdown` journal entry for every job that is
//! currently ARMED or PLOTTING, so the next startup's recovery scan can
//! tell a signal death from a silent crash. Nothing here transitions jobs;
//! dispositions are an operator decision at the next startup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::job::JobState;
use crate::journal::{Journal, JournalRecord};
use crate::storage::Database;

/// Cooperative shutdown flag checked at loop checkpoints.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Writes the emergency breadcrumbs when a shutdown signal arrives.
pub struct EmergencyCapture {
    db: Arc<Database>,
    journal: Arc<Journal>,
}

impl EmergencyCapture {
    pub fn new(db: Arc<Database>, journal: Arc<Journal>) -> Self {
        Self { db, journal }
    }

    /// Journal an `emergency_shutdown` entry for every ARMED or PLOTTING
    /// job. Best-effort: a failed append is logged and skipped, because
    /// the process is going down either way. Returns the number of jobs
    /// captured.
    pub fn capture(&self, reason: &str) -> usize {
        let jobs = match self.db.list_active() {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "emergency capture could not list jobs");
                return 0;
            }
        };

        let mut captured = 0;
        for job in jobs {
            if !matches!(job.state, JobState::Armed | JobState::Plotting) {
                continue;
            }
            let record = JournalRecord::emergency_shutdown("signal", job.state, reason);
            match self.journal.append(&job.id, &record) {
                Ok(()) => {
                    tracing::warn!(job_id = %job.id, state = %job.state, reason, "emergency shutdown journaled");
                    captured += 1;
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "emergency journal append failed");
                }
            }
        }
        captured
    }
}
