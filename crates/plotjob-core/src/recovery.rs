//! Startup crash recovery.
//!
//! The scanner runs before any transition is accepted. It reconciles every
//! non-terminal job row against that job's journal (the journal wins) and
//! flags jobs that were interrupted mid-plot. Interrupted jobs are never
//! resumed automatically; an operator picks a [`Disposition`] for each.

use std::sync::Arc;
use thiserror::Error;

use crate::error::{DatabaseError, JournalError};
use crate::job::{JobRecord, JobState};
use crate::journal::{replay, Journal, JournalKind, JournalRecord};
use crate::storage::Database;

#[derive(Error, Debug)]
pub enum RecoveryError {
    /// Dispositions only apply to jobs interrupted in ARMED or PLOTTING.
    #[error("Job {job_id} is in state '{state}', not interrupted")]
    NotInterrupted { job_id: String, state: JobState },

    /// Restart only applies to FAILED or ABORTED jobs.
    #[error("Job {job_id} is in state '{state}'; only failed or aborted jobs can be restarted")]
    RestartNotAllowed { job_id: String, state: JobState },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// What the scanner found for one job.
#[derive(Debug, Clone)]
pub struct ScanFinding {
    pub job: JobRecord,
    /// State implied by journal replay, if any state change was recorded.
    pub journal_state: Option<JobState>,
    /// The row lagged the journal and was rewritten from it.
    pub snapshot_repaired: bool,
    /// Undecodable journal lines skipped while reading.
    pub corrupt_lines: usize,
    /// Interrupted mid-plot; awaiting an operator disposition.
    pub interrupted: bool,
    /// Reason from a trailing emergency_shutdown entry, if present.
    pub emergency: Option<String>,
}

/// Result of a full startup scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub findings: Vec<ScanFinding>,
}

impl ScanReport {
    pub fn interrupted(&self) -> impl Iterator<Item = &ScanFinding> {
        self.findings.iter().filter(|f| f.interrupted)
    }

    pub fn repaired(&self) -> impl Iterator<Item = &ScanFinding> {
        self.findings.iter().filter(|f| f.snapshot_repaired)
    }
}

/// Operator's choice for one interrupted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// PLOTTING becomes PAUSED, ARMED becomes READY. The operator decides
    /// when (and whether) to actually resume.
    ResumeInPlace,
    /// Back to QUEUED ahead of everything else waiting.
    RequeueFront,
    /// Back to QUEUED at the end of the line.
    RequeueEnd,
    Abort,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::ResumeInPlace => "resume-in-place",
            Disposition::RequeueFront => "requeue-front",
            Disposition::RequeueEnd => "requeue-end",
            Disposition::Abort => "abort",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "resume-in-place" => Disposition::ResumeInPlace,
            "requeue-front" => Disposition::RequeueFront,
            "requeue-end" => Disposition::RequeueEnd,
            "abort" => Disposition::Abort,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciles job rows with journals after a process death.
pub struct CrashRecoveryScanner {
    db: Arc<Database>,
    journal: Arc<Journal>,
}

impl CrashRecoveryScanner {
    pub fn new(db: Arc<Database>, journal: Arc<Journal>) -> Self {
        Self { db, journal }
    }

    /// Scan every non-terminal job. Rows that lag their journal are
    /// rewritten from it (the journal is authoritative); jobs that died in
    /// ARMED or PLOTTING are flagged interrupted.
    pub fn scan(&self) -> Result<ScanReport, RecoveryError> {
        let mut report = ScanReport::default();

        for mut job in self.db.list_active()? {
            let (records, corrupt_lines) = self.journal.read_lossy(&job.id)?;
            let journal_state = replay(&records);

            let mut snapshot_repaired = false;
            if let Some(actual) = journal_state {
                if actual != job.state {
                    tracing::warn!(
                        job_id = %job.id,
                        row = %job.state,
                        journal = %actual,
                        "row lags journal; repairing snapshot"
                    );
                    // A journaled failure carries its reason; keep it on
                    // the repaired row.
                    let error = if actual == JobState::Failed {
                        last_change_reason(&records)
                    } else {
                        None
                    };
                    self.db.update_state(&job.id, actual, error.as_deref())?;
                    job.state = actual;
                    job.error_message = error;
                    snapshot_repaired = true;
                }
            }

            let emergency = records.last().and_then(|r| match &r.kind {
                JournalKind::EmergencyShutdown { reason, .. } => Some(reason.clone()),
                _ => None,
            });
            let interrupted = emergency.is_some()
                || matches!(job.state, JobState::Armed | JobState::Plotting);

            if interrupted {
                tracing::warn!(job_id = %job.id, state = %job.state, "interrupted job awaits disposition");
            }

            report.findings.push(ScanFinding {
                job,
                journal_state,
                snapshot_repaired,
                corrupt_lines,
                interrupted,
                emergency,
            });
        }

        Ok(report)
    }

    /// Apply an operator's disposition to an interrupted job.
    pub fn dispose(
        &self,
        job_id: &str,
        disposition: Disposition,
    ) -> Result<JobRecord, RecoveryError> {
        let job = self.db.require_job(job_id)?;

        let last_is_emergency = matches!(
            self.journal.last(job_id)?,
            Some(JournalRecord {
                kind: JournalKind::EmergencyShutdown { .. },
                ..
            })
        );
        let interrupted = last_is_emergency
            || matches!(job.state, JobState::Armed | JobState::Plotting);
        if !interrupted {
            return Err(RecoveryError::NotInterrupted {
                job_id: job_id.to_string(),
                state: job.state,
            });
        }

        let target = match disposition {
            Disposition::ResumeInPlace => match job.state {
                JobState::Plotting => JobState::Paused,
                JobState::Armed => JobState::Ready,
                other => other,
            },
            Disposition::RequeueFront | Disposition::RequeueEnd => JobState::Queued,
            Disposition::Abort => JobState::Aborted,
        };

        let metadata = serde_json::json!({ "disposition": disposition.as_str() });
        self.journal.append(
            job_id,
            &JournalRecord::state_change_with_metadata(
                "operator",
                job.state,
                target,
                "recovery",
                metadata,
            ),
        )?;
        self.db.update_state(job_id, target, None)?;

        match disposition {
            Disposition::RequeueFront => {
                let front = self.db.max_priority()? + 1;
                self.db.update_priority(job_id, front)?;
            }
            Disposition::RequeueEnd => {
                self.db.update_priority(job_id, 0)?;
            }
            _ => {}
        }

        tracing::info!(job_id, %disposition, to = %target, "disposition applied");
        Ok(self.db.require_job(job_id)?)
    }

    /// Send a FAILED or ABORTED job back to the queue. Clears the recorded
    /// error; the journal keeps the full history.
    pub fn restart(&self, job_id: &str) -> Result<JobRecord, RecoveryError> {
        let job = self.db.require_job(job_id)?;
        if !matches!(job.state, JobState::Failed | JobState::Aborted) {
            return Err(RecoveryError::RestartNotAllowed {
                job_id: job_id.to_string(),
                state: job.state,
            });
        }

        self.journal.append(
            job_id,
            &JournalRecord::state_change("operator", job.state, JobState::Queued, "restart"),
        )?;
        self.db.update_state(job_id, JobState::Queued, None)?;
        tracing::info!(job_id, from = %job.state, "job restarted");
        Ok(self.db.require_job(job_id)?)
    }
}

/// Reason of the most recent state change, if any.
fn last_change_reason(records: &[JournalRecord]) -> Option<String> {
    records.iter().rev().find_map(|r| match &r.kind {
        JournalKind::StateChange { reason, .. } => Some(reason.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rig {
        scanner: CrashRecoveryScanner,
        db: Arc<Database>,
        journal: Arc<Journal>,
        _dir: tempfile::TempDir,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_memory().unwrap());
        let journal = Arc::new(Journal::open_at(dir.path().join("journal")).unwrap());
        let scanner = CrashRecoveryScanner::new(Arc::clone(&db), Arc::clone(&journal));
        Rig {
            scanner,
            db,
            journal,
            _dir: dir,
        }
    }

    fn seed(rig: &Rig, state: JobState) -> JobRecord {
        let job = JobRecord::new("t", "/tmp/t.svg");
        rig.db.insert_job(&job).unwrap();
        if state != JobState::New {
            rig.db.update_state(&job.id, state, None).unwrap();
        }
        rig.db.require_job(&job.id).unwrap()
    }

    #[test]
    fn clean_jobs_pass_the_scan() {
        let rig = rig();
        let job = seed(&rig, JobState::Queued);
        rig.journal
            .append(
                &job.id,
                &JournalRecord::state_change("cli", JobState::New, JobState::Queued, "queue"),
            )
            .unwrap();

        let report = rig.scanner.scan().unwrap();
        assert_eq!(report.findings.len(), 1);
        let finding = &report.findings[0];
        assert!(!finding.snapshot_repaired);
        assert!(!finding.interrupted);
    }

    #[test]
    fn row_lagging_journal_is_repaired() {
        // Crash window: journal says ARMED but the row still says READY.
        let rig = rig();
        let job = seed(&rig, JobState::Ready);
        rig.journal
            .append(
                &job.id,
                &JournalRecord::state_change("cli", JobState::Ready, JobState::Armed, "arm"),
            )
            .unwrap();

        let report = rig.scanner.scan().unwrap();
        let finding = &report.findings[0];
        assert!(finding.snapshot_repaired);
        assert_eq!(finding.job.state, JobState::Armed);
        // ARMED after repair means interrupted.
        assert!(finding.interrupted);
        assert_eq!(rig.db.require_job(&job.id).unwrap().state, JobState::Armed);
    }

    #[test]
    fn repaired_failure_keeps_journaled_reason() {
        // Crash between journaling the fail and persisting the row.
        let rig = rig();
        let job = seed(&rig, JobState::Plotting);
        rig.journal
            .append(
                &job.id,
                &JournalRecord::state_change(
                    "cli",
                    JobState::Plotting,
                    JobState::Failed,
                    "servo fault",
                ),
            )
            .unwrap();

        let report = rig.scanner.scan().unwrap();
        let finding = &report.findings[0];
        assert!(finding.snapshot_repaired);
        assert_eq!(finding.job.state, JobState::Failed);
        assert_eq!(finding.job.error_message.as_deref(), Some("servo fault"));

        let row = rig.db.require_job(&job.id).unwrap();
        assert_eq!(row.state, JobState::Failed);
        assert_eq!(row.error_message.as_deref(), Some("servo fault"));
    }

    #[test]
    fn emergency_shutdown_marks_interrupted() {
        let rig = rig();
        let job = seed(&rig, JobState::Plotting);
        rig.journal
            .append(
                &job.id,
                &JournalRecord::state_change("cli", JobState::Armed, JobState::Plotting, "start"),
            )
            .unwrap();
        rig.journal
            .append(
                &job.id,
                &JournalRecord::emergency_shutdown("signal", JobState::Plotting, "SIGINT"),
            )
            .unwrap();

        let report = rig.scanner.scan().unwrap();
        let finding = &report.findings[0];
        assert!(finding.interrupted);
        assert_eq!(finding.emergency.as_deref(), Some("SIGINT"));
    }

    #[test]
    fn resume_in_place_parks_not_resumes() {
        let rig = rig();
        let plotting = seed(&rig, JobState::Plotting);
        let armed = seed(&rig, JobState::Armed);

        let parked = rig
            .scanner
            .dispose(&plotting.id, Disposition::ResumeInPlace)
            .unwrap();
        assert_eq!(parked.state, JobState::Paused);

        let staged = rig
            .scanner
            .dispose(&armed.id, Disposition::ResumeInPlace)
            .unwrap();
        assert_eq!(staged.state, JobState::Ready);
    }

    #[test]
    fn requeue_front_jumps_the_queue() {
        let rig = rig();
        let waiting = seed(&rig, JobState::Queued);
        rig.db.update_priority(&waiting.id, 5).unwrap();
        let interrupted = seed(&rig, JobState::Plotting);

        let requeued = rig
            .scanner
            .dispose(&interrupted.id, Disposition::RequeueFront)
            .unwrap();
        assert_eq!(requeued.state, JobState::Queued);
        assert!(requeued.priority > 5);
        // It now sorts first among active jobs.
        assert_eq!(rig.db.list_active().unwrap()[0].id, interrupted.id);
    }

    #[test]
    fn requeue_end_goes_to_the_back() {
        let rig = rig();
        let interrupted = seed(&rig, JobState::Plotting);
        let requeued = rig
            .scanner
            .dispose(&interrupted.id, Disposition::RequeueEnd)
            .unwrap();
        assert_eq!(requeued.state, JobState::Queued);
        assert_eq!(requeued.priority, 0);
    }

    #[test]
    fn abort_disposition_terminates() {
        let rig = rig();
        let interrupted = seed(&rig, JobState::Plotting);
        let aborted = rig
            .scanner
            .dispose(&interrupted.id, Disposition::Abort)
            .unwrap();
        assert_eq!(aborted.state, JobState::Aborted);
        // The disposition is journaled.
        assert_eq!(
            rig.journal.replay_state(&interrupted.id).unwrap(),
            Some(JobState::Aborted)
        );
    }

    #[test]
    fn dispose_rejects_uninterrupted_jobs() {
        let rig = rig();
        let queued = seed(&rig, JobState::Queued);
        let err = rig
            .scanner
            .dispose(&queued.id, Disposition::Abort)
            .unwrap_err();
        assert!(matches!(err, RecoveryError::NotInterrupted { .. }));
    }

    #[test]
    fn restart_only_from_terminal_failures() {
        let rig = rig();
        let failed = seed(&rig, JobState::Failed);
        let restarted = rig.scanner.restart(&failed.id).unwrap();
        assert_eq!(restarted.state, JobState::Queued);
        assert!(restarted.error_message.is_none());

        let completed = seed(&rig, JobState::Completed);
        assert!(matches!(
            rig.scanner.restart(&completed.id),
            Err(RecoveryError::RestartNotAllowed { .. })
        ));
    }

    #[test]
    fn disposition_names_roundtrip() {
        for d in [
            Disposition::ResumeInPlace,
            Disposition::RequeueFront,
            Disposition::RequeueEnd,
            Disposition::Abort,
        ] {
            assert_eq!(Disposition::parse(d.as_str()), Some(d));
        }
        assert_eq!(Disposition::parse("retry"), None);
    }
}
