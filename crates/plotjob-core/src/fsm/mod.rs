//! The job state machine.
//!
//! `JobFsm::apply` is the only code path that mutates `JobRecord.state`.
//! For a legal transition the sequence is: guard evaluation (arm only),
//! pre-hooks, the side-effecting device action, journal append, row
//! persist, post-hooks. The ordering is fixed as act -> journal -> persist;
//! the crash window between acting and journaling is what the recovery
//! scanner exists to close.
//!
//! Calls racing on the same job serialize on a per-job lock, so exactly
//! one caller succeeds and the others observe the post-transition state.
//! An abort issued while another transition is in flight simply blocks on
//! that lock and applies once the transition resolves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::device::{DeviceArbiter, DeviceError, PlotterDriver};
use crate::error::{DatabaseError, JournalError};
use crate::guards::{
    ArmDecision, CameraStatus, DeviceStatus, GuardContext, GuardManager, PaperSession,
    TransitionAttestation,
};
use crate::hooks::{HookExecutor, HookTrigger};
use crate::job::{JobRecord, JobState, Transition};
use crate::journal::{Journal, JournalRecord};
use crate::storage::Database;

/// Transition-level errors. Variants map onto distinct CLI exit codes.
#[derive(Error, Debug)]
pub enum FsmError {
    /// Rejected before any side effect; nothing is journaled.
    #[error("Illegal transition '{op}' from state '{from}'")]
    IllegalTransition { from: JobState, op: Transition },

    /// One or more required guards failed and were not attested.
    #[error("Arming blocked by guards: {}", blocked.join(", "))]
    GuardBlocked {
        blocked: Vec<String>,
        decision: ArmDecision,
    },

    /// A blocking hook failed; the transition was aborted or rolled back.
    #[error("Blocking hook failed: {hook}")]
    HookBlocked { hook: String },

    /// The single physical device is leased to another job.
    #[error("Device busy: leased to {holder}")]
    DeviceBusy { holder: String },

    /// The device action failed; the job has been moved to FAILED.
    #[error("Action failed: {message}")]
    ActionFailed { message: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Probe results gathered by the caller right before a transition. Kept
/// separate from [`GuardContext`] so the FSM can pair them with the row it
/// loads under the job lock.
#[derive(Debug, Clone)]
pub struct ProbeSnapshot {
    pub device: DeviceStatus,
    pub paper_session: Option<PaperSession>,
    pub camera: CameraStatus,
    pub loaded_pens: Vec<String>,
    pub setup_confirmed: bool,
}

impl Default for ProbeSnapshot {
    fn default() -> Self {
        Self {
            device: DeviceStatus::Unknown,
            paper_session: None,
            camera: CameraStatus::NotInstalled,
            loaded_pens: Vec::new(),
            setup_confirmed: false,
        }
    }
}

impl ProbeSnapshot {
    fn context_for(&self, job: JobRecord) -> GuardContext {
        GuardContext {
            job,
            device: self.device,
            paper_session: self.paper_session.clone(),
            camera: self.camera,
            loaded_pens: self.loaded_pens.clone(),
            setup_confirmed: self.setup_confirmed,
        }
    }
}

/// Everything a caller passes alongside the operation itself.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    /// Who asked: "cli", "operator", "scanner".
    pub actor: String,
    /// Journaled reason; defaults to the operation name.
    pub reason: Option<String>,
    /// Operator overrides for failed overridable guards (arm only).
    pub attestations: Vec<TransitionAttestation>,
    pub probes: ProbeSnapshot,
}

impl Default for TransitionRequest {
    fn default() -> Self {
        Self {
            actor: "cli".to_string(),
            reason: None,
            attestations: Vec::new(),
            probes: ProbeSnapshot::default(),
        }
    }
}

impl TransitionRequest {
    pub fn by(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            ..Self::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// The job state machine. One instance per process; shared across threads.
pub struct JobFsm {
    db: Arc<Database>,
    journal: Arc<Journal>,
    guards: GuardManager,
    hooks: HookExecutor,
    driver: Arc<dyn PlotterDriver>,
    arbiter: DeviceArbiter,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JobFsm {
    pub fn new(
        db: Arc<Database>,
        journal: Arc<Journal>,
        guards: GuardManager,
        hooks: HookExecutor,
        driver: Arc<dyn PlotterDriver>,
    ) -> Self {
        Self {
            db,
            journal,
            guards,
            hooks,
            driver,
            arbiter: DeviceArbiter::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn guards(&self) -> &GuardManager {
        &self.guards
    }

    /// Apply one lifecycle operation to a job.
    ///
    /// Returns the refreshed job row on success. Illegal transitions are
    /// rejected with no side effect and no journal write.
    pub fn apply(
        &self,
        job_id: &str,
        op: Transition,
        request: TransitionRequest,
    ) -> Result<JobRecord, FsmError> {
        let lock = self.job_lock(job_id);
        let _serial = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let job = self.db.require_job(job_id)?;
        let from = job.state;
        let target = op.target();

        if !op.legal_from(from) {
            tracing::debug!(job_id, %from, %op, "rejected illegal transition");
            return Err(FsmError::IllegalTransition { from, op });
        }

        let reason = request
            .reason
            .clone()
            .unwrap_or_else(|| op.as_str().to_string());

        // Guard gate: only arming is guard-gated.
        let mut metadata = serde_json::Value::Null;
        if op == Transition::Arm {
            let ctx = request.probes.context_for(job.clone());
            let decision = self.guards.evaluate_arm(&ctx, &request.attestations);
            for result in &decision.results {
                self.journal.append(
                    job_id,
                    &JournalRecord::guard_result(
                        &request.actor,
                        &result.guard,
                        result.status,
                        &result.message,
                    ),
                )?;
            }
            if !decision.permits_arming() {
                return Err(FsmError::GuardBlocked {
                    blocked: decision.blocking.clone(),
                    decision,
                });
            }
            if !decision.attested.is_empty() {
                metadata = serde_json::json!({ "attestations": decision.attested });
            }
        }

        // Pre-hooks. A blocking failure aborts before the action runs.
        if let Some(trigger) = pre_trigger(op) {
            let batch = self.hooks.run_trigger(trigger, &job);
            if let Some(hook) = batch.blocked_by {
                return Err(FsmError::HookBlocked { hook });
            }
        }

        // Single-device mutual exclusion around PLOTTING. The row store is
        // the cross-process truth; the in-memory arbiter only serializes
        // callers inside this process, so check the persisted rows first.
        if op.enters_plotting() {
            if let Some(holder) = self.db.plotting_job()? {
                if holder != job_id {
                    return Err(FsmError::DeviceBusy { holder });
                }
            }
            self.arbiter.acquire(job_id).map_err(|e| match e {
                DeviceError::Busy(holder) => FsmError::DeviceBusy { holder },
                other => FsmError::ActionFailed {
                    message: other.to_string(),
                },
            })?;
        }

        // The side-effecting action. Act, then journal, then persist.
        if let Err(message) = self.perform_action(op, &job) {
            return Err(self.fail_job(&job, op, &message, &request.actor));
        }

        let record = JournalRecord::state_change_with_metadata(
            &request.actor,
            from,
            target,
            &reason,
            metadata,
        );
        self.journal.append(job_id, &record)?;

        let error_message = if op == Transition::Fail {
            Some(reason.as_str())
        } else {
            None
        };
        // Compare-and-set: another process may have moved the row between
        // our reload and this write. The loser's journal line duplicates
        // the winner's, so replay still agrees with the row.
        if !self
            .db
            .transition_state(job_id, from, target, error_message)?
        {
            if op.enters_plotting() {
                self.arbiter.release(job_id);
            }
            let current = self.db.require_job(job_id)?.state;
            tracing::warn!(job_id, %op, %from, %current, "transition lost a concurrent update");
            return Err(FsmError::IllegalTransition { from: current, op });
        }

        let exited_plotting = from == JobState::Plotting && target != JobState::Plotting;
        if exited_plotting {
            self.arbiter.release(job_id);
        }

        tracing::info!(job_id, %from, to = %target, %op, "transition applied");

        // Post-hooks. A blocking failure rolls the row back so no partial
        // commit is visible.
        if let Some(trigger) = post_trigger(op) {
            let committed = self.db.require_job(job_id)?;
            let batch = self.hooks.run_trigger(trigger, &committed);
            if let Some(hook) = batch.blocked_by {
                self.rollback(job_id, from, target, op, &hook, &request.actor)?;
                return Err(FsmError::HookBlocked { hook });
            }
        }

        Ok(self.db.require_job(job_id)?)
    }

    /// Move a job to FAILED after its action failed. Never retried.
    fn fail_job(&self, job: &JobRecord, op: Transition, message: &str, actor: &str) -> FsmError {
        let job_id = &job.id;
        let reason = format!("{op} failed: {message}");
        tracing::error!(job_id, %op, message, "action failed; job moves to FAILED");

        if job.state == JobState::Plotting || op.enters_plotting() {
            self.arbiter.release(job_id);
        }

        if let Err(e) = self.journal.append(
            job_id,
            &JournalRecord::state_change(actor, job.state, JobState::Failed, &reason),
        ) {
            tracing::error!(job_id, error = %e, "failed to journal action failure");
        }
        match self
            .db
            .transition_state(job_id, job.state, JobState::Failed, Some(message))
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(job_id, "row moved before the failure was persisted"),
            Err(e) => tracing::error!(job_id, error = %e, "failed to persist FAILED state"),
        }
        if let Ok(failed) = self.db.require_job(job_id) {
            // on-error hooks are informational here; a blocking failure
            // cannot roll back a job that already failed.
            let _ = self.hooks.run_trigger(HookTrigger::OnError, &failed);
        }

        FsmError::ActionFailed {
            message: message.to_string(),
        }
    }

    /// Undo a committed transition after a blocking post-hook failure.
    /// The reversal is journaled so the journal/snapshot invariant holds.
    fn rollback(
        &self,
        job_id: &str,
        from: JobState,
        target: JobState,
        op: Transition,
        hook: &str,
        actor: &str,
    ) -> Result<(), FsmError> {
        tracing::warn!(job_id, %op, hook, "rolling back transition after blocking hook failure");
        let metadata = serde_json::json!({ "hook": hook });
        self.journal.append(
            job_id,
            &JournalRecord::state_change_with_metadata(
                actor,
                target,
                from,
                format!("rollback: blocking hook failed during {op}"),
                metadata,
            ),
        )?;
        if !self.db.transition_state(job_id, target, from, None)? {
            tracing::warn!(job_id, "row moved before the rollback was persisted");
        }

        // Restore the device lease to match the restored state.
        if from == JobState::Plotting && target != JobState::Plotting {
            if let Err(e) = self.arbiter.acquire(job_id) {
                tracing::warn!(job_id, error = %e, "could not restore device lease on rollback");
            }
        } else if op.enters_plotting() {
            self.arbiter.release(job_id);
        }
        Ok(())
    }

    /// The physical action for each operation. Abort signals the driver
    /// to stop motion before any bookkeeping happens.
    fn perform_action(&self, op: Transition, job: &JobRecord) -> Result<(), String> {
        match op {
            Transition::Queue | Transition::Optimize | Transition::Ready => Ok(()),
            Transition::Analyze => validate_source(&job.source),
            Transition::Arm => self
                .driver
                .connect()
                .and_then(|_| self.driver.pen_up())
                .map_err(|e| e.to_string()),
            Transition::Start | Transition::Resume => {
                self.driver.begin(job).map_err(|e| e.to_string())
            }
            Transition::Pause | Transition::Complete => {
                self.driver.pen_up().map_err(|e| e.to_string())
            }
            Transition::Abort => {
                if matches!(job.state, JobState::Plotting | JobState::Paused) {
                    self.driver.halt().map_err(|e| e.to_string())
                } else {
                    Ok(())
                }
            }
            Transition::Fail => {
                // Best effort: a failing job should not be wedged by a
                // device that is itself the problem.
                let _ = self.driver.halt();
                Ok(())
            }
        }
    }

    fn job_lock(&self, job_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(job_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn device_holder(&self) -> Option<String> {
        self.arbiter.holder()
    }

    /// Connection state reported by the driver, for probe contexts.
    pub fn device_status(&self) -> DeviceStatus {
        self.driver.status()
    }
}

fn pre_trigger(op: Transition) -> Option<HookTrigger> {
    match op {
        Transition::Arm => Some(HookTrigger::PreArm),
        _ => None,
    }
}

fn post_trigger(op: Transition) -> Option<HookTrigger> {
    match op {
        Transition::Arm => Some(HookTrigger::PostArm),
        Transition::Complete => Some(HookTrigger::PostComplete),
        Transition::Fail => Some(HookTrigger::OnError),
        _ => None,
    }
}

/// File validation for the analyze step. The real parsing lives in the
/// external optimization pipeline; this only rejects obviously unusable
/// artifacts.
fn validate_source(source: &str) -> Result<(), String> {
    match std::fs::metadata(source) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(meta) if meta.is_file() => Err(format!("source artifact is empty: {source}")),
        Ok(_) => Err(format!("source artifact is not a file: {source}")),
        Err(e) => Err(format!("source artifact unreadable: {source}: {e}")),
    }
}
