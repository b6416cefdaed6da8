//! plotjob-core: lifecycle management for pen-plotter jobs.
//!
//! A submitted drawing moves through a fixed state machine
//! (NEW -> QUEUED -> ANALYZED -> OPTIMIZED -> READY -> ARMED -> PLOTTING
//! -> COMPLETED, with PAUSED, ABORTED and FAILED branches). Every applied
//! transition is appended to a per-job JSONL journal before the SQLite
//! row is updated, so the journal is always the authority and the row is
//! a rebuildable view.
//!
//! The main pieces:
//! - [`job`]: states, the transition table and the persisted job row
//! - [`fsm`]: the only mutator of job state; guards, hooks, device lease
//! - [`journal`]: crash-safe append-only event log, one file per job
//! - [`guards`]: physical-safety checks gating the arm transition
//! - [`hooks`]: configured external commands bound to transition points
//! - [`recovery`]: startup scan, interrupted-job dispositions, restart
//! - [`shutdown`]: emergency breadcrumbs on SIGINT/SIGTERM

pub mod config;
pub mod device;
pub mod error;
pub mod fsm;
pub mod guards;
pub mod hooks;
pub mod job;
pub mod journal;
pub mod recovery;
pub mod shutdown;
pub mod storage;

pub use config::{DeviceConfig, GuardsConfig, PlotConfig};
pub use device::{DeviceArbiter, DeviceError, MockDriver, NullDriver, PlotterDriver};
pub use error::{ConfigError, CoreError, DatabaseError, JournalError, Result};
pub use fsm::{FsmError, JobFsm, ProbeSnapshot, TransitionRequest};
pub use guards::{
    ArmDecision, CameraStatus, DeviceStatus, Guard, GuardConfig, GuardContext, GuardManager,
    GuardResult, GuardStatus, PaperSession, TransitionAttestation,
};
pub use hooks::{HookConfig, HookExecutor, HookOutcome, HookTrigger};
pub use job::{JobRecord, JobState, PlanMeta, Transition};
pub use journal::{Journal, JournalKind, JournalRecord};
pub use recovery::{CrashRecoveryScanner, Disposition, RecoveryError, ScanFinding, ScanReport};
pub use shutdown::{EmergencyCapture, ShutdownSignal};
pub use storage::{data_dir, Database};
