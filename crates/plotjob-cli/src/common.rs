//! Shared plumbing for the command modules: core assembly and the mapping
//! from core errors to process exit codes.

use std::sync::Arc;

use plotjob_core::{
    Database, FsmError, GuardManager, HookExecutor, JobFsm, Journal, NullDriver, PlotConfig,
    PlotterDriver, RecoveryError,
};

/// Exit codes, kept distinct so scripts can branch on the failure class.
pub const EXIT_OTHER: i32 = 1;
pub const EXIT_ILLEGAL: i32 = 2;
pub const EXIT_GUARD_BLOCKED: i32 = 3;
pub const EXIT_ACTION_FAILED: i32 = 4;

/// A command failure carrying its exit code.
#[derive(Debug)]
pub struct CliFailure {
    pub code: i32,
    pub message: String,
}

impl CliFailure {
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_OTHER,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_ILLEGAL,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CliFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<FsmError> for CliFailure {
    fn from(err: FsmError) -> Self {
        let code = match &err {
            FsmError::IllegalTransition { .. } => EXIT_ILLEGAL,
            FsmError::GuardBlocked { .. } => EXIT_GUARD_BLOCKED,
            FsmError::HookBlocked { .. }
            | FsmError::DeviceBusy { .. }
            | FsmError::ActionFailed { .. } => EXIT_ACTION_FAILED,
            FsmError::Database(_) | FsmError::Journal(_) => EXIT_OTHER,
        };
        let message = match &err {
            // Give the operator the per-guard remediation, not just names.
            FsmError::GuardBlocked { decision, .. } => {
                let mut lines = vec![err.to_string()];
                for result in decision.results.iter().filter(|r| r.is_fail()) {
                    match &result.remedy {
                        Some(remedy) => {
                            lines.push(format!("  {}: {} ({remedy})", result.guard, result.message))
                        }
                        None => lines.push(format!("  {}: {}", result.guard, result.message)),
                    }
                }
                lines.join("\n")
            }
            _ => err.to_string(),
        };
        Self { code, message }
    }
}

impl From<RecoveryError> for CliFailure {
    fn from(err: RecoveryError) -> Self {
        let code = match &err {
            RecoveryError::NotInterrupted { .. } | RecoveryError::RestartNotAllowed { .. } => {
                EXIT_ILLEGAL
            }
            _ => EXIT_OTHER,
        };
        Self {
            code,
            message: err.to_string(),
        }
    }
}

macro_rules! from_core_error {
    ($($ty:ty),*) => {
        $(impl From<$ty> for CliFailure {
            fn from(err: $ty) -> Self {
                Self::other(err.to_string())
            }
        })*
    };
}

from_core_error!(
    plotjob_core::CoreError,
    plotjob_core::DatabaseError,
    plotjob_core::JournalError,
    plotjob_core::ConfigError,
    serde_json::Error
);

/// The opened persistence layer.
pub struct Core {
    pub db: Arc<Database>,
    pub journal: Arc<Journal>,
    pub config: PlotConfig,
}

pub fn open_core() -> Result<Core, CliFailure> {
    Ok(Core {
        db: Arc::new(Database::open()?),
        journal: Arc::new(Journal::open_default()?),
        config: PlotConfig::load()?,
    })
}

/// Assemble the FSM with the configured guards and hooks and the no-op
/// driver (the real actuator is an external collaborator).
pub fn build_fsm(core: &Core) -> JobFsm {
    let guards = GuardManager::with_defaults(&core.config.guards);
    let hooks = HookExecutor::new(core.config.hooks.clone(), Arc::clone(&core.journal));
    let driver: Arc<dyn PlotterDriver> = Arc::new(NullDriver);
    JobFsm::new(
        Arc::clone(&core.db),
        Arc::clone(&core.journal),
        guards,
        hooks,
        driver,
    )
}

/// The operator's name for attestations and journal actors.
pub fn operator_name() -> String {
    std::env::var("USER").unwrap_or_else(|_| "operator".to_string())
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliFailure> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
