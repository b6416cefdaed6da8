//! Guard gate for the arm transition.
//!
//! Guards are precondition checks run before the plotter is armed. Every
//! guard implements a single capability -- `check(context) -> GuardResult`
//! -- and is registered in an ordered list with its own configuration.
//! Guard checks run on a worker thread with a bounded timeout; a timeout
//! is a FAIL, never a SKIPPED, so safety checks fail closed.
//!
//! Ambient device and session state is passed in explicitly via
//! [`GuardContext`], so tests supply synthetic contexts without touching
//! hardware.

pub mod camera;
pub mod paper;
pub mod pen;
pub mod setup;

pub use camera::CameraHealthGuard;
pub use paper::PaperSessionGuard;
pub use pen::PenLayerGuard;
pub use setup::PhysicalSetupGuard;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GuardsConfig;
use crate::job::JobRecord;

/// Outcome category of a guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardStatus {
    Pass,
    Fail,
    /// Valid outcome when the checked hardware is absent; logged but does
    /// not block the transition.
    Skipped,
}

/// Result of a single guard check. Never mutated after creation; journaled
/// regardless of outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardResult {
    pub guard: String,
    pub status: GuardStatus,
    pub message: String,
    /// Remediation guidance shown to the operator on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remedy: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl GuardResult {
    pub fn pass(guard: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            guard: guard.into(),
            status: GuardStatus::Pass,
            message: message.into(),
            remedy: None,
            checked_at: Utc::now(),
        }
    }

    pub fn fail(
        guard: impl Into<String>,
        message: impl Into<String>,
        remedy: impl Into<String>,
    ) -> Self {
        Self {
            guard: guard.into(),
            status: GuardStatus::Fail,
            message: message.into(),
            remedy: Some(remedy.into()),
            checked_at: Utc::now(),
        }
    }

    pub fn skipped(guard: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            guard: guard.into(),
            status: GuardStatus::Skipped,
            message: message.into(),
            remedy: None,
            checked_at: Utc::now(),
        }
    }

    pub fn is_fail(&self) -> bool {
        self.status == GuardStatus::Fail
    }
}

/// Operator override of a failed guard, valid for one transition attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionAttestation {
    pub guard: String,
    pub operator: String,
    pub attested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TransitionAttestation {
    pub fn new(guard: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            guard: guard.into(),
            operator: operator.into(),
            attested_at: Utc::now(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Observed state of the physical device at check time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Connected,
    Disconnected,
    Unknown,
}

/// Observed state of the monitoring camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    Reachable,
    Unreachable,
    /// No camera on this rig -- the guard reports SKIPPED.
    NotInstalled,
}

/// An open paper session: paper was aligned on the bed and has not been
/// disturbed since.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperSession {
    pub id: String,
    pub opened_at: DateTime<Utc>,
}

/// Everything a guard may inspect. Built by the caller; no process-global
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardContext {
    pub job: JobRecord,
    pub device: DeviceStatus,
    pub paper_session: Option<PaperSession>,
    pub camera: CameraStatus,
    /// Pen names currently loaded in the carousel.
    pub loaded_pens: Vec<String>,
    /// Operator confirmed the physical setup for this job.
    pub setup_confirmed: bool,
}

impl GuardContext {
    /// A context with nothing probed yet, for building up in callers and
    /// tests.
    pub fn for_job(job: JobRecord) -> Self {
        Self {
            job,
            device: DeviceStatus::Unknown,
            paper_session: None,
            camera: CameraStatus::NotInstalled,
            loaded_pens: Vec::new(),
            setup_confirmed: false,
        }
    }
}

/// Every precondition check implements this trait.
pub trait Guard: Send + Sync {
    /// Stable identifier, used in configuration and journal entries.
    fn name(&self) -> &'static str;

    /// Run the check against an explicit context.
    fn check(&self, ctx: &GuardContext) -> GuardResult;
}

/// Per-guard configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Required guards block on FAIL; advisory guards are journaled only.
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Whether an operator attestation may convert a FAIL into a pass.
    #[serde(default)]
    pub overridable: bool,
}

fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    10
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required: true,
            timeout_secs: default_timeout_secs(),
            overridable: false,
        }
    }
}

/// Outcome of evaluating the full guard list for one arm attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmDecision {
    /// Every result, in registration order, including passes.
    pub results: Vec<GuardResult>,
    /// Failures accepted via operator attestation.
    pub attested: Vec<TransitionAttestation>,
    /// Names of required guards still failing. Empty means the arm may
    /// proceed.
    pub blocking: Vec<String>,
}

impl ArmDecision {
    pub fn permits_arming(&self) -> bool {
        self.blocking.is_empty()
    }
}

struct RegisteredGuard {
    guard: Arc<dyn Guard>,
    config: GuardConfig,
}

/// Ordered guard registry and evaluation policy for the arm transition.
pub struct GuardManager {
    guards: Vec<RegisteredGuard>,
}

impl GuardManager {
    pub fn new() -> Self {
        Self { guards: Vec::new() }
    }

    /// The four shipped guards, configured from the guards section of the
    /// config file.
    pub fn with_defaults(config: &GuardsConfig) -> Self {
        let mut manager = Self::new();
        manager.register(Arc::new(PaperSessionGuard), config.paper_session.clone());
        manager.register(Arc::new(PenLayerGuard), config.pen_layer.clone());
        manager.register(Arc::new(CameraHealthGuard), config.camera_health.clone());
        manager.register(Arc::new(PhysicalSetupGuard), config.physical_setup.clone());
        manager
    }

    pub fn register(&mut self, guard: Arc<dyn Guard>, config: GuardConfig) {
        self.guards.push(RegisteredGuard { guard, config });
    }

    pub fn is_overridable(&self, guard_name: &str) -> bool {
        self.guards
            .iter()
            .any(|g| g.guard.name() == guard_name && g.config.overridable)
    }

    /// Run every enabled guard in order and decide whether arming may
    /// proceed. Attestations convert a FAIL on an overridable guard into
    /// an accepted pass for this attempt only.
    pub fn evaluate_arm(
        &self,
        ctx: &GuardContext,
        attestations: &[TransitionAttestation],
    ) -> ArmDecision {
        let mut results = Vec::new();
        let mut accepted = Vec::new();
        let mut blocking = Vec::new();

        for registered in &self.guards {
            let name = registered.guard.name();
            if !registered.config.enabled {
                results.push(GuardResult::skipped(name, "guard disabled"));
                continue;
            }

            let result = run_with_timeout(
                Arc::clone(&registered.guard),
                ctx.clone(),
                Duration::from_secs(registered.config.timeout_secs),
            );

            if result.is_fail() && registered.config.required {
                let attestation = attestations
                    .iter()
                    .find(|a| a.guard == name)
                    .filter(|_| registered.config.overridable);
                match attestation {
                    Some(a) => {
                        tracing::warn!(
                            guard = name,
                            operator = %a.operator,
                            "guard failure overridden by operator attestation"
                        );
                        accepted.push(a.clone());
                    }
                    None => blocking.push(name.to_string()),
                }
            }
            results.push(result);
        }

        ArmDecision {
            results,
            attested: accepted,
            blocking,
        }
    }
}

impl Default for GuardManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one check on a worker thread, converting a timeout into a FAIL.
fn run_with_timeout(guard: Arc<dyn Guard>, ctx: GuardContext, timeout: Duration) -> GuardResult {
    let name = guard.name();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        // Receiver may be gone if we already timed out; that is fine.
        let _ = tx.send(guard.check(&ctx));
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => GuardResult::fail(
            name,
            format!("check timed out after {}s", timeout.as_secs()),
            "verify the probe hardware is responsive, then retry arming",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobRecord;

    struct AlwaysFail;
    impl Guard for AlwaysFail {
        fn name(&self) -> &'static str {
            "always_fail"
        }
        fn check(&self, _ctx: &GuardContext) -> GuardResult {
            GuardResult::fail("always_fail", "nope", "give up")
        }
    }

    struct AlwaysPass;
    impl Guard for AlwaysPass {
        fn name(&self) -> &'static str {
            "always_pass"
        }
        fn check(&self, _ctx: &GuardContext) -> GuardResult {
            GuardResult::pass("always_pass", "ok")
        }
    }

    struct Sleepy;
    impl Guard for Sleepy {
        fn name(&self) -> &'static str {
            "sleepy"
        }
        fn check(&self, _ctx: &GuardContext) -> GuardResult {
            std::thread::sleep(Duration::from_secs(5));
            GuardResult::pass("sleepy", "eventually")
        }
    }

    fn ctx() -> GuardContext {
        GuardContext::for_job(JobRecord::new("t", "/tmp/t.svg"))
    }

    #[test]
    fn all_pass_permits_arming() {
        let mut manager = GuardManager::new();
        manager.register(Arc::new(AlwaysPass), GuardConfig::default());
        let decision = manager.evaluate_arm(&ctx(), &[]);
        assert!(decision.permits_arming());
        assert_eq!(decision.results.len(), 1);
    }

    #[test]
    fn required_failure_blocks() {
        let mut manager = GuardManager::new();
        manager.register(Arc::new(AlwaysPass), GuardConfig::default());
        manager.register(Arc::new(AlwaysFail), GuardConfig::default());
        let decision = manager.evaluate_arm(&ctx(), &[]);
        assert!(!decision.permits_arming());
        assert_eq!(decision.blocking, vec!["always_fail"]);
        // Failures are still recorded for audit.
        assert_eq!(decision.results.len(), 2);
    }

    #[test]
    fn advisory_failure_does_not_block() {
        let mut manager = GuardManager::new();
        manager.register(
            Arc::new(AlwaysFail),
            GuardConfig {
                required: false,
                ..GuardConfig::default()
            },
        );
        let decision = manager.evaluate_arm(&ctx(), &[]);
        assert!(decision.permits_arming());
        assert!(decision.results[0].is_fail());
    }

    #[test]
    fn disabled_guard_is_skipped() {
        let mut manager = GuardManager::new();
        manager.register(
            Arc::new(AlwaysFail),
            GuardConfig {
                enabled: false,
                ..GuardConfig::default()
            },
        );
        let decision = manager.evaluate_arm(&ctx(), &[]);
        assert!(decision.permits_arming());
        assert_eq!(decision.results[0].status, GuardStatus::Skipped);
    }

    #[test]
    fn attestation_overrides_only_overridable_guards() {
        let mut manager = GuardManager::new();
        manager.register(Arc::new(AlwaysFail), GuardConfig::default());
        let attestation = TransitionAttestation::new("always_fail", "alex");

        // Not overridable: attestation is ignored.
        let decision = manager.evaluate_arm(&ctx(), std::slice::from_ref(&attestation));
        assert!(!decision.permits_arming());

        let mut manager = GuardManager::new();
        manager.register(
            Arc::new(AlwaysFail),
            GuardConfig {
                overridable: true,
                ..GuardConfig::default()
            },
        );
        let decision = manager.evaluate_arm(&ctx(), &[attestation]);
        assert!(decision.permits_arming());
        assert_eq!(decision.attested.len(), 1);
        assert_eq!(decision.attested[0].operator, "alex");
    }

    #[test]
    fn timeout_is_a_failure() {
        let mut manager = GuardManager::new();
        manager.register(
            Arc::new(Sleepy),
            GuardConfig {
                timeout_secs: 1,
                ..GuardConfig::default()
            },
        );
        let decision = manager.evaluate_arm(&ctx(), &[]);
        assert!(!decision.permits_arming());
        assert_eq!(decision.results[0].status, GuardStatus::Fail);
        assert!(decision.results[0].message.contains("timed out"));
    }
}
