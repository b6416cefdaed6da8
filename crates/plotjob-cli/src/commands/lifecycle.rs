//! The lifecycle verbs. All of them funnel into `JobFsm::apply`; `arm`
//! additionally carries the probe flags and the interactive override flow.

use std::io::{BufRead, Write};

use clap::{Args, ValueEnum};
use plotjob_core::{
    CameraStatus, DeviceStatus, FsmError, PaperSession, ProbeSnapshot, Transition,
    TransitionAttestation, TransitionRequest,
};

use crate::common::{build_fsm, open_core, operator_name, print_json, CliFailure};

/// Apply a plain (probe-free) transition and print the resulting job.
pub fn transition(id: &str, op: Transition) -> Result<(), CliFailure> {
    let core = open_core()?;
    let fsm = build_fsm(&core);
    let job = fsm.apply(id, op, TransitionRequest::default())?;
    print_json(&job)
}

pub fn fail(id: &str, reason: Option<String>) -> Result<(), CliFailure> {
    let core = open_core()?;
    let fsm = build_fsm(&core);
    let mut request = TransitionRequest::default();
    request.reason = reason;
    let job = fsm.apply(id, Transition::Fail, request)?;
    print_json(&job)
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CameraArg {
    Reachable,
    Unreachable,
    NotInstalled,
}

impl From<CameraArg> for CameraStatus {
    fn from(arg: CameraArg) -> Self {
        match arg {
            CameraArg::Reachable => CameraStatus::Reachable,
            CameraArg::Unreachable => CameraStatus::Unreachable,
            CameraArg::NotInstalled => CameraStatus::NotInstalled,
        }
    }
}

#[derive(Args)]
pub struct ArmArgs {
    pub id: String,
    /// Prompt to override failed guards that permit it
    #[arg(long = "override")]
    pub override_guards: bool,
    /// Attest a named guard non-interactively (repeatable)
    #[arg(long = "attest")]
    pub attestations: Vec<String>,
    /// Confirm the physical rig is ready (pen seated, bed clear)
    #[arg(long)]
    pub confirm_setup: bool,
    /// Id of the open paper session
    #[arg(long)]
    pub paper_session: Option<String>,
    /// Pen currently loaded in the carousel (repeatable)
    #[arg(long = "pen")]
    pub pens: Vec<String>,
    /// Monitoring camera status as probed by the operator's tooling
    #[arg(long, value_enum, default_value = "not-installed")]
    pub camera: CameraArg,
}

impl ArmArgs {
    /// Probe snapshot from the flags; the device field is filled from the
    /// driver afterwards.
    fn probes(&self) -> ProbeSnapshot {
        ProbeSnapshot {
            device: DeviceStatus::Unknown,
            paper_session: self.paper_session.as_ref().map(|id| PaperSession {
                id: id.clone(),
                opened_at: chrono::Utc::now(),
            }),
            camera: self.camera.into(),
            loaded_pens: self.pens.clone(),
            setup_confirmed: self.confirm_setup,
        }
    }
}

pub fn arm(args: ArmArgs) -> Result<(), CliFailure> {
    let core = open_core()?;
    let fsm = build_fsm(&core);
    let operator = operator_name();

    let mut request = TransitionRequest::by(operator.clone());
    request.probes = args.probes();
    request.probes.device = fsm.device_status();
    request.attestations = args
        .attestations
        .iter()
        .map(|guard| TransitionAttestation::new(guard, &operator))
        .collect();

    match fsm.apply(&args.id, Transition::Arm, request.clone()) {
        Ok(job) => print_json(&job),
        Err(FsmError::GuardBlocked { decision, .. }) if args.override_guards => {
            // Interactive path: offer an attestation for each overridable
            // failure, then retry once with whatever the operator granted.
            let mut granted = request.attestations.clone();
            let stdin = std::io::stdin();
            for result in decision.results.iter().filter(|r| r.is_fail()) {
                if !fsm.guards().is_overridable(&result.guard) {
                    eprintln!("{}: {} (not overridable)", result.guard, result.message);
                    continue;
                }
                if let Some(remedy) = &result.remedy {
                    eprintln!("{}: {} ({remedy})", result.guard, result.message);
                } else {
                    eprintln!("{}: {}", result.guard, result.message);
                }
                eprint!("override {}? [y/N]: ", result.guard);
                let _ = std::io::stderr().flush();
                let mut answer = String::new();
                stdin
                    .lock()
                    .read_line(&mut answer)
                    .map_err(|e| CliFailure::other(e.to_string()))?;
                if answer.trim().eq_ignore_ascii_case("y") {
                    granted.push(
                        TransitionAttestation::new(&result.guard, &operator)
                            .with_note("interactive override"),
                    );
                }
            }

            let mut retry = TransitionRequest::by(operator);
            retry.probes = args.probes();
            retry.probes.device = fsm.device_status();
            retry.attestations = granted;
            let job = fsm.apply(&args.id, Transition::Arm, retry)?;
            print_json(&job)
        }
        Err(err) => Err(err.into()),
    }
}
