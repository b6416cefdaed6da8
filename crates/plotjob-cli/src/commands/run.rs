//! `run <id>`: start (or resume) a job and hold the plotting session with
//! ctrl-c capture armed.
//!
//! The actual motion is the external driver's business; this command's job
//! is to keep the process alive so a SIGINT leaves emergency breadcrumbs
//! on the journal instead of silently orphaning a PLOTTING row. With
//! `--duration-secs` the job is completed automatically when the timer
//! fires (useful for dry runs with the no-op driver).

use std::sync::Arc;

use plotjob_core::{EmergencyCapture, JobState, Transition, TransitionRequest};

use crate::common::{build_fsm, open_core, print_json, CliFailure};

pub fn run(id: &str, duration_secs: Option<u64>) -> Result<(), CliFailure> {
    let core = open_core()?;
    let fsm = build_fsm(&core);

    let job = core.db.require_job(id)?;
    let op = match job.state {
        JobState::Armed => Transition::Start,
        JobState::Paused => Transition::Resume,
        other => {
            return Err(CliFailure::usage(format!(
                "Job {id} is in state '{other}'; run expects armed or paused"
            )))
        }
    };
    let job = fsm.apply(id, op, TransitionRequest::default())?;
    print_json(&job)?;
    tracing::info!(job_id = %id, "plotting; ctrl-c pauses with emergency capture");

    let capture = EmergencyCapture::new(Arc::clone(&core.db), Arc::clone(&core.journal));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliFailure::other(e.to_string()))?;

    runtime.block_on(async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let captured = capture.capture("SIGINT");
                eprintln!("interrupted; journaled emergency shutdown for {captured} job(s)");
                std::process::exit(130);
            }
            _ = wait(duration_secs) => {
                let job = fsm.apply(id, Transition::Complete, TransitionRequest::default())?;
                print_json(&job)
            }
        }
    })
}

async fn wait(duration_secs: Option<u64>) {
    match duration_secs {
        Some(secs) => tokio::time::sleep(std::time::Duration::from_secs(secs)).await,
        // Without a timer the session holds until a signal arrives.
        None => std::future::pending().await,
    }
}
