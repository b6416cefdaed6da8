use clap::Subcommand;
use plotjob_core::{CrashRecoveryScanner, Disposition};
use serde_json::json;

use crate::common::{open_core, print_json, CliFailure};

#[derive(Subcommand)]
pub enum RecoverAction {
    /// Scan all non-terminal jobs, repairing rows that lag their journal
    List,
    /// Apply a disposition to one interrupted job
    Dispose {
        id: String,
        /// resume-in-place | requeue-front | requeue-end | abort
        disposition: String,
    },
}

pub fn run(action: RecoverAction) -> Result<(), CliFailure> {
    let core = open_core()?;
    let scanner = CrashRecoveryScanner::new(core.db, core.journal);

    match action {
        RecoverAction::List => {
            let report = scanner.scan()?;
            let findings: Vec<_> = report
                .findings
                .iter()
                .map(|f| {
                    json!({
                        "job": f.job,
                        "interrupted": f.interrupted,
                        "snapshot_repaired": f.snapshot_repaired,
                        "corrupt_lines": f.corrupt_lines,
                        "emergency": f.emergency,
                    })
                })
                .collect();
            print_json(&findings)
        }
        RecoverAction::Dispose { id, disposition } => {
            let disposition = Disposition::parse(&disposition).ok_or_else(|| {
                CliFailure::usage(format!(
                    "Unknown disposition '{disposition}'; expected resume-in-place, requeue-front, requeue-end or abort"
                ))
            })?;
            let job = scanner.dispose(&id, disposition)?;
            print_json(&job)
        }
    }
}

pub fn restart(id: &str) -> Result<(), CliFailure> {
    let core = open_core()?;
    let scanner = CrashRecoveryScanner::new(core.db, core.journal);
    let job = scanner.restart(id)?;
    print_json(&job)
}
