use clap::Subcommand;
use plotjob_core::JobRecord;

use crate::common::{open_core, print_json, CliFailure};

#[derive(Subcommand)]
pub enum JobAction {
    /// Submit a source artifact as a new job
    Submit {
        /// Path to the source artifact (SVG or similar)
        source: String,
        /// Display name; defaults to the file stem
        #[arg(long)]
        name: Option<String>,
        /// Queue priority (higher runs first)
        #[arg(long, default_value = "0")]
        priority: i64,
    },
    /// List jobs
    List {
        /// Only jobs that are not in a terminal state
        #[arg(long)]
        active: bool,
    },
    /// Print one job as JSON
    Show { id: String },
    /// Print a job's journal as JSON lines
    Journal { id: String },
    /// Delete a job row (the journal file is kept for audit)
    Delete { id: String },
}

pub fn run(action: JobAction) -> Result<(), CliFailure> {
    let core = open_core()?;

    match action {
        JobAction::Submit {
            source,
            name,
            priority,
        } => {
            let name = name.unwrap_or_else(|| {
                std::path::Path::new(&source)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "untitled".to_string())
            });
            let job = JobRecord::new(name, source).with_priority(priority);
            core.db.insert_job(&job)?;
            print_json(&job)?;
        }
        JobAction::List { active } => {
            let jobs = if active {
                core.db.list_active()?
            } else {
                core.db.list_jobs()?
            };
            print_json(&jobs)?;
        }
        JobAction::Show { id } => {
            let job = core.db.require_job(&id)?;
            print_json(&job)?;
        }
        JobAction::Journal { id } => {
            // Require the row so a typo'd id errors instead of printing [].
            core.db.require_job(&id)?;
            let records = core.journal.read(&id)?;
            print_json(&records)?;
        }
        JobAction::Delete { id } => {
            if !core.db.delete_job(&id)? {
                return Err(CliFailure::other(format!("Job not found: {id}")));
            }
            println!("{{\"deleted\": \"{id}\"}}");
        }
    }
    Ok(())
}
