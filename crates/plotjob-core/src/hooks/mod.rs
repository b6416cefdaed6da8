//! Lifecycle hooks: configured external commands bound to transition
//! points.
//!
//! Hooks run synchronously with respect to the transition unless marked
//! fire-and-forget. Failure of a non-blocking hook is logged and journaled
//! only; a blocking hook failure is surfaced to the FSM, which aborts or
//! rolls back the transition.

use serde::{Deserialize, Serialize};
use std::process::Command;
use std::sync::Arc;

use crate::job::JobRecord;
use crate::journal::{Journal, JournalRecord};

/// Transition points a hook can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookTrigger {
    PreArm,
    PostArm,
    PostComplete,
    OnError,
}

impl HookTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            HookTrigger::PreArm => "pre-arm",
            HookTrigger::PostArm => "post-arm",
            HookTrigger::PostComplete => "post-complete",
            HookTrigger::OnError => "on-error",
        }
    }
}

/// One configured hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    pub trigger: HookTrigger,
    /// Command template; `{job_id}`, `{state}`, `{source}`, `{priority}`,
    /// `{name}` and `{error}` are substituted from the job context,
    /// shell-quoted.
    pub command: String,
    /// Blocking hooks abort the transition on failure.
    #[serde(default)]
    pub blocking: bool,
    /// Fire-and-forget hooks run on a detached thread; their exit status
    /// is journaled when they finish but never affects the transition.
    #[serde(default)]
    pub fire_and_forget: bool,
}

/// Captured outcome of one hook invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookOutcome {
    pub trigger: HookTrigger,
    pub command: String,
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl HookOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_status == 0
    }
}

/// Result of running every hook bound to one trigger.
#[derive(Debug, Clone, Default)]
pub struct HookBatch {
    pub outcomes: Vec<HookOutcome>,
    /// First blocking hook that failed, if any.
    pub blocked_by: Option<String>,
}

impl HookBatch {
    pub fn is_blocked(&self) -> bool {
        self.blocked_by.is_some()
    }
}

/// Runs configured hooks and journals every outcome for audit.
pub struct HookExecutor {
    hooks: Vec<HookConfig>,
    journal: Arc<Journal>,
}

impl HookExecutor {
    pub fn new(hooks: Vec<HookConfig>, journal: Arc<Journal>) -> Self {
        Self { hooks, journal }
    }

    /// Run all hooks bound to `trigger`, in configuration order. Stops at
    /// the first blocking failure; later hooks for the same trigger are
    /// not run in that case.
    pub fn run_trigger(&self, trigger: HookTrigger, job: &JobRecord) -> HookBatch {
        let mut batch = HookBatch::default();

        for hook in self.hooks.iter().filter(|h| h.trigger == trigger) {
            let command = render_template(&hook.command, job);

            if hook.fire_and_forget {
                self.spawn_detached(trigger, command, job.id.clone());
                continue;
            }

            let outcome = run_command(trigger, &command);
            self.journal_outcome(&job.id, &outcome);

            if !outcome.succeeded() {
                if hook.blocking {
                    tracing::error!(
                        hook = %command,
                        exit_status = outcome.exit_status,
                        "blocking hook failed"
                    );
                    batch.blocked_by = Some(command.clone());
                    batch.outcomes.push(outcome);
                    break;
                }
                tracing::warn!(
                    hook = %command,
                    exit_status = outcome.exit_status,
                    "hook failed (non-blocking)"
                );
            }
            batch.outcomes.push(outcome);
        }

        batch
    }

    fn spawn_detached(&self, trigger: HookTrigger, command: String, job_id: String) {
        let journal = Arc::clone(&self.journal);
        std::thread::spawn(move || {
            let outcome = run_command(trigger, &command);
            let record =
                JournalRecord::hooks_executed("hook", &outcome.command, outcome.exit_status);
            if let Err(e) = journal.append(&job_id, &record) {
                tracing::warn!(job_id, error = %e, "failed to journal fire-and-forget hook");
            }
        });
    }

    fn journal_outcome(&self, job_id: &str, outcome: &HookOutcome) {
        let record = JournalRecord::hooks_executed("hook", &outcome.command, outcome.exit_status);
        if let Err(e) = self.journal.append(job_id, &record) {
            tracing::warn!(job_id, error = %e, "failed to journal hook outcome");
        }
    }
}

/// Substitute `{placeholder}` values from the job into a command template.
/// Values are single-quoted for `sh`, so metacharacters in a job name or
/// source path stay literal arguments.
fn render_template(template: &str, job: &JobRecord) -> String {
    template
        .replace("{job_id}", &shell_quote(&job.id))
        .replace("{state}", &shell_quote(job.state.as_str()))
        .replace("{source}", &shell_quote(&job.source))
        .replace("{priority}", &shell_quote(&job.priority.to_string()))
        .replace("{name}", &shell_quote(&job.name))
        .replace("{error}", &shell_quote(job.error_message.as_deref().unwrap_or("")))
}

fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

fn run_command(trigger: HookTrigger, command: &str) -> HookOutcome {
    match Command::new("sh").arg("-c").arg(command).output() {
        Ok(output) => HookOutcome {
            trigger,
            command: command.to_string(),
            exit_status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        },
        Err(e) => HookOutcome {
            trigger,
            command: command.to_string(),
            exit_status: -1,
            stdout: String::new(),
            stderr: e.to_string(),
        },
    }
}
