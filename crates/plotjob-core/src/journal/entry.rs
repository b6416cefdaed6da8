//! Journal record types and serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::guards::GuardStatus;
use crate::job::JobState;

/// One journal line. `kind` is flattened so the serialized form carries a
/// top-level `type` discriminator next to `at` and `actor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub at: DateTime<Utc>,
    /// Who triggered the entry: "cli", "operator", "signal", "scanner".
    pub actor: String,
    #[serde(flatten)]
    pub kind: JournalKind,
}

/// The type-specific payload of a journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalKind {
    /// An applied FSM transition.
    StateChange {
        from: JobState,
        to: JobState,
        reason: String,
        /// Free-form context: attestations, hook rollback details, etc.
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        metadata: serde_json::Value,
    },
    /// Outcome of a single guard check, journaled pass or fail.
    GuardResult {
        guard: String,
        status: GuardStatus,
        message: String,
    },
    /// A hook ran; exit status 0 means success.
    HooksExecuted { hook: String, exit_status: i32 },
    /// Written best-effort by the signal path; captures the last known
    /// state so the scanner can tell a crash from a graceful pause.
    EmergencyShutdown { state: JobState, reason: String },
}

impl JournalRecord {
    pub fn new(actor: impl Into<String>, kind: JournalKind) -> Self {
        Self {
            at: Utc::now(),
            actor: actor.into(),
            kind,
        }
    }

    pub fn state_change(
        actor: impl Into<String>,
        from: JobState,
        to: JobState,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            actor,
            JournalKind::StateChange {
                from,
                to,
                reason: reason.into(),
                metadata: serde_json::Value::Null,
            },
        )
    }

    pub fn state_change_with_metadata(
        actor: impl Into<String>,
        from: JobState,
        to: JobState,
        reason: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self::new(
            actor,
            JournalKind::StateChange {
                from,
                to,
                reason: reason.into(),
                metadata,
            },
        )
    }

    pub fn guard_result(
        actor: impl Into<String>,
        guard: impl Into<String>,
        status: GuardStatus,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            actor,
            JournalKind::GuardResult {
                guard: guard.into(),
                status,
                message: message.into(),
            },
        )
    }

    pub fn hooks_executed(
        actor: impl Into<String>,
        hook: impl Into<String>,
        exit_status: i32,
    ) -> Self {
        Self::new(
            actor,
            JournalKind::HooksExecuted {
                hook: hook.into(),
                exit_status,
            },
        )
    }

    pub fn emergency_shutdown(
        actor: impl Into<String>,
        state: JobState,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            actor,
            JournalKind::EmergencyShutdown {
                state,
                reason: reason.into(),
            },
        )
    }
}
