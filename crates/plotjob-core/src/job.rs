//! Job data model: states, transitions and the persisted job row.
//!
//! `JobState` and the transition table are the single source of truth for
//! lifecycle legality. `JobRecord.state` is only ever mutated through the
//! FSM; everything else treats the row as read-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a plot job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    New,
    Queued,
    Analyzed,
    Optimized,
    Ready,
    Armed,
    Plotting,
    Paused,
    Completed,
    Aborted,
    Failed,
}

impl JobState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Aborted | JobState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::Queued => "queued",
            JobState::Analyzed => "analyzed",
            JobState::Optimized => "optimized",
            JobState::Ready => "ready",
            JobState::Armed => "armed",
            JobState::Plotting => "plotting",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Aborted => "aborted",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "new" => JobState::New,
            "queued" => JobState::Queued,
            "analyzed" => JobState::Analyzed,
            "optimized" => JobState::Optimized,
            "ready" => JobState::Ready,
            "armed" => JobState::Armed,
            "plotting" => JobState::Plotting,
            "paused" => JobState::Paused,
            "completed" => JobState::Completed,
            "aborted" => JobState::Aborted,
            "failed" => JobState::Failed,
            _ => return None,
        })
    }

    /// All states, for table-driven tests.
    pub fn all() -> [JobState; 11] {
        [
            JobState::New,
            JobState::Queued,
            JobState::Analyzed,
            JobState::Optimized,
            JobState::Ready,
            JobState::Armed,
            JobState::Plotting,
            JobState::Paused,
            JobState::Completed,
            JobState::Aborted,
            JobState::Failed,
        ]
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named lifecycle operation from the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Queue,
    Analyze,
    Optimize,
    Ready,
    /// The sole guard-gated transition.
    Arm,
    Start,
    Pause,
    Resume,
    Complete,
    Abort,
    Fail,
}

impl Transition {
    /// The target state of this operation.
    pub fn target(self) -> JobState {
        match self {
            Transition::Queue => JobState::Queued,
            Transition::Analyze => JobState::Analyzed,
            Transition::Optimize => JobState::Optimized,
            Transition::Ready => JobState::Ready,
            Transition::Arm => JobState::Armed,
            Transition::Start => JobState::Plotting,
            Transition::Pause => JobState::Paused,
            Transition::Resume => JobState::Plotting,
            Transition::Complete => JobState::Completed,
            Transition::Abort => JobState::Aborted,
            Transition::Fail => JobState::Failed,
        }
    }

    /// Whether this operation is legal from the given state.
    ///
    /// Abort and fail are legal from any non-terminal state; everything
    /// else requires the single expected predecessor.
    pub fn legal_from(self, from: JobState) -> bool {
        match self {
            Transition::Queue => from == JobState::New,
            Transition::Analyze => from == JobState::Queued,
            Transition::Optimize => from == JobState::Analyzed,
            Transition::Ready => from == JobState::Optimized,
            Transition::Arm => from == JobState::Ready,
            Transition::Start => from == JobState::Armed,
            Transition::Pause => from == JobState::Plotting,
            Transition::Resume => from == JobState::Paused,
            Transition::Complete => from == JobState::Plotting,
            Transition::Abort | Transition::Fail => !from.is_terminal(),
        }
    }

    /// Whether this operation enters PLOTTING and therefore needs the
    /// device lease.
    pub fn enters_plotting(self) -> bool {
        matches!(self, Transition::Start | Transition::Resume)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Queue => "queue",
            Transition::Analyze => "analyze",
            Transition::Optimize => "optimize",
            Transition::Ready => "ready",
            Transition::Arm => "arm",
            Transition::Start => "start",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Complete => "complete",
            Transition::Abort => "abort",
            Transition::Fail => "fail",
        }
    }

    /// All operations, for table-driven tests.
    pub fn all() -> [Transition; 11] {
        [
            Transition::Queue,
            Transition::Analyze,
            Transition::Optimize,
            Transition::Ready,
            Transition::Arm,
            Transition::Start,
            Transition::Pause,
            Transition::Resume,
            Transition::Complete,
            Transition::Abort,
            Transition::Fail,
        ]
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plan metadata produced by the (external) optimization pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanMeta {
    /// Layer id -> pen name, as detected by multi-pen layer analysis.
    #[serde(default)]
    pub pen_mapping: HashMap<String, String>,
    /// Number of drawable layers in the source artifact.
    #[serde(default)]
    pub layer_count: u32,
}

/// The persisted job row. One per submitted drawing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Stable opaque id (`job-<uuid>`).
    pub id: String,
    pub name: String,
    /// Path to the source artifact (SVG or similar).
    pub source: String,
    pub state: JobState,
    pub plan: PlanMeta,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl JobRecord {
    /// Create a fresh job in state NEW.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("job-{}", uuid::Uuid::new_v4()),
            name: name.into(),
            source: source.into(),
            state: JobState::New,
            plan: PlanMeta::default(),
            priority: 0,
            created_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    pub fn with_plan(mut self, plan: PlanMeta) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}
