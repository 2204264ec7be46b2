//! # Cycle and branch reports.
//!
//! What a finished cycle hands to persistence and export. Reports are plain data
//! and serialize to JSON for the plant export.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::plan::{CycleContext, PlanAction, Verdict};

/// Why a branch stopped executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStop {
    /// Cursor reached the end of the sequence.
    Completed,
    /// An action ended with an exception.
    Exception,
    /// An Abort action was reached (here or in a sibling branch).
    Aborted,
    /// The cycle scope was cancelled.
    EmergencyAbort,
    /// The branch task panicked.
    Panicked,
}

impl BranchStop {
    pub fn as_label(self) -> &'static str {
        match self {
            BranchStop::Completed => "completed",
            BranchStop::Exception => "exception",
            BranchStop::Aborted => "aborted",
            BranchStop::EmergencyAbort => "emergency_abort",
            BranchStop::Panicked => "panicked",
        }
    }
}

/// Final state of one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub uid: String,
    pub name: String,
    pub kind: String,
    pub step: u32,
    pub verdict: Verdict,
    /// Verdict after `ignore_result`.
    pub calculated: Verdict,
    pub attempts: u32,
    pub goto_count: u32,
    /// Uid of the parent for after-actions.
    pub parent: Option<String>,
    /// Dropped by a backward jump.
    pub removed: bool,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

impl ActionRecord {
    pub(crate) fn from_action(action: &PlanAction, parent: Option<&PlanAction>) -> Self {
        Self {
            uid: action.def.uid.clone(),
            name: action.def.name.clone(),
            kind: action.def.kind.as_label().to_string(),
            step: action.def.step,
            verdict: action.state.result,
            calculated: action.calculated_result(),
            attempts: action.state.attempts,
            goto_count: action.state.goto_count,
            parent: parent.map(|p| p.def.uid.clone()),
            removed: action.state.removed,
            started_at: action.state.started_at,
            finished_at: action.state.finished_at,
        }
    }

    /// Retries performed (attempts - 1).
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Final state of one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchReport {
    pub branch: u8,
    /// OK only when every live action counts as OK.
    pub verdict: Verdict,
    pub stop: BranchStop,
    /// Live actions in execution order, then removed ones.
    pub actions: Vec<ActionRecord>,
}

impl BranchReport {
    /// Report of a branch whose task died before reporting.
    pub(crate) fn lost(branch: u8, stop: BranchStop) -> Self {
        Self {
            branch,
            verdict: Verdict::Nok,
            stop,
            actions: Vec::new(),
        }
    }

    /// First live action named `name`.
    pub fn action(&self, name: &str) -> Option<&ActionRecord> {
        self.actions.iter().find(|a| a.name == name && !a.removed)
    }
}

/// Everything known about a finished cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub context: CycleContext,
    pub verdict: Verdict,
    pub branches: Vec<BranchReport>,
    /// Branch numbers dropped because a lower branch number had no actions.
    pub discontinuity: Vec<u8>,
}

impl CycleReport {
    pub fn branch(&self, branch: u8) -> Option<&BranchReport> {
        self.branches.iter().find(|b| b.branch == branch)
    }
}
