//! # Plan data for one action.
//!
//! [`ActionDefinition`] is what an external plan loader hands over: pure data,
//! deserializable from JSON. Behaviors are attached later by the orchestrator
//! (see [`BehaviorCatalog`](crate::BehaviorCatalog)).
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use stationvisor::{ActionDefinition, ActionKind};
//!
//! let measure = ActionDefinition::new("measure-voltage", 1, 3)
//!     .with_retries(2)
//!     .with_timeout(Duration::from_secs(5))
//!     .with_mark("measure");
//!
//! let loop_back = ActionDefinition::new("loop", 1, 4)
//!     .with_kind(ActionKind::goto_mark("measure"))
//!     .with_retries(3);
//!
//! assert_eq!(measure.come_to_mark.as_deref(), Some("measure"));
//! assert!(loop_back.kind.is_goto());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::durations;

/// Addressing mode of a GoTo action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GotoMode {
    /// First action of the branch.
    Start,
    /// Last action of the branch.
    Finish,
    /// Absolute step number (1-based position in the branch).
    Step,
    /// Action carrying the given come-to mark (last match wins).
    Mark,
}

/// Closed set of action variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Test step executed through its behavior.
    #[default]
    Normal,
    /// Stops the whole cycle with verdict ABORTED.
    Abort,
    /// Barrier shared by every branch declaring the same group.
    Rendezvous { group: String },
    /// Unconditional jump.
    GoTo {
        mode: GotoMode,
        #[serde(default)]
        mark: String,
        #[serde(default)]
        step: u32,
    },
    /// Jump decided by the behavior (GoToMark = jump, Success = fall through).
    ConditionalGoTo { mark: String },
    /// Blocking operator prompt; never times out.
    PromptUser { message: String },
}

impl ActionKind {
    /// GoTo addressing a mark.
    pub fn goto_mark(mark: impl Into<String>) -> Self {
        ActionKind::GoTo {
            mode: GotoMode::Mark,
            mark: mark.into(),
            step: 0,
        }
    }

    /// GoTo addressing an absolute step.
    pub fn goto_step(step: u32) -> Self {
        ActionKind::GoTo {
            mode: GotoMode::Step,
            mark: String::new(),
            step,
        }
    }

    /// True for GoTo and ConditionalGoTo.
    pub fn is_goto(&self) -> bool {
        matches!(self, ActionKind::GoTo { .. } | ActionKind::ConditionalGoTo { .. })
    }

    /// Short label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ActionKind::Normal => "normal",
            ActionKind::Abort => "abort",
            ActionKind::Rendezvous { .. } => "rendezvous",
            ActionKind::GoTo { .. } => "goto",
            ActionKind::ConditionalGoTo { .. } => "conditional_goto",
            ActionKind::PromptUser { .. } => "prompt_user",
        }
    }
}

/// Follow-up evaluated after an action finished OK or NOK.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AfterConditions {
    /// Blocking dialog shown to the operator (empty = none).
    pub dialog: String,
    /// Fixed wait before continuing.
    #[serde(rename = "wait_ms", with = "durations::millis")]
    pub wait: Duration,
    /// Mark to jump to (empty = none).
    pub goto_mark: String,
    /// Independent jump budget for `goto_mark`.
    pub goto_retries: u32,
}

/// Result-group membership.
///
/// The member with `step == last_step` represents the group: its verdict is forced
/// to NOK when any member before it is not OK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    /// Offset of this action inside its group (0-based).
    pub step: u32,
    /// Offset of the group's last member.
    pub last_step: u32,
}

impl GroupMembership {
    #[inline]
    pub fn is_last(&self) -> bool {
        self.step == self.last_step
    }
}

fn default_enabled() -> bool {
    true
}

/// One step of a test plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// Version uid of the configured action.
    #[serde(default)]
    pub uid: String,
    /// Display name.
    pub name: String,
    /// Key into the behavior catalog (empty = use `name`).
    #[serde(default)]
    pub behavior: String,
    #[serde(default)]
    pub kind: ActionKind,
    /// Declared branch number (1-based).
    pub branch: u8,
    /// Declared step number.
    pub step: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Additional attempts after the first one.
    /// For GoTo kinds this is the jump ceiling instead.
    #[serde(default)]
    pub max_retries: u32,
    /// Per-attempt timeout (`0` = wait indefinitely).
    #[serde(default, rename = "timeout_ms", with = "durations::millis")]
    pub timeout: Duration,
    /// Mark label other actions can jump to.
    #[serde(default)]
    pub come_to_mark: Option<String>,
    #[serde(default)]
    pub after_ok: Option<AfterConditions>,
    #[serde(default)]
    pub after_nok: Option<AfterConditions>,
    /// Templates inserted after this action when it ends OK.
    #[serde(default)]
    pub after_ok_actions: Vec<ActionDefinition>,
    /// Templates inserted after this action when it ends NOK.
    #[serde(default)]
    pub after_nok_actions: Vec<ActionDefinition>,
    #[serde(default)]
    pub group: Option<GroupMembership>,
    /// Calculated result is always OK.
    #[serde(default)]
    pub ignore_result: bool,
    /// Final OK/NOK are swapped.
    #[serde(default)]
    pub negate_result: bool,
}

impl ActionDefinition {
    /// Creates an enabled normal action without retries or timeout.
    pub fn new(name: impl Into<String>, branch: u8, step: u32) -> Self {
        let name = name.into();
        Self {
            uid: format!("{name}@{branch}.{step}"),
            behavior: String::new(),
            name,
            kind: ActionKind::Normal,
            branch,
            step,
            enabled: true,
            max_retries: 0,
            timeout: Duration::ZERO,
            come_to_mark: None,
            after_ok: None,
            after_nok: None,
            after_ok_actions: Vec::new(),
            after_nok_actions: Vec::new(),
            group: None,
            ignore_result: false,
            negate_result: false,
        }
    }

    /// Catalog key of the behavior implementing this action.
    pub fn behavior_key(&self) -> &str {
        if self.behavior.is_empty() {
            &self.name
        } else {
            &self.behavior
        }
    }

    /// Timeout as an option (`None` = wait indefinitely).
    pub fn attempt_timeout(&self) -> Option<Duration> {
        match self.kind {
            ActionKind::PromptUser { .. } => None,
            _ if self.timeout.is_zero() => None,
            _ => Some(self.timeout),
        }
    }

    /// True when the mark label equals `mark`.
    pub fn has_mark(&self, mark: &str) -> bool {
        self.come_to_mark.as_deref() == Some(mark)
    }

    pub fn with_kind(mut self, kind: ActionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_behavior(mut self, key: impl Into<String>) -> Self {
        self.behavior = key.into();
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_mark(mut self, mark: impl Into<String>) -> Self {
        self.come_to_mark = Some(mark.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_after_ok(mut self, cond: AfterConditions) -> Self {
        self.after_ok = Some(cond);
        self
    }

    pub fn with_after_nok(mut self, cond: AfterConditions) -> Self {
        self.after_nok = Some(cond);
        self
    }

    pub fn with_after_ok_actions(mut self, actions: Vec<ActionDefinition>) -> Self {
        self.after_ok_actions = actions;
        self
    }

    pub fn with_after_nok_actions(mut self, actions: Vec<ActionDefinition>) -> Self {
        self.after_nok_actions = actions;
        self
    }

    pub fn in_group(mut self, step: u32, last_step: u32) -> Self {
        self.group = Some(GroupMembership { step, last_step });
        self
    }

    pub fn ignoring_result(mut self) -> Self {
        self.ignore_result = true;
        self
    }

    pub fn negating_result(mut self) -> Self {
        self.negate_result = true;
        self
    }
}
