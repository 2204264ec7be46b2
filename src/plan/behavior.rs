//! # Action behaviors.
//!
//! [`ActionBehavior`] is the single polymorphic capability behind every action kind.
//! The executor picks it once when the branch is built and never inspects the concrete
//! type again.
//!
//! A behavior receives an [`ActionContext`] carrying a per-attempt
//! [`CancellationToken`]. It is cancelled on timeout and when the cycle scope is
//! cancelled; long-running behaviors should watch it and return
//! [`ActionError::Canceled`].
//!
//! # Example
//! ```
//! use async_trait::async_trait;
//! use stationvisor::{ActionBehavior, ActionContext, ActionError, ActionOutput};
//!
//! struct ReadVoltage;
//!
//! #[async_trait]
//! impl ActionBehavior for ReadVoltage {
//!     fn name(&self) -> &str { "read-voltage" }
//!
//!     async fn execute(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
//!         if ctx.token.is_cancelled() {
//!             return Err(ActionError::Canceled);
//!         }
//!         Ok(ActionOutput::success().with_export("voltage", "12.1"))
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ActionError;
use crate::ports::PromptRef;

use super::{context::CycleContext, definition::ActionDefinition, verdict::StepOutcome};

/// Key/value exported by an action into the cycle overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedValue {
    pub key: String,
    pub value: String,
}

/// What one successful call to [`ActionBehavior::execute`] produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutput {
    pub outcome: StepOutcome,
    pub exported: Vec<ExportedValue>,
    /// Free-form payload stored with the action detail.
    pub data: Option<serde_json::Value>,
}

impl ActionOutput {
    pub fn new(outcome: StepOutcome) -> Self {
        Self {
            outcome,
            exported: Vec::new(),
            data: None,
        }
    }

    pub fn success() -> Self {
        Self::new(StepOutcome::Success)
    }

    /// A measured failure (retryable, no error to report).
    pub fn failed() -> Self {
        Self::new(StepOutcome::Failed)
    }

    /// Request a jump (only honored for GoTo kinds).
    pub fn goto_mark() -> Self {
        Self::new(StepOutcome::GoToMark)
    }

    pub fn with_export(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.exported.push(ExportedValue {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Everything an attempt may look at.
#[derive(Clone)]
pub struct ActionContext {
    /// Frozen cycle snapshot.
    pub cycle: Arc<CycleContext>,
    pub action: Arc<ActionDefinition>,
    /// Branch running the action.
    pub branch: u8,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Per-attempt token (child of the cycle scope).
    pub token: CancellationToken,
    /// Operator dialogs.
    pub prompt: PromptRef,
}

/// # Executable action.
///
/// Implementations must be shareable: the same behavior may run in several
/// cycles and for several inserted after-actions at once.
#[async_trait]
pub trait ActionBehavior: Send + Sync + 'static {
    /// Stable behavior name; also its catalog key.
    fn name(&self) -> &str;

    /// Runs one attempt.
    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError>;

    /// Called after an attempt exceeded its timeout.
    fn on_timeout(&self, _action: &ActionDefinition) {}

    /// Called when an alarm cancels the cycle while this action runs.
    fn on_alarm(&self, _action: &ActionDefinition) {}
}

/// Shared handle to a behavior.
pub type BehaviorRef = Arc<dyn ActionBehavior>;
