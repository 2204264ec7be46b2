//! Error types used by the station runtime, action behaviors, the alarm engine
//! and external collaborators.
//!
//! This module defines four error enums:
//!
//! - [`RuntimeError`]: errors raised by the orchestration runtime itself.
//! - [`ActionError`]: errors raised by individual action behaviors.
//! - [`AlarmError`]: configuration errors of the alarm code layout.
//! - [`ExternalError`]: failures reported by injected collaborators.
//!
//! All types provide helper methods (`as_label`, `as_message`) for logging/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the station runtime.
///
/// These represent failures of the orchestration system itself: structural
/// problems (double start, busy slot) and shutdown sequences exceeding their grace.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some cycles remained stuck and had to be force-terminated.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Slots whose cycles did not shut down in time.
        stuck: Vec<String>,
    },

    /// Another cycle is already registered for the slot.
    #[error("slot {slot} is busy with another cycle")]
    SlotBusy {
        /// Slot identifier.
        slot: u16,
    },

    /// The orchestrator was already started once.
    #[error("cycle for slot {slot} was already started")]
    CycleAlreadyStarted {
        /// Slot identifier.
        slot: u16,
    },

    /// The cycle's cancellation scope was cancelled before start.
    #[error("cycle for slot {slot} is already cancelled")]
    CycleCancelled {
        /// Slot identifier.
        slot: u16,
    },

    /// The alarm engine loop is already running.
    #[error("alarm engine is already running")]
    AlarmEngineRunning,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use stationvisor::RuntimeError;
    ///
    /// let err = RuntimeError::SlotBusy { slot: 3 };
    /// assert_eq!(err.as_label(), "runtime_slot_busy");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::SlotBusy { .. } => "runtime_slot_busy",
            RuntimeError::CycleAlreadyStarted { .. } => "runtime_cycle_already_started",
            RuntimeError::CycleCancelled { .. } => "runtime_cycle_cancelled",
            RuntimeError::AlarmEngineRunning => "runtime_alarm_engine_running",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::GraceExceeded { grace, stuck } => {
                format!("grace exceeded after {grace:?}; stuck slots={stuck:?}")
            }
            RuntimeError::SlotBusy { slot } => format!("slot {slot} busy"),
            RuntimeError::CycleAlreadyStarted { slot } => {
                format!("slot {slot}: cycle already started")
            }
            RuntimeError::CycleCancelled { slot } => format!("slot {slot}: cycle cancelled"),
            RuntimeError::AlarmEngineRunning => "alarm engine running".to_string(),
        }
    }
}

/// # Errors produced by action execution.
///
/// Returned by [`ActionBehavior::execute`](crate::ActionBehavior::execute).
/// `Fail` and `Timeout` are ordinary failures that feed the retry loop,
/// `Fatal` stops the branch once retries are spent.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ActionError {
    /// Action execution exceeded its timeout duration.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Unexpected failure inside the action (stops the branch).
    #[error("fatal error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Action failed but may succeed if retried.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Action observed cancellation of the cycle scope.
    #[error("operation cancelled")]
    Canceled,
}

impl ActionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use stationvisor::ActionError;
    /// use std::time::Duration;
    ///
    /// let err = ActionError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "action_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ActionError::Timeout { .. } => "action_timeout",
            ActionError::Fatal { .. } => "action_fatal",
            ActionError::Fail { .. } => "action_failed",
            ActionError::Canceled => "action_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ActionError::Timeout { timeout } => format!("timeout: {timeout:?}"),
            ActionError::Fatal { error } => format!("fatal: {error}"),
            ActionError::Fail { error } => format!("error: {error}"),
            ActionError::Canceled => "operation cancelled".to_string(),
        }
    }

    /// Shorthand for a retryable failure.
    pub fn fail(error: impl Into<String>) -> Self {
        ActionError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for a fatal failure.
    pub fn fatal(error: impl Into<String>) -> Self {
        ActionError::Fatal {
            error: error.into(),
        }
    }
}

/// # Alarm layout errors.
///
/// Configuration problems: fatal to the specific lookup, never to the alarm loop.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlarmError {
    /// Block is not part of the configured block list.
    #[error("alarm block {block} is not configured")]
    BlockNotFound {
        /// Block identifier.
        block: u32,
    },

    /// Bit index is outside the block's declared width.
    #[error("bit {bit} out of range for block {block} ({width} bits)")]
    BitOutOfRange {
        /// Block identifier.
        block: u32,
        /// Requested bit index.
        bit: usize,
        /// Declared bit width (`size * 8`).
        width: usize,
    },

    /// Alarm code does not map to any configured bit.
    #[error("alarm code {code} is outside the configured layout")]
    CodeOutOfRange {
        /// Alarm code.
        code: u32,
    },
}

impl AlarmError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            AlarmError::BlockNotFound { .. } => "alarm_block_not_found",
            AlarmError::BitOutOfRange { .. } => "alarm_bit_out_of_range",
            AlarmError::CodeOutOfRange { .. } => "alarm_code_out_of_range",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            AlarmError::BlockNotFound { block } => format!("block {block} not found"),
            AlarmError::BitOutOfRange { block, bit, width } => {
                format!("block {block}: bit {bit} >= width {width}")
            }
            AlarmError::CodeOutOfRange { code } => format!("code {code} out of range"),
        }
    }
}

/// # Errors reported by external collaborators.
///
/// PLC drivers, persistence, telemetry, prompt and export backends return this type.
/// The runtime logs them and continues with a fallback.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ExternalError {
    /// Backend temporarily unreachable.
    #[error("{service} unavailable: {reason}")]
    Unavailable {
        /// Collaborator name.
        service: &'static str,
        /// Failure description.
        reason: String,
    },

    /// Backend refused the request.
    #[error("{service} rejected request: {reason}")]
    Rejected {
        /// Collaborator name.
        service: &'static str,
        /// Failure description.
        reason: String,
    },

    /// Requested item does not exist.
    #[error("{service}: {what} not found")]
    NotFound {
        /// Collaborator name.
        service: &'static str,
        /// What was looked up.
        what: String,
    },
}

impl ExternalError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExternalError::Unavailable { .. } => "external_unavailable",
            ExternalError::Rejected { .. } => "external_rejected",
            ExternalError::NotFound { .. } => "external_not_found",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        assert_eq!(
            RuntimeError::CycleAlreadyStarted { slot: 1 }.as_label(),
            "runtime_cycle_already_started"
        );
        assert_eq!(ActionError::fatal("x").as_label(), "action_fatal");
        assert_eq!(
            AlarmError::BlockNotFound { block: 9 }.as_label(),
            "alarm_block_not_found"
        );
    }

    #[test]
    fn test_messages_carry_details() {
        let err = AlarmError::BitOutOfRange {
            block: 7,
            bit: 16,
            width: 16,
        };
        assert_eq!(err.as_message(), "block 7: bit 16 >= width 16");

        let err = ExternalError::Unavailable {
            service: "plc",
            reason: "timeout".into(),
        };
        assert_eq!(err.as_message(), "plc unavailable: timeout");
    }
}
