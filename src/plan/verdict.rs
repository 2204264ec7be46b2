//! # Verdicts and step outcomes.
//!
//! Two separate enums describe what happened to an action:
//!
//! - [`StepOutcome`] drives the executor's retry/continue decision for one attempt.
//! - [`Verdict`] is the persisted, user-facing state of an action or a whole cycle.
//!
//! ```text
//! attempt ──► StepOutcome ──► Verdict (after retries, negate/ignore applied)
//!   Success          ──► OK
//!   GoToMark         ──► OK
//!   Failed           ──► NOK
//!   FailedTimeout    ──► NOK
//!   Exception        ──► NOK   (branch stops)
//!   OperationCanceled──► EMERGENCY_ABORT (branch stops)
//! ```

use serde::{Deserialize, Serialize};

/// Persisted result of an action or a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Ok,
    /// Initial value of every action until an attempt proves otherwise.
    #[default]
    Nok,
    Retrying,
    Bypassed,
    Aborted,
    AbortedByGoto,
    EmergencyAbort,
    DeviceIdentificationError,
    InvalidTestplan,
    Degraded,
    ConditionOkGoingTo,
    ConditionNokGoingTo,
}

impl Verdict {
    /// Verdicts that, once set on a cycle, are never replaced by the branch aggregate.
    #[inline]
    pub fn is_sticky(self) -> bool {
        matches!(self, Verdict::Aborted | Verdict::EmergencyAbort)
    }

    /// Counts as OK when aggregating a branch.
    #[inline]
    pub fn counts_as_ok(self) -> bool {
        matches!(self, Verdict::Ok | Verdict::Bypassed)
    }

    /// Swaps OK and NOK; every other verdict is returned unchanged.
    #[inline]
    pub fn negated(self) -> Self {
        match self {
            Verdict::Ok => Verdict::Nok,
            Verdict::Nok => Verdict::Ok,
            other => other,
        }
    }

    /// Returns a short stable label (SCREAMING_SNAKE_CASE) matching the serialized form.
    pub fn as_label(self) -> &'static str {
        match self {
            Verdict::Ok => "OK",
            Verdict::Nok => "NOK",
            Verdict::Retrying => "RETRYING",
            Verdict::Bypassed => "BYPASSED",
            Verdict::Aborted => "ABORTED",
            Verdict::AbortedByGoto => "ABORTED_BY_GOTO",
            Verdict::EmergencyAbort => "EMERGENCY_ABORT",
            Verdict::DeviceIdentificationError => "DEVICE_IDENTIFICATION_ERROR",
            Verdict::InvalidTestplan => "INVALID_TESTPLAN",
            Verdict::Degraded => "DEGRADED",
            Verdict::ConditionOkGoingTo => "CONDITION_OK_GOING_TO",
            Verdict::ConditionNokGoingTo => "CONDITION_NOK_GOING_TO",
        }
    }

    /// Compact numeric code used to store a verdict in an atomic.
    pub(crate) fn code(self) -> u8 {
        match self {
            Verdict::Ok => 1,
            Verdict::Nok => 2,
            Verdict::Retrying => 3,
            Verdict::Bypassed => 4,
            Verdict::Aborted => 5,
            Verdict::AbortedByGoto => 6,
            Verdict::EmergencyAbort => 7,
            Verdict::DeviceIdentificationError => 8,
            Verdict::InvalidTestplan => 9,
            Verdict::Degraded => 10,
            Verdict::ConditionOkGoingTo => 11,
            Verdict::ConditionNokGoingTo => 12,
        }
    }

    /// Inverse of [`Verdict::code`]; `0` and unknown codes map to `None`.
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Verdict::Ok,
            2 => Verdict::Nok,
            3 => Verdict::Retrying,
            4 => Verdict::Bypassed,
            5 => Verdict::Aborted,
            6 => Verdict::AbortedByGoto,
            7 => Verdict::EmergencyAbort,
            8 => Verdict::DeviceIdentificationError,
            9 => Verdict::InvalidTestplan,
            10 => Verdict::Degraded,
            11 => Verdict::ConditionOkGoingTo,
            12 => Verdict::ConditionNokGoingTo,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepOutcome {
    Success,
    Failed,
    FailedTimeout,
    GoToMark,
    Exception,
    OperationCanceled,
}

impl StepOutcome {
    /// Outcomes that end the retry loop on their own.
    #[inline]
    pub fn is_final(self) -> bool {
        matches!(self, StepOutcome::Success | StepOutcome::GoToMark)
    }

    /// Verdict an action receives when this is its last outcome.
    pub fn verdict(self) -> Verdict {
        match self {
            StepOutcome::Success | StepOutcome::GoToMark => Verdict::Ok,
            StepOutcome::Failed | StepOutcome::FailedTimeout | StepOutcome::Exception => {
                Verdict::Nok
            }
            StepOutcome::OperationCanceled => Verdict::EmergencyAbort,
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            StepOutcome::Success => "success",
            StepOutcome::Failed => "failed",
            StepOutcome::FailedTimeout => "failed_timeout",
            StepOutcome::GoToMark => "goto_mark",
            StepOutcome::Exception => "exception",
            StepOutcome::OperationCanceled => "operation_canceled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip_covers_every_variant() {
        let all = [
            Verdict::Ok,
            Verdict::Nok,
            Verdict::Retrying,
            Verdict::Bypassed,
            Verdict::Aborted,
            Verdict::AbortedByGoto,
            Verdict::EmergencyAbort,
            Verdict::DeviceIdentificationError,
            Verdict::InvalidTestplan,
            Verdict::Degraded,
            Verdict::ConditionOkGoingTo,
            Verdict::ConditionNokGoingTo,
        ];
        for v in all {
            assert_eq!(Verdict::from_code(v.code()), Some(v));
        }
        assert_eq!(Verdict::from_code(0), None);
    }

    #[test]
    fn test_serialized_form_matches_label() {
        let json = serde_json::to_string(&Verdict::ConditionNokGoingTo).unwrap();
        assert_eq!(json, "\"CONDITION_NOK_GOING_TO\"");
        let back: Verdict = serde_json::from_str("\"EMERGENCY_ABORT\"").unwrap();
        assert_eq!(back, Verdict::EmergencyAbort);
    }

    #[test]
    fn test_negation_only_touches_ok_and_nok() {
        assert_eq!(Verdict::Ok.negated(), Verdict::Nok);
        assert_eq!(Verdict::Nok.negated(), Verdict::Ok);
        assert_eq!(Verdict::Bypassed.negated(), Verdict::Bypassed);
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(StepOutcome::FailedTimeout.verdict(), Verdict::Nok);
        assert_eq!(StepOutcome::OperationCanceled.verdict(), Verdict::EmergencyAbort);
        assert!(StepOutcome::GoToMark.is_final());
        assert!(!StepOutcome::Exception.is_final());
    }
}
