//! # GoTo resolution and sequence rewriting.
//!
//! ```text
//! GoTo kinds:        goto_action()          count jump ─► ceiling ─► resolve ─► go_to_index(ABORTED_BY_GOTO)
//! After-conditions:  after_condition_goto() budget ─► last mark ─► go_to_index(CONDITION_*_GOING_TO) ─► count jump
//!
//! go_to_index(new, current):
//!   forward   current < new : (current, new) exclusive   ─► BYPASSED
//!   backward  new < current : (new, current) exclusive   ─► after-actions removed
//!                                                        └► others reset + given verdict
//! ```
//!
//! ## Rules
//! - Mark lookup returns the **last** action carrying the mark; an empty mark never resolves.
//! - Step addressing is the 1-based position in the branch.
//! - GoTo ceiling: `max_retries == 0` allows one jump, otherwise jumping stops once
//!   the counter reaches `max_retries`.
//! - The after-condition budget is independent: it jumps while the counter is at
//!   most `goto_retries`.

use crate::plan::{ActionKind, ActionSequence, AfterConditions, GotoMode, Verdict};

/// Destination position for a GoTo or ConditionalGoTo kind.
pub(crate) fn resolve_target(seq: &ActionSequence, kind: &ActionKind) -> Option<usize> {
    match kind {
        ActionKind::GoTo { mode, mark, step } => match mode {
            GotoMode::Start => (!seq.is_empty()).then_some(0),
            GotoMode::Finish => seq.len().checked_sub(1),
            GotoMode::Step => step
                .checked_sub(1)
                .map(|p| p as usize)
                .filter(|p| *p < seq.len()),
            GotoMode::Mark => find_mark(seq, mark),
        },
        ActionKind::ConditionalGoTo { mark } => find_mark(seq, mark),
        _ => None,
    }
}

fn find_mark(seq: &ActionSequence, mark: &str) -> Option<usize> {
    if mark.is_empty() {
        return None;
    }
    seq.find_last_mark(mark)
}

/// Rewrites the states between `current` and `new` for a jump.
pub(crate) fn go_to_index(seq: &mut ActionSequence, new: usize, current: usize, back_verdict: Verdict) {
    if new > current {
        for pos in current + 1..new {
            if let Some(a) = seq.at_mut(pos) {
                a.state.result = Verdict::Bypassed;
            }
        }
    } else if new < current {
        for pos in (new + 1..current).rev() {
            let after = seq.at(pos).is_some_and(|a| a.is_after_action());
            if after {
                seq.remove_at(pos);
            } else if let Some(a) = seq.at_mut(pos) {
                a.state.reset();
                a.state.result = back_verdict;
            }
        }
    }
}

/// Jump of a GoTo/ConditionalGoTo action at `current`; `Some(new)` when it happened.
pub(crate) fn goto_action(seq: &mut ActionSequence, current: usize) -> Option<usize> {
    let action = seq.at_mut(current)?;
    action.state.goto_count += 1;
    let count = action.state.goto_count;
    let max = action.def.max_retries;
    let kind = action.def.kind.clone();

    let blocked = (max != 0 && count >= max) || (max == 0 && count > 1);
    if blocked {
        return None;
    }
    let new = resolve_target(seq, &kind)?;
    go_to_index(seq, new, current, Verdict::AbortedByGoto);
    Some(new)
}

/// Jump requested by the after-conditions of the action at `current`.
pub(crate) fn after_condition_goto(
    seq: &mut ActionSequence,
    current: usize,
    cond: &AfterConditions,
    ok: bool,
) -> Option<usize> {
    let id = seq.id_at(current)?;
    if seq.get(id)?.state.goto_count > cond.goto_retries {
        return None;
    }
    let new = find_mark(seq, &cond.goto_mark)?;
    let verdict = if ok {
        Verdict::ConditionOkGoingTo
    } else {
        Verdict::ConditionNokGoingTo
    };
    go_to_index(seq, new, current, verdict);
    if let Some(a) = seq.get_mut(id) {
        a.state.goto_count += 1;
    }
    Some(new)
}
