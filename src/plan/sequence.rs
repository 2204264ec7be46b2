//! # Index-stable action sequence of one branch.
//!
//! Actions live in an append-only arena and are addressed by [`ActionId`]. The
//! logical order is a separate list of ids that the executor rewrites when it
//! inserts after-actions or drops them on a backward jump. Dropped actions stay in
//! the arena with `removed = true`, so ids held by readers never dangle and the
//! final report still shows them.
//!
//! ```text
//! arena:  [A0][A1][A2][A3][A4*]        (* = removed)
//! order:   0   1   4→X  2   3           positions the cursor walks
//! ```
//!
//! ## Rules
//! - Only the owning executor mutates the sequence.
//! - Ids are never reused.
//! - A removed action is never part of `order`.

use std::sync::Arc;

use chrono::{DateTime, Local};

use super::behavior::BehaviorRef;
use super::definition::ActionDefinition;
use super::verdict::Verdict;
use crate::ports::DetailId;

/// Stable handle of an action inside one [`ActionSequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(usize);

impl ActionId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Mutable runtime state of an action.
#[derive(Debug, Clone, Default)]
pub struct ActionState {
    pub result: Verdict,
    /// Attempts of the last run (0 = never executed).
    pub attempts: u32,
    /// Jumps performed by this action (GoTo kinds and after-condition marks).
    pub goto_count: u32,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
    /// Id returned by persistence for the last stored record.
    pub detail_id: Option<DetailId>,
    pub removed: bool,
}

impl ActionState {
    /// Clears run data before a re-execution (backward jump).
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.goto_count = 0;
        self.started_at = None;
        self.finished_at = None;
    }

    /// Retries performed in the last run.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// One action of a branch: plan data, behavior and state.
#[derive(Clone)]
pub struct PlanAction {
    pub id: ActionId,
    pub def: Arc<ActionDefinition>,
    pub behavior: BehaviorRef,
    /// Set for inserted after-actions.
    pub parent: Option<ActionId>,
    pub state: ActionState,
}

impl PlanAction {
    #[inline]
    pub fn is_after_action(&self) -> bool {
        self.parent.is_some()
    }

    /// Result used for branch aggregation.
    pub fn calculated_result(&self) -> Verdict {
        if self.def.ignore_result {
            Verdict::Ok
        } else {
            self.state.result
        }
    }
}

impl std::fmt::Debug for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanAction")
            .field("id", &self.id)
            .field("name", &self.def.name)
            .field("step", &self.def.step)
            .field("parent", &self.parent)
            .field("state", &self.state)
            .finish()
    }
}

/// Arena plus logical order.
#[derive(Debug, Default, Clone)]
pub struct ActionSequence {
    arena: Vec<PlanAction>,
    order: Vec<ActionId>,
}

impl ActionSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a top-level action to the end of the order.
    pub fn push(&mut self, def: Arc<ActionDefinition>, behavior: BehaviorRef) -> ActionId {
        let id = self.alloc(def, behavior, None);
        self.order.push(id);
        id
    }

    /// Inserts an after-action of `parent` at logical position `pos`.
    pub fn insert_at(
        &mut self,
        pos: usize,
        def: Arc<ActionDefinition>,
        behavior: BehaviorRef,
        parent: ActionId,
    ) -> ActionId {
        let id = self.alloc(def, behavior, Some(parent));
        let pos = pos.min(self.order.len());
        self.order.insert(pos, id);
        id
    }

    /// Drops the action at `pos` from the order and marks it removed.
    pub fn remove_at(&mut self, pos: usize) -> Option<ActionId> {
        if pos >= self.order.len() {
            return None;
        }
        let id = self.order.remove(pos);
        self.arena[id.0].state.removed = true;
        Some(id)
    }

    fn alloc(
        &mut self,
        def: Arc<ActionDefinition>,
        behavior: BehaviorRef,
        parent: Option<ActionId>,
    ) -> ActionId {
        let id = ActionId(self.arena.len());
        self.arena.push(PlanAction {
            id,
            def,
            behavior,
            parent,
            state: ActionState::default(),
        });
        id
    }

    /// Number of live actions.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn id_at(&self, pos: usize) -> Option<ActionId> {
        self.order.get(pos).copied()
    }

    pub fn at(&self, pos: usize) -> Option<&PlanAction> {
        self.id_at(pos).map(|id| &self.arena[id.0])
    }

    pub fn at_mut(&mut self, pos: usize) -> Option<&mut PlanAction> {
        let id = self.id_at(pos)?;
        Some(&mut self.arena[id.0])
    }

    pub fn get(&self, id: ActionId) -> Option<&PlanAction> {
        self.arena.get(id.0)
    }

    pub fn get_mut(&mut self, id: ActionId) -> Option<&mut PlanAction> {
        self.arena.get_mut(id.0)
    }

    /// Live actions in logical order.
    pub fn iter(&self) -> impl Iterator<Item = &PlanAction> + '_ {
        self.order.iter().map(|id| &self.arena[id.0])
    }

    /// Every action ever allocated, removed ones included, in allocation order.
    pub fn iter_all(&self) -> impl Iterator<Item = &PlanAction> + '_ {
        self.arena.iter()
    }

    /// Position of the last live action carrying `mark`.
    pub fn find_last_mark(&self, mark: &str) -> Option<usize> {
        self.iter()
            .enumerate()
            .filter(|(_, a)| a.def.has_mark(mark))
            .map(|(pos, _)| pos)
            .last()
    }
}
