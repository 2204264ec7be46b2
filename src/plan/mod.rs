//! # Plan model.
//!
//! This module provides the data and behavior types of a test plan:
//! - [`ActionDefinition`] - plan data of one step (deserializable)
//! - [`ActionKind`] - closed set of action variants
//! - [`ActionBehavior`] - polymorphic execute capability, [`ActionFn`] closure adapter
//! - [`BehaviorCatalog`] - behavior lookup by key
//! - [`ActionSequence`] - index-stable arena of one branch's actions
//! - [`CycleContext`] - identity and variables of one cycle
//! - [`Verdict`], [`StepOutcome`] - persisted result and per-attempt outcome

mod behavior;
mod behavior_fn;
mod catalog;
mod context;
mod definition;
mod sequence;
mod verdict;

pub use behavior::{ActionBehavior, ActionContext, ActionOutput, BehaviorRef, ExportedValue};
pub use behavior_fn::ActionFn;
pub use catalog::{ActionCatalog, BehaviorCatalog, resolve_behavior};
pub use context::CycleContext;
pub use definition::{ActionDefinition, ActionKind, AfterConditions, GotoMode, GroupMembership};
pub use sequence::{ActionId, ActionSequence, ActionState, PlanAction};
pub use verdict::{StepOutcome, Verdict};
