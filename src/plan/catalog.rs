//! # Behavior resolution.
//!
//! Plan data names behaviors by key; [`BehaviorCatalog`] maps keys to shared
//! [`BehaviorRef`]s. Control kinds do not need a catalog entry:
//!
//! ```text
//! ActionKind::Normal           ─► catalog[behavior_key]
//! ActionKind::ConditionalGoTo  ─► catalog[behavior_key]
//! ActionKind::GoTo             ─► GotoBehavior      (always GoToMark)
//! ActionKind::PromptUser       ─► PromptBehavior    (Prompt collaborator)
//! ActionKind::Abort            ─► ControlBehavior   (never executed)
//! ActionKind::Rendezvous       ─► ControlBehavior   (never executed)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::error::ActionError;
use crate::ports::PromptRequest;

use super::behavior::{ActionBehavior, ActionContext, ActionOutput, BehaviorRef};
use super::definition::{ActionDefinition, ActionKind};

/// Source of behaviors for normal and conditional actions.
pub trait ActionCatalog: Send + Sync + 'static {
    fn resolve(&self, def: &ActionDefinition) -> Option<BehaviorRef>;
}

/// Map-backed catalog keyed by [`ActionBehavior::name`].
#[derive(Default, Clone)]
pub struct BehaviorCatalog {
    behaviors: HashMap<String, BehaviorRef>,
}

impl BehaviorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a behavior under its own name.
    pub fn register(&mut self, behavior: BehaviorRef) -> &mut Self {
        self.behaviors.insert(behavior.name().to_string(), behavior);
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, behavior: BehaviorRef) -> Self {
        self.register(behavior);
        self
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}

impl ActionCatalog for BehaviorCatalog {
    fn resolve(&self, def: &ActionDefinition) -> Option<BehaviorRef> {
        self.behaviors.get(def.behavior_key()).cloned()
    }
}

static GOTO: Lazy<BehaviorRef> = Lazy::new(|| Arc::new(GotoBehavior));
static PROMPT: Lazy<BehaviorRef> = Lazy::new(|| Arc::new(PromptBehavior));
static CONTROL: Lazy<BehaviorRef> = Lazy::new(|| Arc::new(ControlBehavior));

/// Picks the behavior for `def`; `None` when the catalog has no entry.
pub fn resolve_behavior(catalog: &dyn ActionCatalog, def: &ActionDefinition) -> Option<BehaviorRef> {
    match def.kind {
        ActionKind::GoTo { .. } => Some(Arc::clone(&GOTO)),
        ActionKind::PromptUser { .. } => Some(Arc::clone(&PROMPT)),
        ActionKind::Abort | ActionKind::Rendezvous { .. } => Some(Arc::clone(&CONTROL)),
        ActionKind::Normal | ActionKind::ConditionalGoTo { .. } => catalog.resolve(def),
    }
}

/// Unconditional jump request.
struct GotoBehavior;

#[async_trait]
impl ActionBehavior for GotoBehavior {
    fn name(&self) -> &str {
        "goto"
    }

    async fn execute(&self, _ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        Ok(ActionOutput::goto_mark())
    }
}

/// Shows the action's message and waits for the operator.
struct PromptBehavior;

#[async_trait]
impl ActionBehavior for PromptBehavior {
    fn name(&self) -> &str {
        "prompt-user"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        let ActionKind::PromptUser { message } = &ctx.action.kind else {
            return Err(ActionError::fatal("prompt behavior bound to a non-prompt action"));
        };
        let request = PromptRequest {
            station_id: ctx.cycle.station_id,
            slot_id: ctx.cycle.slot_id,
            title: ctx.action.name.clone(),
            message: message.clone(),
        };
        let response = tokio::select! {
            r = ctx.prompt.prompt_user(request) => r,
            _ = ctx.token.cancelled() => return Err(ActionError::Canceled),
        };
        match response {
            Ok(r) if r.accepted => Ok(ActionOutput::success().with_export("response", r.text)),
            Ok(r) => Ok(ActionOutput::failed().with_export("response", r.text)),
            Err(e) => Err(ActionError::fail(e.to_string())),
        }
    }
}

/// Placeholder for kinds the executor handles itself.
struct ControlBehavior;

#[async_trait]
impl ActionBehavior for ControlBehavior {
    fn name(&self) -> &str {
        "control"
    }

    async fn execute(&self, _ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        Ok(ActionOutput::success())
    }
}
