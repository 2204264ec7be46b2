//! # Function-backed behavior (`ActionFn`)
//!
//! [`ActionFn`] wraps a closure `F: Fn(ActionContext) -> Fut`, producing a fresh
//! future per attempt. Shared state between attempts must be explicit (`Arc<...>`
//! captured by the closure).
//!
//! ## Example
//! ```rust
//! use stationvisor::{ActionBehavior, ActionContext, ActionError, ActionFn, ActionOutput, BehaviorRef};
//!
//! let b: BehaviorRef = ActionFn::arc("noop", |_ctx: ActionContext| async move {
//!     Ok::<_, ActionError>(ActionOutput::success())
//! });
//! assert_eq!(b.name(), "noop");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ActionError;

use super::behavior::{ActionBehavior, ActionContext, ActionOutput};

/// Function-backed behavior.
#[derive(Debug)]
pub struct ActionFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ActionFn<F> {
    /// Creates a new function-backed behavior.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the behavior and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> ActionBehavior for ActionFn<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ActionOutput, ActionError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        (self.f)(ctx).await
    }
}
