//! Actions run on entry, exit, while a state is active, and on transitions.

use super::context::StateContext;
use super::state::{Event, State};
use std::fmt;
use std::sync::Arc;

/// Side-effecting callback. May mutate the extended state.
///
/// An `Err` (or a panic) aborts the transition leg it runs in; the machine
/// rolls the active configuration back and reports `STATEMACHINE_ERROR`.
pub struct Action<S: State, E: Event> {
    name: Option<Arc<str>>,
    run: Arc<dyn Fn(&StateContext<S, E>) -> anyhow::Result<()> + Send + Sync>,
}

impl<S: State, E: Event> Action<S, E> {
    /// Create an action from a fallible function.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&StateContext<S, E>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Action {
            name: None,
            run: Arc::new(run),
        }
    }

    /// Create an action from a function that cannot fail.
    pub fn from_fn<F>(run: F) -> Self
    where
        F: Fn(&StateContext<S, E>) + Send + Sync + 'static,
    {
        Self::new(move |ctx| {
            run(ctx);
            Ok(())
        })
    }

    /// Attach a name used in logs and error messages.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Arc::from(name.into()));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn execute(&self, context: &StateContext<S, E>) -> anyhow::Result<()> {
        (self.run)(context)
    }
}

impl<S: State, E: Event> Clone for Action<S, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            run: Arc::clone(&self.run),
        }
    }
}

impl<S: State, E: Event> fmt::Debug for Action<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("name", &self.name).finish()
    }
}
