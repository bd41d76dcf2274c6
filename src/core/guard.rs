//! Guard predicates for controlling state transitions.
//!
//! Guards are pure boolean functions over a [`StateContext`] that determine
//! whether a transition can fire. They must not mutate the extended state.

use super::context::StateContext;
use super::state::{Event, State};
use std::fmt;
use std::sync::Arc;

/// Pure predicate that determines if a transition can fire.
///
/// # Example
///
/// ```rust
/// use statechart::core::{ExtendedState, Guard, Stage, StateContext};
/// use statechart::{event_enum, state_enum};
/// use std::sync::Arc;
///
/// state_enum! { enum Light { Red, Green } }
/// event_enum! { enum Tick { Next } }
///
/// let ready = Guard::new(|ctx: &StateContext<Light, Tick>| {
///     ctx.extended_state().get::<bool>("ready").unwrap_or(false)
/// });
///
/// let extended = ExtendedState::new();
/// let ctx = StateContext::new(Stage::Transition, Arc::from("m"), extended.clone());
/// assert!(!ready.check(&ctx));
/// extended.set("ready", true).unwrap();
/// assert!(ready.check(&ctx));
/// ```
pub struct Guard<S: State, E: Event> {
    predicate: Arc<dyn Fn(&StateContext<S, E>) -> bool + Send + Sync>,
}

impl<S: State, E: Event> Guard<S, E> {
    /// Create a guard from a pure predicate function.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&StateContext<S, E>) -> bool + Send + Sync + 'static,
    {
        Guard {
            predicate: Arc::new(predicate),
        }
    }

    /// Guard that always passes.
    pub fn always() -> Self {
        Self::new(|_| true)
    }

    /// Guard that never passes.
    pub fn never() -> Self {
        Self::new(|_| false)
    }

    pub fn check(&self, context: &StateContext<S, E>) -> bool {
        (self.predicate)(context)
    }

    /// Logical negation of this guard.
    pub fn negate(self) -> Self {
        let inner = self.predicate;
        Self::new(move |ctx| !inner(ctx))
    }

    /// Both guards must pass; `other` is not evaluated when `self` fails.
    pub fn and(self, other: Guard<S, E>) -> Self {
        let (a, b) = (self.predicate, other.predicate);
        Self::new(move |ctx| a(ctx) && b(ctx))
    }

    /// Either guard passes; `other` is not evaluated when `self` passes.
    pub fn or(self, other: Guard<S, E>) -> Self {
        let (a, b) = (self.predicate, other.predicate);
        Self::new(move |ctx| a(ctx) || b(ctx))
    }
}

impl<S: State, E: Event> Clone for Guard<S, E> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<S: State, E: Event> fmt::Debug for Guard<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Guard")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExtendedState, Stage};
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
    enum TestState {
        Idle,
    }

    impl State for TestState {
        fn name(&self) -> &str {
            "Idle"
        }
    }

    #[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
    enum TestEvent {
        Go,
        Stop,
    }

    impl Event for TestEvent {
        fn name(&self) -> &str {
            match self {
                Self::Go => "Go",
                Self::Stop => "Stop",
            }
        }
    }

    fn context(extended: &ExtendedState) -> StateContext<TestState, TestEvent> {
        StateContext::new(Stage::Transition, Arc::from("test"), extended.clone())
    }

    #[test]
    fn guard_reads_extended_state() {
        let extended = ExtendedState::new();
        let guard = Guard::new(|ctx: &StateContext<TestState, TestEvent>| {
            ctx.extended_state().get::<i32>("n").unwrap_or(0) > 2
        });

        assert!(!guard.check(&context(&extended)));
        extended.set("n", 3).unwrap();
        assert!(guard.check(&context(&extended)));
    }

    #[test]
    fn combinators_compose() {
        let extended = ExtendedState::new();
        let ctx = context(&extended);

        assert!(Guard::always().and(Guard::always()).check(&ctx));
        assert!(!Guard::always().and(Guard::never()).check(&ctx));
        assert!(Guard::never().or(Guard::always()).check(&ctx));
        assert!(Guard::<TestState, TestEvent>::never().negate().check(&ctx));
    }

    #[test]
    fn guard_is_deterministic() {
        let extended = ExtendedState::new();
        extended.set("n", 1).unwrap();
        let guard = Guard::new(|ctx: &StateContext<TestState, TestEvent>| {
            ctx.extended_state().contains("n")
        });

        let ctx = context(&extended);
        assert_eq!(guard.check(&ctx), guard.check(&ctx));
    }

    #[test]
    fn clones_share_predicate() {
        let guard = Guard::<TestState, TestEvent>::never();
        let cloned = guard.clone();
        let extended = ExtendedState::new();
        assert_eq!(guard.check(&context(&extended)), cloned.check(&context(&extended)));
    }
}
