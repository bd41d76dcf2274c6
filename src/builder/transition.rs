//! Builder for event-triggered and completion transitions.

use crate::builder::error::BuildError;
use crate::core::{Action, Event, Guard, State, StateContext};
use crate::graph::TransitionKind;

/// Builder for a transition between two states with a fluent API.
///
/// Leaving out `.event(..)` declares a completion transition, taken as soon
/// as its source is active (or, for a composite source, once every region of
/// the source rests in an END state).
///
/// # Example
///
/// ```
/// use statechart::builder::TransitionBuilder;
/// use statechart::{event_enum, state_enum};
///
/// state_enum! { enum Door { Open, Closed } }
/// event_enum! { enum Push { Close } }
///
/// let close: TransitionBuilder<Door, Push> = TransitionBuilder::external()
///     .source(Door::Open)
///     .target(Door::Closed)
///     .event(Push::Close)
///     .when(|ctx| !ctx.extended_state().get::<bool>("blocked").unwrap_or(false));
/// ```
pub struct TransitionBuilder<S: State, E: Event> {
    pub(crate) kind: TransitionKind,
    pub(crate) name: Option<String>,
    pub(crate) source: Option<S>,
    pub(crate) target: Option<S>,
    pub(crate) event: Option<E>,
    pub(crate) guard: Option<Guard<S, E>>,
    pub(crate) actions: Vec<Action<S, E>>,
    pub(crate) error_action: Option<Action<S, E>>,
}

/// Fields of a transition that passed the builder's own checks.
pub(crate) struct TransitionParts<S: State, E: Event> {
    pub kind: TransitionKind,
    pub name: Option<String>,
    pub source: S,
    pub target: Option<S>,
    pub event: Option<E>,
    pub guard: Option<Guard<S, E>>,
    pub actions: Vec<Action<S, E>>,
    pub error_action: Option<Action<S, E>>,
}

impl<S: State, E: Event> TransitionBuilder<S, E> {
    fn with_kind(kind: TransitionKind) -> Self {
        Self {
            kind,
            name: None,
            source: None,
            target: None,
            event: None,
            guard: None,
            actions: Vec::new(),
            error_action: None,
        }
    }

    /// External transition: exits up to the common region and re-enters.
    pub fn external() -> Self {
        Self::with_kind(TransitionKind::External)
    }

    /// Internal transition: runs its actions, exits and enters nothing.
    pub fn internal() -> Self {
        Self::with_kind(TransitionKind::Internal)
    }

    /// Local transition: does not exit a composite source containing the target.
    pub fn local() -> Self {
        Self::with_kind(TransitionKind::Local)
    }

    /// Set the source state (required).
    pub fn source(mut self, state: S) -> Self {
        self.source = Some(state);
        self
    }

    /// Set the target state (required unless internal).
    pub fn target(mut self, state: S) -> Self {
        self.target = Some(state);
        self
    }

    /// Set the triggering event. Without one this is a completion transition.
    pub fn event(mut self, event: E) -> Self {
        self.event = Some(event);
        self
    }

    /// Add a guard predicate (optional).
    pub fn guard(mut self, guard: Guard<S, E>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Add a guard using a closure (optional).
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&StateContext<S, E>) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Guard::new(predicate));
        self
    }

    /// Append an action, run after exits and before entries.
    pub fn action(mut self, action: Action<S, E>) -> Self {
        self.actions.push(action);
        self
    }

    /// Action run with the failure attached when one of the actions fails.
    pub fn error_action(mut self, action: Action<S, E>) -> Self {
        self.error_action = Some(action);
        self
    }

    /// Name used in notifications and logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn into_parts(self) -> Result<TransitionParts<S, E>, BuildError> {
        let source = self.source.ok_or(BuildError::MissingSource)?;
        let target = match self.kind {
            TransitionKind::Internal => self.target,
            _ => Some(self.target.ok_or(BuildError::MissingTarget)?),
        };

        Ok(TransitionParts {
            kind: self.kind,
            name: self.name,
            source,
            target,
            event: self.event,
            guard: self.guard,
            actions: self.actions,
            error_action: self.error_action,
        })
    }
}

impl<S: State, E: Event> Default for TransitionBuilder<S, E> {
    fn default() -> Self {
        Self::external()
    }
}
