//! Transition definitions inside a built graph.

use super::NodeId;
use crate::core::{Action, Event, Guard, State};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a transition treats the states between its source and target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    /// Exits the source and enters the target, including a shared composite
    /// owner when source or target is that owner.
    External,
    /// Runs actions only; nothing is exited or entered.
    Internal,
    /// Like external, but does not exit/re-enter a composite source (or
    /// target) that contains the other end.
    Local,
    /// The implicit transition out of a region's initial pseudostate.
    Initial,
}

/// Index of a transition inside its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionId(pub(crate) usize);

impl TransitionId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A transition between two nodes of the graph.
///
/// `event == None` marks a completion transition: it is taken without a
/// trigger, which is how pseudostates chain into each other.
pub struct TransitionDef<S: State, E: Event> {
    pub(crate) id: TransitionId,
    pub(crate) name: Option<String>,
    pub(crate) source: NodeId,
    pub(crate) target: Option<NodeId>,
    pub(crate) event: Option<E>,
    pub(crate) guard: Option<Guard<S, E>>,
    pub(crate) actions: Vec<Action<S, E>>,
    pub(crate) error_action: Option<Action<S, E>>,
    pub(crate) kind: TransitionKind,
}

impl<S: State, E: Event> TransitionDef<S, E> {
    pub fn id(&self) -> TransitionId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    /// Target node; `None` only for internal transitions.
    pub fn target(&self) -> Option<NodeId> {
        self.target
    }

    pub fn event(&self) -> Option<&E> {
        self.event.as_ref()
    }

    pub fn guard(&self) -> Option<&Guard<S, E>> {
        self.guard.as_ref()
    }

    pub fn actions(&self) -> &[Action<S, E>] {
        &self.actions
    }

    pub fn error_action(&self) -> Option<&Action<S, E>> {
        self.error_action.as_ref()
    }

    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    pub fn is_completion(&self) -> bool {
        self.event.is_none()
    }

    /// Whether this transition is triggered by `event` (`None` = completion).
    pub fn matches(&self, event: Option<&E>) -> bool {
        self.event.as_ref() == event
    }
}

impl<S: State, E: Event> fmt::Debug for TransitionDef<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionDef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("source", &self.source)
            .field("target", &self.target)
            .field("event", &self.event)
            .field("guarded", &self.guard.is_some())
            .field("actions", &self.actions.len())
            .field("kind", &self.kind)
            .finish()
    }
}
