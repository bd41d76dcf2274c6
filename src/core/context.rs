//! The value handed to guards, actions and listeners.

use super::extended::{ExtendedState, ExtendedStateChange};
use super::message::{Headers, Message};
use super::state::{Event, State};
use crate::graph::TransitionKind;
use crate::runtime::MachineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle point a [`StateContext`] is emitted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    EventNotAccepted,
    ExtendedStateChanged,
    StateChanged,
    StateEntry,
    StateExit,
    StateMachineError,
    StateMachineStart,
    StateMachineStop,
    Transition,
    TransitionStart,
    TransitionEnd,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventNotAccepted => "EVENT_NOT_ACCEPTED",
            Self::ExtendedStateChanged => "EXTENDED_STATE_CHANGED",
            Self::StateChanged => "STATE_CHANGED",
            Self::StateEntry => "STATE_ENTRY",
            Self::StateExit => "STATE_EXIT",
            Self::StateMachineError => "STATEMACHINE_ERROR",
            Self::StateMachineStart => "STATEMACHINE_START",
            Self::StateMachineStop => "STATEMACHINE_STOP",
            Self::Transition => "TRANSITION",
            Self::TransitionStart => "TRANSITION_START",
            Self::TransitionEnd => "TRANSITION_END",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation flag handed to state actions.
///
/// The flag is raised when the state that started the action is exited.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Description of the transition a context belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionInfo<S: State> {
    pub name: Option<String>,
    pub source: Option<S>,
    pub target: Option<S>,
    pub kind: TransitionKind,
}

/// Everything a guard, action or listener can observe about one step.
///
/// For `StateEntry` the entered state is the `target`; for `StateExit` the
/// exited state is the `source`.
#[derive(Clone)]
pub struct StateContext<S: State, E: Event> {
    stage: Stage,
    machine_id: Arc<str>,
    message: Option<Message<E>>,
    transition: Option<TransitionInfo<S>>,
    source: Option<S>,
    target: Option<S>,
    extended_state: ExtendedState,
    error: Option<Arc<MachineError>>,
    change: Option<ExtendedStateChange>,
    cancellation: Option<CancellationToken>,
}

impl<S: State, E: Event> StateContext<S, E> {
    pub fn new(stage: Stage, machine_id: Arc<str>, extended_state: ExtendedState) -> Self {
        Self {
            stage,
            machine_id,
            message: None,
            transition: None,
            source: None,
            target: None,
            extended_state,
            error: None,
            change: None,
            cancellation: None,
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_message(mut self, message: Option<Message<E>>) -> Self {
        self.message = message;
        self
    }

    pub fn with_transition(mut self, transition: TransitionInfo<S>) -> Self {
        self.transition = Some(transition);
        self
    }

    pub fn with_source(mut self, source: Option<S>) -> Self {
        self.source = source;
        self
    }

    pub fn with_target(mut self, target: Option<S>) -> Self {
        self.target = target;
        self
    }

    pub fn with_error(mut self, error: Arc<MachineError>) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_change(mut self, change: ExtendedStateChange) -> Self {
        self.change = Some(change);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn message(&self) -> Option<&Message<E>> {
        self.message.as_ref()
    }

    /// Triggering event, `None` for completion and initial transitions.
    pub fn event(&self) -> Option<&E> {
        self.message.as_ref().map(|m| &m.payload)
    }

    pub fn headers(&self) -> Option<&Headers> {
        self.message.as_ref().map(|m| &m.headers)
    }

    pub fn header(&self, key: &str) -> Option<&Value> {
        self.message.as_ref().and_then(|m| m.header(key))
    }

    pub fn transition(&self) -> Option<&TransitionInfo<S>> {
        self.transition.as_ref()
    }

    pub fn source(&self) -> Option<&S> {
        self.source.as_ref()
    }

    pub fn target(&self) -> Option<&S> {
        self.target.as_ref()
    }

    pub fn extended_state(&self) -> &ExtendedState {
        &self.extended_state
    }

    pub fn error(&self) -> Option<&MachineError> {
        self.error.as_deref()
    }

    pub fn change(&self) -> Option<&ExtendedStateChange> {
        self.change.as_ref()
    }

    /// Cancellation flag of the state action being run, if any.
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }
}

impl<S: State, E: Event> fmt::Debug for StateContext<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateContext")
            .field("stage", &self.stage)
            .field("machine_id", &self.machine_id)
            .field("event", &self.event())
            .field("source", &self.source)
            .field("target", &self.target)
            .field("error", &self.error)
            .finish()
    }
}
