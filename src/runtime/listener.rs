//! Observers of machine lifecycle stages.

use crate::core::{Event, Stage, State, StateContext};
use crate::runtime::error::contain;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error};

/// Receives one callback per [`Stage`]. Every method defaults to a no-op, so
/// an observer only implements the stages it cares about.
///
/// A panicking listener is logged and skipped; it never affects the machine
/// or the listeners registered after it.
pub trait Listener<S: State, E: Event>: Send + Sync {
    fn event_not_accepted(&self, _context: &StateContext<S, E>) {}
    fn extended_state_changed(&self, _context: &StateContext<S, E>) {}
    fn state_changed(&self, _context: &StateContext<S, E>) {}
    fn state_entry(&self, _context: &StateContext<S, E>) {}
    fn state_exit(&self, _context: &StateContext<S, E>) {}
    fn state_machine_error(&self, _context: &StateContext<S, E>) {}
    fn state_machine_start(&self, _context: &StateContext<S, E>) {}
    fn state_machine_stop(&self, _context: &StateContext<S, E>) {}
    fn transition(&self, _context: &StateContext<S, E>) {}
    fn transition_start(&self, _context: &StateContext<S, E>) {}
    fn transition_end(&self, _context: &StateContext<S, E>) {}

    /// Dispatch a context to the method for its stage.
    fn notify(&self, context: &StateContext<S, E>) {
        match context.stage() {
            Stage::EventNotAccepted => self.event_not_accepted(context),
            Stage::ExtendedStateChanged => self.extended_state_changed(context),
            Stage::StateChanged => self.state_changed(context),
            Stage::StateEntry => self.state_entry(context),
            Stage::StateExit => self.state_exit(context),
            Stage::StateMachineError => self.state_machine_error(context),
            Stage::StateMachineStart => self.state_machine_start(context),
            Stage::StateMachineStop => self.state_machine_stop(context),
            Stage::Transition => self.transition(context),
            Stage::TransitionStart => self.transition_start(context),
            Stage::TransitionEnd => self.transition_end(context),
        }
    }
}

/// A listener built from a closure receiving every stage.
///
/// # Example
///
/// ```rust
/// use statechart::core::{Stage, StateContext};
/// use statechart::runtime::FnListener;
/// use statechart::{event_enum, state_enum};
/// use std::sync::{Arc, Mutex};
///
/// state_enum! { enum Door { Open, Closed } }
/// event_enum! { enum Cmd { Close } }
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// let listener = FnListener::new(move |ctx: &StateContext<Door, Cmd>| {
///     sink.lock().unwrap().push(ctx.stage());
/// });
/// # let _ = listener;
/// ```
pub struct FnListener<F> {
    callback: F,
}

impl<F> FnListener<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<S, E, F> Listener<S, E> for FnListener<F>
where
    S: State,
    E: Event,
    F: Fn(&StateContext<S, E>) + Send + Sync,
{
    fn notify(&self, context: &StateContext<S, E>) {
        (self.callback)(context)
    }
}

/// Logs every stage at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingListener;

impl<S: State, E: Event> Listener<S, E> for LoggingListener {
    fn notify(&self, context: &StateContext<S, E>) {
        debug!(
            machine_id = context.machine_id(),
            stage = %context.stage(),
            event = ?context.event().map(|e| e.name()),
            source = ?context.source().map(|s| s.name()),
            target = ?context.target().map(|s| s.name()),
            "state machine notification"
        );
    }
}

/// Ordered fan-out of notifications to registered listeners.
pub struct ListenerBus<S: State, E: Event> {
    listeners: RwLock<Vec<Arc<dyn Listener<S, E>>>>,
}

impl<S: State, E: Event> Default for ListenerBus<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State, E: Event> ListenerBus<S, E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<dyn Listener<S, E>>) {
        self.listeners.write().push(listener);
    }

    /// Remove a listener previously added, compared by pointer.
    pub fn remove(&self, listener: &Arc<dyn Listener<S, E>>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver `context` to every listener in registration order.
    ///
    /// The list is copied first, so listeners may add or remove listeners
    /// while being notified.
    pub fn notify(&self, context: &StateContext<S, E>) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if let Err(panic) = contain(|| listener.notify(context)) {
                error!(
                    panic = %panic,
                    stage = %context.stage(),
                    machine_id = context.machine_id(),
                    "listener panicked"
                );
            }
        }
    }
}
