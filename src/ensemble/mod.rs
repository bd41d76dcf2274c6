//! Sharing one machine's configuration between several instances.
//!
//! An [`Ensemble`] holds the latest [`StateMachineContext`] of a group of
//! members and pushes changes to them. A [`DistributedStateMachine`] wraps a
//! local machine: after one of its own events fires it publishes a snapshot,
//! and when another member publishes it resets to the delivered context.
//!
//! Replication and versioning are entirely the ensemble's business.
//! [`LocalEnsemble`] is an in-process implementation.

use crate::checkpoint::StateMachineContext;
use crate::core::{Event, Message, State, StateContext};
use crate::runtime::{contain, EventResult, Listener, StateMachine};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header naming the ensemble member that submitted an event.
pub const ENSEMBLE_MEMBER_HEADER: &str = "statechart.ensemble.member";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnsembleError {
    #[error("member {0} is already part of the ensemble")]
    AlreadyJoined(String),

    #[error("member {0} is not part of the ensemble")]
    NotJoined(String),

    #[error("ensemble rejected state: {0}")]
    Rejected(String),
}

/// Push notifications from an ensemble.
pub trait EnsembleListener<S: State, E: Event>: Send + Sync {
    /// `member` joined; `context` is the ensemble's current state, if any.
    fn joined(&self, _member: &str, _context: Option<&StateMachineContext<S, E>>) {}

    fn left(&self, _member: &str) {}

    fn state_changed(&self, _context: &StateMachineContext<S, E>) {}

    fn error(&self, _error: &EnsembleError) {}
}

/// A group of machines sharing one configuration.
pub trait Ensemble<S: State, E: Event>: Send + Sync {
    fn join(&self, member: &str) -> Result<(), EnsembleError>;

    fn leave(&self, member: &str) -> Result<(), EnsembleError>;

    fn add_listener(&self, listener: Arc<dyn EnsembleListener<S, E>>);

    fn remove_listener(&self, listener: &Arc<dyn EnsembleListener<S, E>>) -> bool;

    /// Publish a new shared state.
    fn set_state(&self, context: StateMachineContext<S, E>) -> Result<(), EnsembleError>;

    /// Latest shared state.
    fn state(&self) -> Option<StateMachineContext<S, E>>;
}

/// In-process ensemble: a shared last context fanned out to listeners.
pub struct LocalEnsemble<S: State, E: Event> {
    members: RwLock<Vec<String>>,
    listeners: RwLock<Vec<Arc<dyn EnsembleListener<S, E>>>>,
    state: RwLock<Option<StateMachineContext<S, E>>>,
    version: AtomicU64,
}

impl<S: State, E: Event> Default for LocalEnsemble<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State, E: Event> LocalEnsemble<S, E> {
    pub fn new() -> Self {
        Self {
            members: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            state: RwLock::new(None),
            version: AtomicU64::new(0),
        }
    }

    pub fn members(&self) -> Vec<String> {
        self.members.read().clone()
    }

    /// Number of states published so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn each_listener(&self, call: impl Fn(&dyn EnsembleListener<S, E>)) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if let Err(panic) = contain(|| call(listener.as_ref())) {
                error!(panic = %panic, "ensemble listener panicked");
            }
        }
    }
}

impl<S: State, E: Event> Ensemble<S, E> for LocalEnsemble<S, E> {
    fn join(&self, member: &str) -> Result<(), EnsembleError> {
        {
            let mut members = self.members.write();
            if members.iter().any(|m| m == member) {
                return Err(EnsembleError::AlreadyJoined(member.to_string()));
            }
            members.push(member.to_string());
        }
        debug!(member, "member joined ensemble");
        let state = self.state.read().clone();
        self.each_listener(|l| l.joined(member, state.as_ref()));
        Ok(())
    }

    fn leave(&self, member: &str) -> Result<(), EnsembleError> {
        {
            let mut members = self.members.write();
            let before = members.len();
            members.retain(|m| m != member);
            if members.len() == before {
                return Err(EnsembleError::NotJoined(member.to_string()));
            }
        }
        debug!(member, "member left ensemble");
        self.each_listener(|l| l.left(member));
        Ok(())
    }

    fn add_listener(&self, listener: Arc<dyn EnsembleListener<S, E>>) {
        self.listeners.write().push(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn EnsembleListener<S, E>>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    fn set_state(&self, context: StateMachineContext<S, E>) -> Result<(), EnsembleError> {
        *self.state.write() = Some(context.clone());
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(version, states = ?context.active_states(), "ensemble state published");
        self.each_listener(|l| l.state_changed(&context));
        Ok(())
    }

    fn state(&self) -> Option<StateMachineContext<S, E>> {
        self.state.read().clone()
    }
}

/// Marks that one of this member's own events completed a transition.
struct OwnTransitions {
    member: Value,
    dirty: Arc<AtomicBool>,
}

impl<S: State, E: Event> Listener<S, E> for OwnTransitions {
    fn transition_end(&self, context: &StateContext<S, E>) {
        if context.header(ENSEMBLE_MEMBER_HEADER) == Some(&self.member) {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }
}

/// Applies ensemble notifications to the local machine.
struct Relay<S: State, E: Event> {
    member: String,
    machine: Weak<StateMachine<S, E>>,
}

impl<S: State, E: Event> Relay<S, E> {
    fn is_own(&self, context: &StateMachineContext<S, E>) -> bool {
        context
            .event_headers
            .get(ENSEMBLE_MEMBER_HEADER)
            .and_then(Value::as_str)
            == Some(self.member.as_str())
    }
}

impl<S: State, E: Event> EnsembleListener<S, E> for Relay<S, E> {
    fn joined(&self, member: &str, context: Option<&StateMachineContext<S, E>>) {
        if member != self.member {
            return;
        }
        let Some(machine) = self.machine.upgrade() else {
            return;
        };
        let result = machine
            .stop()
            .and_then(|_| machine.reset(context))
            .and_then(|_| machine.start());
        match result {
            Ok(()) => info!(member, machine_id = machine.id(), "joined ensemble"),
            Err(e) => error!(member, machine_id = machine.id(), error = %e, "failed to adopt ensemble state"),
        }
    }

    fn left(&self, member: &str) {
        if member != self.member {
            return;
        }
        if let Some(machine) = self.machine.upgrade() {
            if let Err(e) = machine.stop() {
                error!(member, error = %e, "failed to stop machine after leaving ensemble");
            }
        }
    }

    fn state_changed(&self, context: &StateMachineContext<S, E>) {
        if self.is_own(context) {
            return;
        }
        let Some(machine) = self.machine.upgrade() else {
            return;
        };
        match machine.reset(Some(context)) {
            Ok(()) => debug!(
                member = %self.member,
                states = ?context.active_states(),
                "adopted ensemble state"
            ),
            Err(e) => error!(member = %self.member, error = %e, "failed to adopt ensemble state"),
        }
    }

    fn error(&self, error: &EnsembleError) {
        warn!(member = %self.member, error = %error, "ensemble error");
    }
}

/// A local machine kept in step with an [`Ensemble`].
///
/// Events must be sent through this wrapper to be replicated: each is tagged
/// with the member id and, once it completed a transition and the machine
/// lock was released, the new snapshot is published.
pub struct DistributedStateMachine<S: State, E: Event> {
    member: String,
    machine: Arc<StateMachine<S, E>>,
    ensemble: Arc<dyn Ensemble<S, E>>,
    dirty: Arc<AtomicBool>,
    tracker: Arc<dyn Listener<S, E>>,
    relay: Arc<dyn EnsembleListener<S, E>>,
}

impl<S: State, E: Event> DistributedStateMachine<S, E> {
    pub fn new(machine: Arc<StateMachine<S, E>>, ensemble: Arc<dyn Ensemble<S, E>>) -> Self {
        let member = Uuid::new_v4().to_string();
        let dirty = Arc::new(AtomicBool::new(false));

        let tracker: Arc<dyn Listener<S, E>> = Arc::new(OwnTransitions {
            member: Value::String(member.clone()),
            dirty: dirty.clone(),
        });
        machine.add_listener(tracker.clone());

        let relay: Arc<dyn EnsembleListener<S, E>> = Arc::new(Relay {
            member: member.clone(),
            machine: Arc::downgrade(&machine),
        });
        ensemble.add_listener(relay.clone());

        Self {
            member,
            machine,
            ensemble,
            dirty,
            tracker,
            relay,
        }
    }

    pub fn member_id(&self) -> &str {
        &self.member
    }

    pub fn machine(&self) -> &Arc<StateMachine<S, E>> {
        &self.machine
    }

    /// Join the ensemble; the machine restarts from the shared state.
    pub fn join(&self) -> Result<(), EnsembleError> {
        self.ensemble.join(&self.member)
    }

    /// Leave the ensemble; the machine stops.
    pub fn leave(&self) -> Result<(), EnsembleError> {
        self.ensemble.leave(&self.member)
    }

    pub fn send_event(&self, message: impl Into<Message<E>>) -> bool {
        self.send_event_collect(message).is_accepted()
    }

    pub fn send_event_collect(&self, message: impl Into<Message<E>>) -> EventResult<S> {
        let message = message
            .into()
            .with_header(ENSEMBLE_MEMBER_HEADER, self.member.clone());
        let result = self.machine.send_event_collect(message);
        self.publish();
        result
    }

    fn publish(&self) {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.ensemble.set_state(self.machine.snapshot()) {
            warn!(member = %self.member, error = %e, "failed to publish state to ensemble");
            self.relay.error(&e);
        }
    }
}

impl<S: State, E: Event> Drop for DistributedStateMachine<S, E> {
    fn drop(&mut self) {
        self.machine.remove_listener(&self.tracker);
        self.ensemble.remove_listener(&self.relay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{on_event, RegionBuilder, StateGraphBuilder};
    use crate::graph::StateGraph;
    use crate::runtime::{Lifecycle, MachineSettings};
    use crate::{event_enum, state_enum};

    state_enum! {
        enum S { Red, Green }
    }

    event_enum! {
        enum E { Go, Stop }
    }

    fn graph() -> Arc<StateGraph<S, E>> {
        Arc::new(
            StateGraphBuilder::new()
                .region(RegionBuilder::top().initial(S::Red).state(S::Red).state(S::Green))
                .transition(on_event(S::Red, S::Green, E::Go))
                .transition(on_event(S::Green, S::Red, E::Stop))
                .build()
                .unwrap(),
        )
    }

    fn member(
        graph: &Arc<StateGraph<S, E>>,
        ensemble: &Arc<LocalEnsemble<S, E>>,
    ) -> DistributedStateMachine<S, E> {
        let machine = Arc::new(StateMachine::new(graph.clone(), MachineSettings::default()));
        DistributedStateMachine::new(machine, ensemble.clone())
    }

    #[test]
    fn joining_starts_the_machine() {
        let graph = graph();
        let ensemble = Arc::new(LocalEnsemble::new());
        let a = member(&graph, &ensemble);
        a.join().unwrap();

        assert_eq!(a.machine().lifecycle(), Lifecycle::Running);
        assert_eq!(a.machine().state(), Some(S::Red));
        assert_eq!(ensemble.members(), vec![a.member_id().to_string()]);
        assert_eq!(a.join(), Err(EnsembleError::AlreadyJoined(a.member_id().to_string())));
    }

    #[test]
    fn transitions_replicate_to_other_members() {
        let graph = graph();
        let ensemble = Arc::new(LocalEnsemble::new());
        let a = member(&graph, &ensemble);
        let b = member(&graph, &ensemble);
        a.join().unwrap();
        b.join().unwrap();

        assert!(a.send_event(E::Go));
        assert_eq!(ensemble.version(), 1);
        assert_eq!(b.machine().state(), Some(S::Green));

        assert!(b.send_event(E::Stop));
        assert_eq!(ensemble.version(), 2);
        assert_eq!(a.machine().state(), Some(S::Red));
    }

    #[test]
    fn late_joiner_adopts_shared_state() {
        let graph = graph();
        let ensemble = Arc::new(LocalEnsemble::new());
        let a = member(&graph, &ensemble);
        a.join().unwrap();
        a.send_event(E::Go);

        let c = member(&graph, &ensemble);
        c.join().unwrap();
        assert_eq!(c.machine().state(), Some(S::Green));
        assert!(c.machine().is_running());
    }

    #[test]
    fn rejected_events_publish_nothing() {
        let graph = graph();
        let ensemble = Arc::new(LocalEnsemble::new());
        let a = member(&graph, &ensemble);
        a.join().unwrap();

        assert!(!a.send_event(E::Stop));
        assert_eq!(ensemble.version(), 0);
    }

    #[test]
    fn leaving_stops_the_machine() {
        let graph = graph();
        let ensemble = Arc::new(LocalEnsemble::new());
        let a = member(&graph, &ensemble);
        a.join().unwrap();
        a.leave().unwrap();
        assert_eq!(a.machine().lifecycle(), Lifecycle::Stopped);
        assert!(ensemble.members().is_empty());
    }
}
