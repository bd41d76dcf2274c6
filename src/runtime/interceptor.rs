//! Hooks that can veto or observe event processing.

use crate::checkpoint::StateMachineContext;
use crate::core::{Event, Message, State, StateContext};
use crate::runtime::error::MachineError;

/// Synchronous hooks called while the machine lock is held.
///
/// Unlike listeners, interceptors take part in processing: `pre_event` and
/// `pre_transition` can veto, and an `Err` from `pre_state_change` rolls the
/// leg back. Interceptors run in registration order; the first veto wins.
pub trait Interceptor<S: State, E: Event>: Send + Sync {
    /// Return `false` to reject the event without resolving it.
    fn pre_event(&self, _message: &Message<E>) -> bool {
        true
    }

    /// Return `false` to skip this transition leg.
    fn pre_transition(&self, _context: &StateContext<S, E>) -> bool {
        true
    }

    /// Called with the configuration a leg is about to commit.
    fn pre_state_change(
        &self,
        _context: &StateContext<S, E>,
        _proposed: &StateMachineContext<S, E>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_state_change(&self, _context: &StateContext<S, E>) {}

    fn post_transition(&self, _context: &StateContext<S, E>) {}

    fn state_machine_error(&self, _error: &MachineError) {}
}
