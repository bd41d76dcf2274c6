//! Core value types shared by the graph, the runtime and listeners.
//!
//! - State and event identifiers via the `State` and `Event` traits
//! - Guard predicates and actions over a `StateContext`
//! - The shared `ExtendedState` store
//! - History records kept for composite states
//!
//! Nothing in this module holds machine-level locks.

mod action;
mod context;
mod extended;
mod guard;
mod history;
mod message;
mod state;

pub use action::Action;
pub use context::{CancellationToken, Stage, StateContext, TransitionInfo};
pub use extended::{ExtendedState, ExtendedStateChange, WeakExtendedState};
pub use guard::Guard;
pub use history::{HistoryRecord, HistoryRecords};
pub use message::{Headers, Message, MACHINE_ID_HEADER};
pub use state::{Event, State};
