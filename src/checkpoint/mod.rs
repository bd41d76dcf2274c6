//! Snapshot, persist and restore functionality for state machines.
//!
//! A [`StateMachineContext`] captures the active configuration of a machine
//! between steps: the active state of every active region, history records,
//! the last event and the extended state. Contexts are encoded by an explicit
//! [`ContextSerializer`] and stored through a [`StateMachinePersist`].
//!
//! Restoring is validated against the graph: a context naming unknown
//! states, or placing states in the wrong regions, is rejected.

mod context;
pub mod error;
mod serializer;
mod store;

pub use context::{restore, snapshot, HistoryEntry, StateMachineContext};
pub use error::{CheckpointError, PersistError};
pub use serializer::{BincodeSerializer, ContextSerializer, Envelope, JsonSerializer};
pub use store::{
    InMemoryPersist, PersistingInterceptor, StateMachinePersist, StateMachinePersister,
};

/// Version identifier for checkpoint format
pub const CHECKPOINT_VERSION: u32 = 1;
