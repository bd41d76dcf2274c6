//! Checkpoint and persistence error types.

use crate::runtime::MachineError;
use thiserror::Error;

/// Errors raised while encoding, decoding or restoring a snapshot.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Serialization to JSON or binary format failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Deserialization from JSON or binary format failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Snapshot version is not supported by this version
    #[error("Unsupported checkpoint version {found}, supported: {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// A snapshot names a state the graph does not declare
    #[error("Snapshot references unknown state {0}")]
    UnknownState(String),

    /// A snapshot places a state in a region it does not belong to
    #[error("State {state} does not belong to region {region}")]
    RegionMismatch { state: String, region: String },

    /// A snapshot marks a pseudostate other than END as active
    #[error("State {0} cannot be active")]
    NotResting(String),

    /// Child contexts do not match the regions of their state
    #[error("State {state} has {expected} region(s) but the snapshot has {found}")]
    ChildCount {
        state: String,
        expected: usize,
        found: usize,
    },

    /// A child context without an active state
    #[error("Region {0} has no active state in the snapshot")]
    MissingState(String),

    /// A history entry keyed by something other than a history pseudostate
    #[error("State {0} is not a history pseudostate")]
    NotHistory(String),
}

/// Errors raised by persisters.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("No snapshot stored for {0}")]
    NotFound(String),

    #[error(transparent)]
    Machine(#[from] MachineError),

    #[error("Persist store failed: {0}")]
    Store(String),
}
