//! Encoding snapshots to bytes.
//!
//! Serializers are plain values owned by whoever persists snapshots; there
//! is no process-wide serializer state.

use super::context::StateMachineContext;
use super::error::CheckpointError;
use super::CHECKPOINT_VERSION;
use crate::core::{Event, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Versioned wrapper written around every snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Envelope<S: State, E: Event> {
    /// Format version, always the first field
    pub version: u32,

    /// When the snapshot was encoded
    pub taken_at: DateTime<Utc>,

    pub context: StateMachineContext<S, E>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

fn check_version(found: u32) -> Result<(), CheckpointError> {
    if found == CHECKPOINT_VERSION {
        Ok(())
    } else {
        Err(CheckpointError::UnsupportedVersion {
            found,
            supported: CHECKPOINT_VERSION,
        })
    }
}

/// Turns snapshots into bytes and back.
pub trait ContextSerializer: Send + Sync {
    fn serialize<S: State, E: Event>(
        &self,
        context: &StateMachineContext<S, E>,
    ) -> Result<Vec<u8>, CheckpointError>;

    fn deserialize<S: State, E: Event>(
        &self,
        bytes: &[u8],
    ) -> Result<StateMachineContext<S, E>, CheckpointError>;
}

/// Human readable JSON snapshots.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl ContextSerializer for JsonSerializer {
    fn serialize<S: State, E: Event>(
        &self,
        context: &StateMachineContext<S, E>,
    ) -> Result<Vec<u8>, CheckpointError> {
        let envelope = Envelope {
            version: CHECKPOINT_VERSION,
            taken_at: Utc::now(),
            context: context.clone(),
        };
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(&envelope)
        } else {
            serde_json::to_vec(&envelope)
        };
        encoded.map_err(|e| CheckpointError::SerializationFailed(e.to_string()))
    }

    fn deserialize<S: State, E: Event>(
        &self,
        bytes: &[u8],
    ) -> Result<StateMachineContext<S, E>, CheckpointError> {
        let probe: VersionProbe = serde_json::from_slice(bytes)
            .map_err(|e| CheckpointError::DeserializationFailed(e.to_string()))?;
        check_version(probe.version)?;

        let envelope: Envelope<S, E> = serde_json::from_slice(bytes)
            .map_err(|e| CheckpointError::DeserializationFailed(e.to_string()))?;
        Ok(envelope.context)
    }
}

/// Compact binary snapshots.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeSerializer;

impl BincodeSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl ContextSerializer for BincodeSerializer {
    fn serialize<S: State, E: Event>(
        &self,
        context: &StateMachineContext<S, E>,
    ) -> Result<Vec<u8>, CheckpointError> {
        let envelope = Envelope {
            version: CHECKPOINT_VERSION,
            taken_at: Utc::now(),
            context: context.clone(),
        };
        bincode::serialize(&envelope)
            .map_err(|e| CheckpointError::SerializationFailed(e.to_string()))
    }

    fn deserialize<S: State, E: Event>(
        &self,
        bytes: &[u8],
    ) -> Result<StateMachineContext<S, E>, CheckpointError> {
        // The version is the leading u32 of the envelope.
        let version: u32 = bincode::deserialize(bytes)
            .map_err(|e| CheckpointError::DeserializationFailed(e.to_string()))?;
        check_version(version)?;

        let envelope: Envelope<S, E> = bincode::deserialize(bytes)
            .map_err(|e| CheckpointError::DeserializationFailed(e.to_string()))?;
        Ok(envelope.context)
    }
}
