//! Per-machine settings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Settings a machine is constructed with.
///
/// Every field has a default, so partial documents deserialize:
///
/// ```rust
/// use statechart::runtime::MachineSettings;
///
/// let settings: MachineSettings =
///     serde_json::from_str(r#"{ "machine_id": "orders-1", "auto_startup": true }"#).unwrap();
/// assert_eq!(settings.machine_id, "orders-1");
/// assert_eq!(settings.max_completion_steps, 64);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineSettings {
    /// Identifier reported in contexts, snapshots and logs.
    pub machine_id: String,

    /// Start the machine as soon as it is constructed.
    pub auto_startup: bool,

    /// Upper bound on completion transitions chained after one event.
    pub max_completion_steps: usize,

    /// Upper bound on queued deferred events.
    pub max_deferred_events: usize,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            machine_id: Uuid::new_v4().to_string(),
            auto_startup: false,
            max_completion_steps: 64,
            max_deferred_events: 1024,
        }
    }
}

impl MachineSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_machine_id(mut self, machine_id: impl Into<String>) -> Self {
        self.machine_id = machine_id.into();
        self
    }

    pub fn with_auto_startup(mut self, auto_startup: bool) -> Self {
        self.auto_startup = auto_startup;
        self
    }

    pub fn with_max_completion_steps(mut self, steps: usize) -> Self {
        self.max_completion_steps = steps;
        self
    }

    pub fn with_max_deferred_events(mut self, events: usize) -> Self {
        self.max_deferred_events = events;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ids_are_unique() {
        assert_ne!(MachineSettings::default().machine_id, MachineSettings::default().machine_id);
    }

    #[test]
    fn builders_override_defaults() {
        let settings = MachineSettings::new()
            .with_machine_id("m")
            .with_auto_startup(true)
            .with_max_completion_steps(3)
            .with_max_deferred_events(2);

        assert_eq!(settings.machine_id, "m");
        assert!(settings.auto_startup);
        assert_eq!(settings.max_completion_steps, 3);
        assert_eq!(settings.max_deferred_events, 2);
    }
}
