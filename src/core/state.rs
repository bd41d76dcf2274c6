//! Identifier traits for states and events.
//!
//! States and events are plain values supplied by the user. The engine only
//! needs to compare, hash, clone, log and persist them, which is what these
//! traits require.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;

/// Identifier of a state or pseudostate in a state graph.
///
/// # Required Traits
///
/// - `Eq` + `Hash`: ids index the graph
/// - `Debug`: ids appear in diagnostics and log fields
/// - `Serialize` + `DeserializeOwned`: ids are written into snapshots
///
/// # Example
///
/// ```rust
/// use statechart::core::State;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
/// enum Door {
///     Open,
///     Closed,
/// }
///
/// impl State for Door {
///     fn name(&self) -> &str {
///         match self {
///             Self::Open => "Open",
///             Self::Closed => "Closed",
///         }
///     }
/// }
///
/// assert_eq!(Door::Open.name(), "Open");
/// ```
pub trait State:
    Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Get the state's name for display/logging.
    fn name(&self) -> &str;
}

/// Identifier of a triggering event.
///
/// Events are compared by equality against the `event` of each transition.
pub trait Event:
    Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Get the event's name for display/logging.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
    enum TestState {
        Idle,
        Running { worker: u8 },
    }

    impl State for TestState {
        fn name(&self) -> &str {
            match self {
                Self::Idle => "Idle",
                Self::Running { .. } => "Running",
            }
        }
    }

    #[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
    enum TestEvent {
        Go,
    }

    impl Event for TestEvent {
        fn name(&self) -> &str {
            "Go"
        }
    }

    #[test]
    fn state_name_returns_correct_value() {
        assert_eq!(TestState::Idle.name(), "Idle");
        assert_eq!(TestState::Running { worker: 3 }.name(), "Running");
        assert_eq!(TestEvent::Go.name(), "Go");
    }

    #[test]
    fn data_carrying_states_are_distinct_ids() {
        let a = TestState::Running { worker: 1 };
        let b = TestState::Running { worker: 2 };
        assert_ne!(a, b);
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn state_serializes_correctly() {
        let state = TestState::Running { worker: 7 };
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: TestState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
