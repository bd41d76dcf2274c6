//! Event messages: a payload plus free-form headers.

use super::state::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Header map carried alongside an event.
pub type Headers = HashMap<String, Value>;

/// Header set on every message that went through a machine, naming it.
pub const MACHINE_ID_HEADER: &str = "statechart.machine_id";

/// An event submitted to a machine.
///
/// # Example
///
/// ```rust
/// use statechart::core::{Event, Message};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
/// enum Cmd { Go }
///
/// impl Event for Cmd {
///     fn name(&self) -> &str { "Go" }
/// }
///
/// let message = Message::new(Cmd::Go).with_header("attempt", 2);
/// assert_eq!(message.header("attempt"), Some(&serde_json::json!(2)));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Message<E: Event> {
    pub payload: E,
    #[serde(default)]
    pub headers: Headers,
}

impl<E: Event> Message<E> {
    pub fn new(payload: E) -> Self {
        Self {
            payload,
            headers: Headers::new(),
        }
    }

    /// Add a header, returning the message.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }
}

impl<E: Event> From<E> for Message<E> {
    fn from(payload: E) -> Self {
        Message::new(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
    enum TestEvent {
        Ping,
    }

    impl Event for TestEvent {
        fn name(&self) -> &str {
            "Ping"
        }
    }

    #[test]
    fn headers_are_attached() {
        let message = Message::new(TestEvent::Ping)
            .with_header("a", "x")
            .with_header("b", 3);
        assert_eq!(message.headers.len(), 2);
        assert_eq!(message.header("a"), Some(&Value::from("x")));
        assert!(message.header("missing").is_none());
    }

    #[test]
    fn payload_converts_into_message() {
        let message: Message<TestEvent> = TestEvent::Ping.into();
        assert_eq!(message.payload, TestEvent::Ping);
        assert!(message.headers.is_empty());
    }
}
