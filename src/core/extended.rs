//! Extended state: the shared variable store seen by guards and actions.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// A single mutation of the extended state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtendedStateChange {
    pub key: String,
    /// New value, `None` when the key was removed.
    pub value: Option<Value>,
}

type ChangeListener = Arc<dyn Fn(&ExtendedStateChange) + Send + Sync>;

#[derive(Default)]
struct Inner {
    variables: RwLock<HashMap<String, Value>>,
    listener: RwLock<Option<ChangeListener>>,
}

/// Shared key/value store with a single change-listener slot.
///
/// Cloning yields another handle to the same store. Last write wins; writes
/// are serialized by the owning machine's event loop.
///
/// # Example
///
/// ```rust
/// use statechart::core::ExtendedState;
///
/// let state = ExtendedState::new();
/// state.set("retries", 2u32).unwrap();
/// assert_eq!(state.get::<u32>("retries"), Some(2));
/// ```
#[derive(Clone, Default)]
pub struct ExtendedState {
    inner: Arc<Inner>,
}

impl ExtendedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `variables`, without notifying.
    pub fn from_variables(variables: HashMap<String, Value>) -> Self {
        let state = Self::new();
        *state.inner.variables.write() = variables;
        state
    }

    /// Typed read. Returns `None` when missing or not decodable as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_value(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.inner.variables.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.variables.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.variables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.variables.read().is_empty()
    }

    /// Typed write through serde.
    pub fn set<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value);
        Ok(())
    }

    pub fn set_value(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.inner
            .variables
            .write()
            .insert(key.clone(), value.clone());
        self.notify(ExtendedStateChange {
            key,
            value: Some(value),
        });
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.inner.variables.write().remove(key);
        if removed.is_some() {
            self.notify(ExtendedStateChange {
                key: key.to_string(),
                value: None,
            });
        }
        removed
    }

    /// Copy of every variable.
    pub fn variables(&self) -> HashMap<String, Value> {
        self.inner.variables.read().clone()
    }

    /// Swap in a whole new variable set without notifying. Used when a machine
    /// is reset from a snapshot.
    pub fn replace_all(&self, variables: HashMap<String, Value>) {
        *self.inner.variables.write() = variables;
    }

    /// Install the change listener, replacing any previous one.
    pub fn set_change_listener<F>(&self, listener: F)
    where
        F: Fn(&ExtendedStateChange) + Send + Sync + 'static,
    {
        *self.inner.listener.write() = Some(Arc::new(listener));
    }

    pub fn clear_change_listener(&self) {
        *self.inner.listener.write() = None;
    }

    /// Non-owning handle, for listeners that must not keep the store alive.
    pub fn downgrade(&self) -> WeakExtendedState {
        WeakExtendedState {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // The listener runs after the variables lock is released so it may read
    // the store.
    fn notify(&self, change: ExtendedStateChange) {
        let listener = self.inner.listener.read().clone();
        if let Some(listener) = listener {
            listener(&change);
        }
    }
}

/// Weak counterpart of [`ExtendedState`].
#[derive(Clone)]
pub struct WeakExtendedState {
    inner: Weak<Inner>,
}

impl WeakExtendedState {
    pub fn upgrade(&self) -> Option<ExtendedState> {
        self.inner.upgrade().map(|inner| ExtendedState { inner })
    }
}

impl fmt::Debug for ExtendedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedState")
            .field("variables", &*self.inner.variables.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn typed_round_trip() {
        let state = ExtendedState::new();
        state.set("name", "door").unwrap();
        state.set("count", 3i64).unwrap();

        assert_eq!(state.get::<String>("name").as_deref(), Some("door"));
        assert_eq!(state.get::<i64>("count"), Some(3));
        assert_eq!(state.get::<i64>("name"), None);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn clones_share_storage() {
        let a = ExtendedState::new();
        let b = a.clone();
        a.set("k", true).unwrap();
        assert_eq!(b.get::<bool>("k"), Some(true));
    }

    #[test]
    fn listener_sees_sets_and_removes() {
        let state = ExtendedState::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        state.set_change_listener(move |change| sink.lock().push(change.clone()));

        state.set("x", 1).unwrap();
        state.remove("x");
        state.remove("never-set");

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].value, Some(Value::from(1)));
        assert_eq!(seen[1].value, None);
    }

    #[test]
    fn listener_may_read_the_store() {
        let state = ExtendedState::new();
        let reader = state.clone();
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        state.set_change_listener(move |change| {
            *sink.lock() = reader.get_value(&change.key);
        });

        state.set("x", "y").unwrap();
        assert_eq!(*observed.lock(), Some(Value::from("y")));
    }

    #[test]
    fn weak_handle_does_not_keep_store_alive() {
        let state = ExtendedState::new();
        let weak = state.downgrade();
        assert!(weak.upgrade().is_some());
        drop(state);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn replace_all_does_not_notify() {
        let state = ExtendedState::new();
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        state.set_change_listener(move |_| *sink.lock() += 1);

        let mut vars = HashMap::new();
        vars.insert("a".to_string(), Value::from(1));
        state.replace_all(vars);

        assert_eq!(*count.lock(), 0);
        assert!(state.contains("a"));
    }
}
