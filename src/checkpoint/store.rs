//! Persisting snapshots under a caller-chosen token.

use super::context::StateMachineContext;
use super::error::PersistError;
use super::serializer::ContextSerializer;
use crate::core::{Event, State, StateContext};
use crate::runtime::{Interceptor, StateMachine};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use tracing::{debug, info};

/// Storage for snapshots, addressed by a token of type `T`.
pub trait StateMachinePersist<S: State, E: Event, T>: Send + Sync {
    fn write(&self, context: &StateMachineContext<S, E>, token: &T) -> Result<(), PersistError>;

    /// `Ok(None)` when nothing is stored under `token`.
    fn read(&self, token: &T) -> Result<Option<StateMachineContext<S, E>>, PersistError>;
}

/// Keeps encoded snapshots in memory.
pub struct InMemoryPersist<Ser, T> {
    serializer: Ser,
    entries: RwLock<HashMap<T, Vec<u8>>>,
}

impl<Ser: ContextSerializer, T: Eq + Hash> InMemoryPersist<Ser, T> {
    pub fn new(serializer: Ser) -> Self {
        Self {
            serializer,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Encoded bytes stored under `token`.
    pub fn raw(&self, token: &T) -> Option<Vec<u8>> {
        self.entries.read().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<S, E, Ser, T> StateMachinePersist<S, E, T> for InMemoryPersist<Ser, T>
where
    S: State,
    E: Event,
    Ser: ContextSerializer,
    T: Eq + Hash + Clone + Send + Sync,
{
    fn write(&self, context: &StateMachineContext<S, E>, token: &T) -> Result<(), PersistError> {
        let bytes = self.serializer.serialize(context)?;
        self.entries.write().insert(token.clone(), bytes);
        Ok(())
    }

    fn read(&self, token: &T) -> Result<Option<StateMachineContext<S, E>>, PersistError> {
        let bytes = self.entries.read().get(token).cloned();
        match bytes {
            Some(bytes) => Ok(Some(self.serializer.deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Saves machines to, and restores them from, a [`StateMachinePersist`].
///
/// # Example
///
/// ```rust
/// use statechart::builder::{on_event, RegionBuilder, StateGraphBuilder};
/// use statechart::checkpoint::{InMemoryPersist, JsonSerializer, StateMachinePersister};
/// use statechart::runtime::{MachineSettings, StateMachine};
/// use statechart::{event_enum, state_enum};
/// use std::sync::Arc;
///
/// state_enum! { enum Door { Open, Closed } }
/// event_enum! { enum Cmd { Close } }
///
/// let graph = Arc::new(
///     StateGraphBuilder::new()
///         .region(RegionBuilder::top().initial(Door::Open).state(Door::Open).state(Door::Closed))
///         .transition(on_event(Door::Open, Door::Closed, Cmd::Close))
///         .build()
///         .unwrap(),
/// );
/// let persister = StateMachinePersister::new(InMemoryPersist::new(JsonSerializer::new()));
///
/// let first = StateMachine::new(graph.clone(), MachineSettings::default());
/// first.start().unwrap();
/// first.send_event(Cmd::Close);
/// persister.persist(&first, &"door-1").unwrap();
///
/// let second = StateMachine::new(graph, MachineSettings::default());
/// persister.restore(&second, &"door-1").unwrap();
/// second.start().unwrap();
/// assert_eq!(second.state(), Some(Door::Closed));
/// ```
pub struct StateMachinePersister<P, T> {
    persist: P,
    _token: PhantomData<fn(&T)>,
}

impl<P, T: Debug> StateMachinePersister<P, T> {
    pub fn new(persist: P) -> Self {
        Self {
            persist,
            _token: PhantomData,
        }
    }

    pub fn inner(&self) -> &P {
        &self.persist
    }

    /// Write the machine's current snapshot under `token`.
    pub fn persist<S, E>(&self, machine: &StateMachine<S, E>, token: &T) -> Result<(), PersistError>
    where
        S: State,
        E: Event,
        P: StateMachinePersist<S, E, T>,
    {
        self.persist.write(&machine.snapshot(), token)?;
        debug!(machine_id = machine.id(), token = ?token, "machine persisted");
        Ok(())
    }

    /// Read the snapshot stored under `token` and reset the machine to it.
    pub fn restore<S, E>(&self, machine: &StateMachine<S, E>, token: &T) -> Result<(), PersistError>
    where
        S: State,
        E: Event,
        P: StateMachinePersist<S, E, T>,
    {
        let context = self
            .persist
            .read(token)?
            .ok_or_else(|| PersistError::NotFound(format!("{token:?}")))?;
        machine.reset(Some(&context))?;
        info!(machine_id = machine.id(), token = ?token, "machine restored");
        Ok(())
    }
}

/// Writes every proposed configuration before it is committed. A failed
/// write rolls the transition back.
pub struct PersistingInterceptor<P, T> {
    persist: P,
    token: T,
}

impl<P, T> PersistingInterceptor<P, T> {
    pub fn new(persist: P, token: T) -> Self {
        Self { persist, token }
    }
}

impl<S, E, P, T> Interceptor<S, E> for PersistingInterceptor<P, T>
where
    S: State,
    E: Event,
    P: StateMachinePersist<S, E, T>,
    T: Send + Sync,
{
    fn pre_state_change(
        &self,
        _context: &StateContext<S, E>,
        proposed: &StateMachineContext<S, E>,
    ) -> anyhow::Result<()> {
        self.persist.write(proposed, &self.token)?;
        Ok(())
    }
}

impl<S, E, T, P> StateMachinePersist<S, E, T> for std::sync::Arc<P>
where
    S: State,
    E: Event,
    P: StateMachinePersist<S, E, T> + ?Sized,
{
    fn write(&self, context: &StateMachineContext<S, E>, token: &T) -> Result<(), PersistError> {
        (**self).write(context, token)
    }

    fn read(&self, token: &T) -> Result<Option<StateMachineContext<S, E>>, PersistError> {
        (**self).read(token)
    }
}
