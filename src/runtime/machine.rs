//! The running state machine: lifecycle, event loop and queries.

use crate::checkpoint::{restore, snapshot, StateMachineContext};
use crate::core::{
    CancellationToken, Event, ExtendedState, Message, Stage, State, StateContext,
    MACHINE_ID_HEADER,
};
use crate::graph::{NodeId, StateGraph};
use crate::runtime::config::ActiveConfiguration;
use crate::runtime::error::{contain, MachineError};
use crate::runtime::executor::{Executor, LegOutcome};
use crate::runtime::interceptor::Interceptor;
use crate::runtime::join::JoinTracker;
use crate::runtime::listener::{Listener, ListenerBus};
use crate::runtime::resolver::{transition_label, Leg, Resolution, Resolver};
use crate::runtime::settings::MachineSettings;
use parking_lot::{FairMutex, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Machine lifecycle.
///
/// `Created → Started → Running → Stopped`. `Started` only lasts while the
/// initial configuration is being entered. A stopped machine keeps its
/// configuration for inspection and runs again only after [`StateMachine::reset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    Created,
    Started,
    Running,
    Stopped,
}

/// How an event was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventOutcome {
    /// At least one transition fired.
    Accepted,
    /// No transition matched, or the machine was not running.
    NotAccepted,
    /// An active state deferred the event; it is queued.
    Deferred,
    /// Submitted from inside the machine's own callbacks; it runs once the
    /// current event is done.
    Queued,
    /// Resolution or every fired leg failed; see `last_error`.
    Failed,
}

/// Result of one submitted event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct EventResult<S: State> {
    pub machine_id: String,
    pub outcome: EventOutcome,
    /// Sources of the transitions that fired, in firing order.
    pub fired: Vec<S>,
}

impl<S: State> EventResult<S> {
    fn new(machine_id: &str, outcome: EventOutcome) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            outcome,
            fired: Vec::new(),
        }
    }

    /// `true` unless the event was rejected or failed.
    pub fn is_accepted(&self) -> bool {
        matches!(
            self.outcome,
            EventOutcome::Accepted | EventOutcome::Deferred | EventOutcome::Queued
        )
    }
}

/// Future of an event submitted with [`StateMachine::send_event_async`].
pub struct EventHandle<S: State> {
    machine_id: String,
    receiver: oneshot::Receiver<EventResult<S>>,
}

impl<S: State> Future for EventHandle<S> {
    type Output = EventResult<S>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let machine_id = self.machine_id.clone();
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| EventResult::new(&machine_id, EventOutcome::NotAccepted))
        })
    }
}

struct Submission<S: State, E: Event> {
    message: Message<E>,
    reply: Option<oneshot::Sender<EventResult<S>>>,
}

/// State only touched while holding the machine lock.
struct Core<S: State, E: Event> {
    config: ActiveConfiguration<S>,
    joins: JoinTracker,
    lifecycle: Lifecycle,
    deferred: VecDeque<Message<E>>,
    activities: HashMap<NodeId, CancellationToken>,
    last_message: Option<Message<E>>,
}

/// Copy of the core published after every change, so queries never wait for
/// (or deadlock on) the machine lock.
#[derive(Clone)]
struct View<S: State, E: Event> {
    config: ActiveConfiguration<S>,
    lifecycle: Lifecycle,
    deferred: Vec<E>,
    last_message: Option<Message<E>>,
}

/// Clears the processing thread when the lock holder is done, unwinding
/// included.
struct ProcessorGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for ProcessorGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

enum LegRun {
    Committed,
    Vetoed,
    Failed,
}

/// A hierarchical state machine instance.
///
/// At most one event is resolved and executed at a time. Submissions queue
/// in arrival order and whichever caller holds the lock processes the queue,
/// including deferred events and completion transitions, before releasing it.
/// All notifications of a step are delivered before the lock is released.
///
/// # Example
///
/// ```rust
/// use statechart::builder::{on_event, RegionBuilder, StateGraphBuilder};
/// use statechart::runtime::{MachineSettings, StateMachine};
/// use statechart::{event_enum, state_enum};
///
/// state_enum! { enum Door { Open, Closed } }
/// event_enum! { enum Cmd { Close, Open } }
///
/// let graph = StateGraphBuilder::new()
///     .region(RegionBuilder::top().initial(Door::Open).state(Door::Open).state(Door::Closed))
///     .transition(on_event(Door::Open, Door::Closed, Cmd::Close))
///     .transition(on_event(Door::Closed, Door::Open, Cmd::Open))
///     .build()
///     .unwrap();
///
/// let machine = StateMachine::new(graph, MachineSettings::default());
/// machine.start().unwrap();
/// assert!(machine.send_event(Cmd::Close));
/// assert_eq!(machine.state(), Some(Door::Closed));
/// assert!(!machine.send_event(Cmd::Close));
/// ```
pub struct StateMachine<S: State, E: Event> {
    id: Arc<str>,
    graph: Arc<StateGraph<S, E>>,
    settings: MachineSettings,
    extended: ExtendedState,
    bus: Arc<ListenerBus<S, E>>,
    interceptors: RwLock<Vec<Arc<dyn Interceptor<S, E>>>>,
    core: FairMutex<Core<S, E>>,
    inbox: Mutex<VecDeque<Submission<S, E>>>,
    processor: Mutex<Option<ThreadId>>,
    view: RwLock<View<S, E>>,
    last_error: RwLock<Option<MachineError>>,
}

impl<S: State, E: Event> StateMachine<S, E> {
    /// Build a machine over `graph`. With `auto_startup` it is started
    /// immediately; a start failure is logged and kept as the last error.
    pub fn new(graph: impl Into<Arc<StateGraph<S, E>>>, settings: MachineSettings) -> Self {
        let id: Arc<str> = Arc::from(settings.machine_id.as_str());
        let extended = ExtendedState::new();
        let bus = Arc::new(ListenerBus::new());

        let relay_bus = Arc::downgrade(&bus);
        let relay_state = extended.downgrade();
        let relay_id = id.clone();
        extended.set_change_listener(move |change| {
            let (Some(bus), Some(state)) = (relay_bus.upgrade(), relay_state.upgrade()) else {
                return;
            };
            let context = StateContext::new(Stage::ExtendedStateChanged, relay_id.clone(), state)
                .with_change(change.clone());
            bus.notify(&context);
        });

        let machine = Self {
            id,
            graph: graph.into(),
            extended,
            bus,
            interceptors: RwLock::new(Vec::new()),
            core: FairMutex::new(Core {
                config: ActiveConfiguration::new(),
                joins: JoinTracker::default(),
                lifecycle: Lifecycle::Created,
                deferred: VecDeque::new(),
                activities: HashMap::new(),
                last_message: None,
            }),
            inbox: Mutex::new(VecDeque::new()),
            processor: Mutex::new(None),
            view: RwLock::new(View {
                config: ActiveConfiguration::new(),
                lifecycle: Lifecycle::Created,
                deferred: Vec::new(),
                last_message: None,
            }),
            last_error: RwLock::new(None),
            settings,
        };

        if machine.settings.auto_startup {
            if let Err(e) = machine.start() {
                error!(machine_id = %machine.id, error = %e, "auto startup failed");
            }
        }
        machine
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn graph(&self) -> &Arc<StateGraph<S, E>> {
        &self.graph
    }

    pub fn settings(&self) -> &MachineSettings {
        &self.settings
    }

    pub fn extended_state(&self) -> &ExtendedState {
        &self.extended
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener<S, E>>) {
        self.bus.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn Listener<S, E>>) -> bool {
        self.bus.remove(listener)
    }

    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor<S, E>>) {
        self.interceptors.write().push(interceptor);
    }

    pub fn remove_interceptor(&self, interceptor: &Arc<dyn Interceptor<S, E>>) -> bool {
        let mut interceptors = self.interceptors.write();
        let before = interceptors.len();
        interceptors.retain(|i| !Arc::ptr_eq(i, interceptor));
        interceptors.len() != before
    }

    // ---- queries -------------------------------------------------------

    pub fn lifecycle(&self) -> Lifecycle {
        self.view.read().lifecycle
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    /// Active state of the top region.
    pub fn state(&self) -> Option<S> {
        let view = self.view.read();
        view.config
            .active_in(self.graph.root())
            .map(|n| self.graph.node(n).id().clone())
    }

    /// Every active state, outermost first.
    pub fn state_ids(&self) -> Vec<S> {
        self.view.read().config.state_ids(&self.graph)
    }

    pub fn is_active(&self, state: &S) -> bool {
        self.view.read().config.contains(&self.graph, state)
    }

    /// Copy of the active configuration, history included.
    pub fn configuration(&self) -> ActiveConfiguration<S> {
        self.view.read().config.clone()
    }

    /// Whether the top region rests in an END state.
    pub fn is_complete(&self) -> bool {
        self.view
            .read()
            .config
            .active_in(self.graph.root())
            .is_some_and(|n| self.graph.node(n).kind().is_end())
    }

    /// Deferred events waiting to be replayed, in receipt order.
    pub fn deferred_events(&self) -> Vec<E> {
        self.view.read().deferred.clone()
    }

    pub fn has_error(&self) -> bool {
        self.last_error.read().is_some()
    }

    pub fn last_error(&self) -> Option<MachineError> {
        self.last_error.read().clone()
    }

    /// Snapshot of the machine as of the last completed step.
    pub fn snapshot(&self) -> StateMachineContext<S, E> {
        let view = self.view.read();
        snapshot(
            &self.graph,
            &self.id,
            &view.config,
            self.extended.variables(),
            view.last_message.as_ref(),
        )
    }

    // ---- lifecycle -----------------------------------------------------

    /// Enter the initial configuration, or resume a restored one.
    ///
    /// Starting a running machine does nothing. A stopped machine must be
    /// [`reset`](Self::reset) first.
    pub fn start(&self) -> Result<(), MachineError> {
        self.ensure_outside_callbacks()?;
        let mut guard = self.core.lock();
        let result = self.exclusive(&mut guard, |core| self.start_locked(core));
        drop(guard);
        self.pump();
        result
    }

    fn start_locked(&self, core: &mut Core<S, E>) -> Result<(), MachineError> {
        match core.lifecycle {
            Lifecycle::Started | Lifecycle::Running => return Ok(()),
            Lifecycle::Stopped => {
                return Err(MachineError::RestartRequiresReset {
                    machine_id: self.id.to_string(),
                })
            }
            Lifecycle::Created => {}
        }

        core.lifecycle = Lifecycle::Started;
        self.publish(core);

        if core.config.is_empty() {
            let interceptors = self.interceptors.read().clone();
            let executor = self.executor(&interceptors, None);
            match executor.enter_initial(&core.config) {
                Ok(prepared) => {
                    let (config, entered, _, pending) = prepared.split();
                    core.config = config;
                    core.lifecycle = Lifecycle::Running;
                    core.joins.observe(&self.graph, &core.config, &entered);
                    self.publish(core);
                    self.bus.notify(&self.context(Stage::StateMachineStart, None));
                    executor.finish(pending);
                    for failure in
                        executor.start_activities(&entered, &core.config, &mut core.activities)
                    {
                        self.report(failure, None);
                    }
                }
                Err(e) => {
                    core.lifecycle = Lifecycle::Created;
                    self.publish(core);
                    let reason = e.to_string();
                    self.report(e, None);
                    return Err(MachineError::StartFailed {
                        machine_id: self.id.to_string(),
                        reason,
                    });
                }
            }
        } else {
            core.lifecycle = Lifecycle::Running;
            self.publish(core);
            self.bus.notify(&self.context(Stage::StateMachineStart, None));
        }

        info!(
            machine_id = %self.id,
            states = ?core.config.state_ids(&self.graph),
            "state machine started"
        );
        self.settle(core);
        self.publish(core);
        Ok(())
    }

    /// Stop accepting events. The configuration stays as it is.
    pub fn stop(&self) -> Result<(), MachineError> {
        self.ensure_outside_callbacks()?;
        {
            let mut guard = self.core.lock();
            self.exclusive(&mut guard, |core| self.halt(core));
        }
        self.pump();
        Ok(())
    }

    /// Replace the configuration with `context`, or clear it with `None`.
    ///
    /// A running machine reset to a context keeps running from the restored
    /// configuration; otherwise the machine returns to `Created` and the
    /// next [`start`](Self::start) resumes from it without running entry
    /// actions. Errors, deferred events and join progress are cleared.
    pub fn reset(&self, context: Option<&StateMachineContext<S, E>>) -> Result<(), MachineError> {
        self.ensure_outside_callbacks()?;
        let config = match context {
            Some(context) => restore(&self.graph, context)
                .map_err(|e| MachineError::Restore(e.to_string()))?,
            None => ActiveConfiguration::new(),
        };

        let mut guard = self.core.lock();
        let core = &mut *guard;
        for (_, token) in core.activities.drain() {
            token.cancel();
        }
        core.joins.reset();
        core.joins.observe(&self.graph, &config, &[]);
        core.deferred.clear();
        core.last_message = context.and_then(|c| {
            c.event.clone().map(|payload| Message {
                payload,
                headers: c
                    .event_headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            })
        });
        self.extended
            .replace_all(context.map(StateMachineContext::variables).unwrap_or_default());
        if config.is_empty() || core.lifecycle != Lifecycle::Running {
            core.lifecycle = Lifecycle::Created;
        }
        core.config = config;
        *self.last_error.write() = None;
        self.publish(core);

        info!(
            machine_id = %self.id,
            states = ?core.config.state_ids(&self.graph),
            lifecycle = ?core.lifecycle,
            "state machine reset"
        );
        drop(guard);
        self.pump();
        Ok(())
    }

    // ---- submission ----------------------------------------------------

    /// Submit an event and wait for it to be processed. Returns whether it
    /// was accepted (deferred and queued events count as accepted).
    pub fn send_event(&self, message: impl Into<Message<E>>) -> bool {
        self.send_event_collect(message).is_accepted()
    }

    /// Submit an event and wait for the full [`EventResult`].
    ///
    /// Called from inside one of this machine's own callbacks, the event is
    /// queued behind the current one and [`EventOutcome::Queued`] is returned.
    pub fn send_event_collect(&self, message: impl Into<Message<E>>) -> EventResult<S> {
        let message = self.tag(message.into());
        if self.is_processing_thread() {
            debug!(machine_id = %self.id, "event submitted from a callback, queued");
            self.inbox.lock().push_back(Submission {
                message,
                reply: None,
            });
            return EventResult::new(&self.id, EventOutcome::Queued);
        }

        let (reply, mut receiver) = oneshot::channel();
        self.inbox.lock().push_back(Submission {
            message,
            reply: Some(reply),
        });
        {
            let mut guard = self.core.lock();
            self.exclusive(&mut guard, |core| self.drain(core));
        }
        self.pump();
        receiver
            .try_recv()
            .unwrap_or_else(|_| EventResult::new(&self.id, EventOutcome::NotAccepted))
    }

    /// Submit an event without blocking on the machine lock.
    ///
    /// When the machine is idle the event is processed before this returns;
    /// otherwise the caller currently holding the lock processes it. The
    /// handle resolves once it was.
    pub fn send_event_async(&self, message: impl Into<Message<E>>) -> EventHandle<S> {
        let (reply, receiver) = oneshot::channel();
        self.inbox.lock().push_back(Submission {
            message: self.tag(message.into()),
            reply: Some(reply),
        });
        if !self.is_processing_thread() {
            self.pump();
        }
        EventHandle {
            machine_id: self.id.to_string(),
            receiver,
        }
    }

    fn tag(&self, mut message: Message<E>) -> Message<E> {
        message
            .headers
            .entry(MACHINE_ID_HEADER.to_string())
            .or_insert_with(|| self.id.to_string().into());
        message
    }

    /// Process the inbox while the lock is free, until it is empty.
    fn pump(&self) {
        loop {
            {
                let Some(mut guard) = self.core.try_lock() else {
                    return;
                };
                self.exclusive(&mut guard, |core| self.drain(core));
            }
            if self.inbox.lock().is_empty() {
                return;
            }
        }
    }

    /// Run `f` with the lock held, marking this thread as the processor so
    /// callbacks re-entering the machine are detected.
    fn exclusive<R>(&self, core: &mut Core<S, E>, f: impl FnOnce(&mut Core<S, E>) -> R) -> R {
        *self.processor.lock() = Some(thread::current().id());
        let _processing = ProcessorGuard(&self.processor);
        f(core)
    }

    fn drain(&self, core: &mut Core<S, E>) {
        loop {
            let Some(submission) = self.inbox.lock().pop_front() else {
                break;
            };
            let result = self.process(core, submission.message);
            if let Some(reply) = submission.reply {
                let _ = reply.send(result);
            }
        }
    }

    fn is_processing_thread(&self) -> bool {
        *self.processor.lock() == Some(thread::current().id())
    }

    fn ensure_outside_callbacks(&self) -> Result<(), MachineError> {
        if self.is_processing_thread() {
            return Err(MachineError::Reentrant {
                machine_id: self.id.to_string(),
            });
        }
        Ok(())
    }

    // ---- processing ----------------------------------------------------

    fn process(&self, core: &mut Core<S, E>, message: Message<E>) -> EventResult<S> {
        if core.lifecycle != Lifecycle::Running {
            warn!(
                machine_id = %self.id,
                event = message.payload.name(),
                lifecycle = ?core.lifecycle,
                "event rejected, machine is not running"
            );
            self.not_accepted(&message);
            return EventResult::new(&self.id, EventOutcome::NotAccepted);
        }

        let interceptors = self.interceptors.read().clone();
        for interceptor in &interceptors {
            match contain(|| interceptor.pre_event(&message)) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(machine_id = %self.id, event = message.payload.name(), "event vetoed by interceptor");
                    self.not_accepted(&message);
                    return EventResult::new(&self.id, EventOutcome::NotAccepted);
                }
                Err(panic) => {
                    error!(machine_id = %self.id, panic = %panic, "pre_event interceptor panicked");
                    self.not_accepted(&message);
                    return EventResult::new(&self.id, EventOutcome::NotAccepted);
                }
            }
        }

        let resolution = self.resolve(core, Some(&message));
        let mut result = EventResult::new(&self.id, EventOutcome::NotAccepted);
        match resolution {
            Resolution::Plan(legs) => {
                let (fired, failed) = self.run_legs(core, &legs, Some(&message));
                result.outcome = if !fired.is_empty() {
                    EventOutcome::Accepted
                } else if failed {
                    EventOutcome::Failed
                } else {
                    debug!(machine_id = %self.id, event = message.payload.name(), "every transition vetoed");
                    self.not_accepted(&message);
                    EventOutcome::NotAccepted
                };
                result.fired = fired;
                core.last_message = Some(message);
                if result.outcome == EventOutcome::Accepted {
                    self.settle(core);
                }
            }
            Resolution::Deferred => {
                result.outcome = self.defer(core, message);
            }
            Resolution::NotAccepted => {
                debug!(machine_id = %self.id, event = message.payload.name(), "event not accepted");
                self.not_accepted(&message);
            }
            Resolution::Failed(e) => {
                self.report(e, Some(&message));
                result.outcome = EventOutcome::Failed;
            }
        }
        self.publish(core);
        result
    }

    fn defer(&self, core: &mut Core<S, E>, message: Message<E>) -> EventOutcome {
        if core.deferred.len() >= self.settings.max_deferred_events {
            warn!(
                machine_id = %self.id,
                event = message.payload.name(),
                limit = self.settings.max_deferred_events,
                "deferred queue full, event dropped"
            );
            self.not_accepted(&message);
            return EventOutcome::NotAccepted;
        }
        debug!(machine_id = %self.id, event = message.payload.name(), "event deferred");
        core.deferred.push_back(message);
        EventOutcome::Deferred
    }

    fn resolve(&self, core: &Core<S, E>, message: Option<&Message<E>>) -> Resolution {
        let context = self.context(Stage::Transition, message);
        Resolver::new(&self.graph, &core.config, &context)
            .resolve(message.map(|m| &m.payload), &core.joins)
    }

    /// Run every leg of a plan. Returns the sources that fired and whether
    /// any leg failed.
    fn run_legs(
        &self,
        core: &mut Core<S, E>,
        legs: &[Leg],
        message: Option<&Message<E>>,
    ) -> (Vec<S>, bool) {
        let mut fired = Vec::new();
        let mut failed = false;
        for leg in legs {
            match self.run_leg(core, leg, message) {
                LegRun::Committed => fired.push(self.graph.node(leg.source()).id().clone()),
                LegRun::Vetoed => {}
                LegRun::Failed => failed = true,
            }
            if let Some(join) = leg.join {
                core.joins.consume(&self.graph, &core.config, join);
            }
        }
        (fired, failed)
    }

    fn run_leg(&self, core: &mut Core<S, E>, leg: &Leg, message: Option<&Message<E>>) -> LegRun {
        let interceptors = self.interceptors.read().clone();
        let executor = self.executor(&interceptors, message);
        match executor.execute(leg, &core.config) {
            LegOutcome::Vetoed => LegRun::Vetoed,
            LegOutcome::Failed(e) => {
                self.report(e, message);
                LegRun::Failed
            }
            LegOutcome::Prepared(prepared) => {
                let (config, entered, exited, pending) = prepared.split();
                executor.cancel_activities(&exited, &mut core.activities);
                core.config = config;
                core.joins.observe(&self.graph, &core.config, &entered);
                self.publish(core);

                info!(
                    machine_id = %self.id,
                    transition = %transition_label(&self.graph, self.graph.transition(leg.transition)),
                    states = ?core.config.state_ids(&self.graph),
                    "transition committed"
                );
                executor.finish(pending);
                for failure in executor.start_activities(&entered, &core.config, &mut core.activities)
                {
                    self.report(failure, message);
                }
                LegRun::Committed
            }
        }
    }

    /// Run completion transitions and replay deferred events until neither
    /// makes progress.
    fn settle(&self, core: &mut Core<S, E>) {
        let mut steps = 0;
        loop {
            loop {
                if self.reached_end(core) {
                    return;
                }
                let legs = match self.resolve(core, None) {
                    Resolution::Plan(legs) if !legs.is_empty() => legs,
                    Resolution::Failed(e) => {
                        self.report(e, None);
                        break;
                    }
                    _ => break,
                };
                steps += 1;
                if steps > self.settings.max_completion_steps {
                    self.report(
                        MachineError::CompletionLimit(self.settings.max_completion_steps),
                        None,
                    );
                    return;
                }
                let (fired, _) = self.run_legs(core, &legs, None);
                if fired.is_empty() {
                    break;
                }
            }

            if self.reached_end(core) || !self.replay_deferred(core) {
                return;
            }
        }
    }

    /// Replay deferred events in receipt order until one fires. Events that
    /// are no longer deferred and match nothing are dropped.
    fn replay_deferred(&self, core: &mut Core<S, E>) -> bool {
        let mut index = 0;
        while index < core.deferred.len() {
            let message = core.deferred[index].clone();
            match self.resolve(core, Some(&message)) {
                Resolution::Deferred => index += 1,
                Resolution::NotAccepted => {
                    core.deferred.remove(index);
                    debug!(machine_id = %self.id, event = message.payload.name(), "deferred event no longer accepted");
                    self.not_accepted(&message);
                }
                Resolution::Failed(e) => {
                    core.deferred.remove(index);
                    self.report(e, Some(&message));
                }
                Resolution::Plan(legs) => {
                    core.deferred.remove(index);
                    let (fired, _) = self.run_legs(core, &legs, Some(&message));
                    if !fired.is_empty() {
                        debug!(machine_id = %self.id, event = message.payload.name(), "deferred event fired");
                        core.last_message = Some(message);
                        return true;
                    }
                }
            }
        }
        false
    }

    fn reached_end(&self, core: &mut Core<S, E>) -> bool {
        if core.lifecycle != Lifecycle::Running {
            return true;
        }
        let complete = core
            .config
            .active_in(self.graph.root())
            .is_some_and(|n| self.graph.node(n).kind().is_end());
        if complete {
            info!(machine_id = %self.id, "state machine completed");
            self.halt(core);
        }
        complete
    }

    fn halt(&self, core: &mut Core<S, E>) {
        if core.lifecycle == Lifecycle::Stopped {
            return;
        }
        for (_, token) in core.activities.drain() {
            token.cancel();
        }
        core.lifecycle = Lifecycle::Stopped;
        self.publish(core);
        info!(machine_id = %self.id, "state machine stopped");
        self.bus.notify(&self.context(Stage::StateMachineStop, None));
    }

    // ---- helpers -------------------------------------------------------

    fn executor<'a>(
        &'a self,
        interceptors: &'a [Arc<dyn Interceptor<S, E>>],
        message: Option<&'a Message<E>>,
    ) -> Executor<'a, S, E> {
        Executor {
            graph: &self.graph,
            machine_id: &self.id,
            extended: &self.extended,
            bus: &self.bus,
            interceptors,
            message,
        }
    }

    fn context(&self, stage: Stage, message: Option<&Message<E>>) -> StateContext<S, E> {
        StateContext::new(stage, self.id.clone(), self.extended.clone())
            .with_message(message.cloned())
    }

    fn not_accepted(&self, message: &Message<E>) {
        self.bus
            .notify(&self.context(Stage::EventNotAccepted, Some(message)));
    }

    fn report(&self, failure: MachineError, message: Option<&Message<E>>) {
        error!(machine_id = %self.id, error = %failure, "state machine error");
        *self.last_error.write() = Some(failure.clone());

        let failure = Arc::new(failure);
        self.bus.notify(
            &self
                .context(Stage::StateMachineError, message)
                .with_error(failure.clone()),
        );
        let interceptors = self.interceptors.read().clone();
        for interceptor in interceptors {
            if let Err(panic) = contain(|| interceptor.state_machine_error(&failure)) {
                error!(machine_id = %self.id, panic = %panic, "state_machine_error interceptor panicked");
            }
        }
    }

    fn publish(&self, core: &Core<S, E>) {
        let mut view = self.view.write();
        view.config = core.config.clone();
        view.lifecycle = core.lifecycle;
        view.deferred = core.deferred.iter().map(|m| m.payload.clone()).collect();
        view.last_message = core.last_message.clone();
    }
}

impl<S: State, E: Event> std::fmt::Debug for StateMachine<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("id", &self.id)
            .field("lifecycle", &self.lifecycle())
            .field("states", &self.state_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{on_event, RegionBuilder, StateBuilder, StateGraphBuilder};
    use crate::core::Action;
    use crate::runtime::FnListener;
    use crate::{event_enum, state_enum};

    state_enum! {
        enum S { Idle, Busy, Done, Fin }
    }

    event_enum! {
        enum E { Work, Finish, Later, Poke }
    }

    fn graph() -> StateGraph<S, E> {
        StateGraphBuilder::new()
            .region(
                RegionBuilder::top()
                    .initial(S::Idle)
                    .state(StateBuilder::new(S::Idle).defer(E::Later))
                    .state(S::Busy)
                    .state(S::Done)
                    .end(S::Fin),
            )
            .transition(on_event(S::Idle, S::Busy, E::Work))
            .transition(on_event(S::Busy, S::Done, E::Later))
            .transition(on_event(S::Done, S::Fin, E::Finish))
            .build()
            .unwrap()
    }

    fn machine() -> StateMachine<S, E> {
        StateMachine::new(graph(), MachineSettings::new().with_machine_id("unit"))
    }

    #[test]
    fn events_before_start_are_rejected() {
        let machine = machine();
        assert_eq!(machine.lifecycle(), Lifecycle::Created);
        assert!(!machine.send_event(E::Work));
        assert_eq!(machine.state(), None);
    }

    #[test]
    fn deferred_event_replays_after_transition() {
        let machine = machine();
        machine.start().unwrap();

        let result = machine.send_event_collect(E::Later);
        assert_eq!(result.outcome, EventOutcome::Deferred);
        assert_eq!(machine.deferred_events(), vec![E::Later]);

        let result = machine.send_event_collect(E::Work);
        assert_eq!(result.outcome, EventOutcome::Accepted);
        assert_eq!(result.fired, vec![S::Idle]);
        assert_eq!(machine.state(), Some(S::Done));
        assert!(machine.deferred_events().is_empty());
    }

    #[test]
    fn reaching_end_stops_the_machine() {
        let machine = machine();
        machine.start().unwrap();
        machine.send_event(E::Work);
        machine.send_event(E::Later);
        machine.send_event(E::Finish);

        assert!(machine.is_complete());
        assert_eq!(machine.lifecycle(), Lifecycle::Stopped);
        assert!(!machine.send_event(E::Work));
        assert!(matches!(
            machine.start(),
            Err(MachineError::RestartRequiresReset { .. })
        ));
    }

    #[test]
    fn deferred_queue_is_bounded() {
        let machine = StateMachine::new(
            graph(),
            MachineSettings::new().with_max_deferred_events(1),
        );
        machine.start().unwrap();
        assert_eq!(machine.send_event_collect(E::Later).outcome, EventOutcome::Deferred);
        assert_eq!(machine.send_event_collect(E::Later).outcome, EventOutcome::NotAccepted);
        assert_eq!(machine.deferred_events().len(), 1);
    }

    #[test]
    fn messages_carry_the_machine_id() {
        let machine = Arc::new(machine());
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        machine.add_listener(Arc::new(FnListener::new(move |ctx: &StateContext<S, E>| {
            if ctx.stage() == Stage::TransitionEnd {
                *sink.lock() = ctx.header(MACHINE_ID_HEADER).cloned();
            }
        })));
        machine.start().unwrap();
        machine.send_event(E::Work);
        assert_eq!(*seen.lock(), Some(serde_json::json!("unit")));
    }

    #[test]
    fn lifecycle_calls_from_callbacks_are_rejected() {
        let machine = Arc::new(machine());
        let weak = Arc::downgrade(&machine);
        let outcome = Arc::new(Mutex::new(None));
        let sink = outcome.clone();
        machine.add_listener(Arc::new(FnListener::new(move |ctx: &StateContext<S, E>| {
            if ctx.stage() == Stage::StateChanged {
                if let Some(machine) = weak.upgrade() {
                    *sink.lock() = Some(machine.reset(None));
                }
            }
        })));
        machine.start().unwrap();
        assert!(matches!(
            outcome.lock().take(),
            Some(Err(MachineError::Reentrant { .. }))
        ));
    }

    #[test]
    fn nested_submissions_run_after_the_current_event() {
        let machine = Arc::new(machine());
        let weak = Arc::downgrade(&machine);
        let nested = Arc::new(Mutex::new(None));
        let sink = nested.clone();
        machine.add_listener(Arc::new(FnListener::new(move |ctx: &StateContext<S, E>| {
            if ctx.stage() == Stage::StateChanged && ctx.target() == Some(&S::Busy) {
                if let Some(machine) = weak.upgrade() {
                    *sink.lock() = Some(machine.send_event_collect(E::Later).outcome);
                }
            }
        })));
        machine.start().unwrap();
        machine.send_event(E::Work);

        assert_eq!(*nested.lock(), Some(EventOutcome::Queued));
        assert_eq!(machine.state(), Some(S::Done));
    }

    #[test]
    fn state_actions_get_cancelled_on_exit() {
        let tokens = Arc::new(Mutex::new(Vec::new()));
        let sink = tokens.clone();
        let graph = StateGraphBuilder::new()
            .region(
                RegionBuilder::top()
                    .initial(S::Idle)
                    .state(StateBuilder::new(S::Idle).state_action(Action::from_fn(
                        move |ctx: &StateContext<S, E>| {
                            if let Some(token) = ctx.cancellation() {
                                sink.lock().push(token.clone());
                            }
                        },
                    )))
                    .state(S::Busy),
            )
            .transition(on_event(S::Idle, S::Busy, E::Work))
            .build()
            .unwrap();
        let machine = StateMachine::new(graph, MachineSettings::default());
        machine.start().unwrap();
        assert!(!tokens.lock()[0].is_cancelled());

        machine.send_event(E::Work);
        assert!(tokens.lock()[0].is_cancelled());
    }

    #[test]
    fn poke_is_not_accepted_anywhere() {
        let machine = machine();
        machine.start().unwrap();
        let result = machine.send_event_collect(E::Poke);
        assert_eq!(result.outcome, EventOutcome::NotAccepted);
        assert!(result.fired.is_empty());
        assert!(!machine.has_error());
    }

    #[test]
    fn processor_is_cleared_when_processing_unwinds() {
        let machine = machine();
        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut guard = machine.core.lock();
            machine.exclusive::<()>(&mut guard, |_| panic!("engine bug"));
        }));
        assert!(unwound.is_err());
        assert!(!machine.is_processing_thread());
        assert!(machine.start().is_ok());
    }
}
