//! Applying resolved transition legs.
//!
//! A leg runs against a working copy of the active configuration. Exit
//! actions, transition actions and entry actions run in that order; their
//! notifications are buffered. Only when every callback succeeded (and no
//! interceptor objected to the proposed configuration) does the caller swap
//! the copy in and [`Executor::finish`] deliver the buffered notifications.
//! Any failure drops the copy, leaving the live configuration untouched.

use crate::checkpoint::snapshot;
use crate::core::{
    Action, CancellationToken, Event, ExtendedState, Message, Stage, State, StateContext,
};
use crate::graph::{NodeId, RegionId, StateGraph};
use crate::runtime::config::ActiveConfiguration;
use crate::runtime::error::{contain, MachineError};
use crate::runtime::interceptor::Interceptor;
use crate::runtime::listener::ListenerBus;
use crate::runtime::resolver::{transition_info, transition_label, Chain, Leg, Resolver, Step};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Notifications and bookkeeping of a leg that is ready to commit.
pub(crate) struct Prepared<S: State, E: Event> {
    pub config: ActiveConfiguration<S>,
    pub entered: Vec<NodeId>,
    pub exited: Vec<NodeId>,
    pending: Pending<S, E>,
}

impl<S: State, E: Event> Prepared<S, E> {
    pub fn split(self) -> (ActiveConfiguration<S>, Vec<NodeId>, Vec<NodeId>, Pending<S, E>) {
        (self.config, self.entered, self.exited, self.pending)
    }
}

/// Buffered notifications, delivered by [`Executor::finish`].
pub(crate) struct Pending<S: State, E: Event> {
    context: StateContext<S, E>,
    notifications: Vec<StateContext<S, E>>,
    changes_state: bool,
    transition: bool,
}

pub(crate) enum LegOutcome<S: State, E: Event> {
    Prepared(Prepared<S, E>),
    Vetoed,
    Failed(MachineError),
}

/// Scratch space of one leg.
struct Work<S: State, E: Event> {
    config: ActiveConfiguration<S>,
    notifications: Vec<StateContext<S, E>>,
    entered: Vec<NodeId>,
    exited: Vec<NodeId>,
}

pub(crate) struct Executor<'a, S: State, E: Event> {
    pub graph: &'a StateGraph<S, E>,
    pub machine_id: &'a Arc<str>,
    pub extended: &'a ExtendedState,
    pub bus: &'a ListenerBus<S, E>,
    pub interceptors: &'a [Arc<dyn Interceptor<S, E>>],
    pub message: Option<&'a Message<E>>,
}

impl<'a, S: State, E: Event> Executor<'a, S, E> {
    fn context(&self, stage: Stage) -> StateContext<S, E> {
        StateContext::new(stage, self.machine_id.clone(), self.extended.clone())
            .with_message(self.message.cloned())
    }

    /// Run one leg against a copy of `live`.
    pub fn execute(&self, leg: &Leg, live: &ActiveConfiguration<S>) -> LegOutcome<S, E> {
        let transition = self.graph.transition(leg.transition);
        let info = transition_info(self.graph, transition);
        let context = self
            .context(Stage::TransitionStart)
            .with_source(info.source.clone())
            .with_target(info.target.clone())
            .with_transition(info);

        for interceptor in self.interceptors {
            match contain(|| interceptor.pre_transition(&context)) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        machine_id = %self.machine_id,
                        transition = %transition_label(self.graph, transition),
                        "transition vetoed by interceptor"
                    );
                    return LegOutcome::Vetoed;
                }
                Err(panic) => {
                    return self.fail(
                        leg,
                        &context,
                        MachineError::ActionFailed {
                            action: "pre_transition interceptor".to_string(),
                            message: panic,
                        },
                    )
                }
            }
        }

        self.bus.notify(&context);

        let mut work = Work {
            config: live.clone(),
            notifications: Vec::new(),
            entered: Vec::new(),
            exited: Vec::new(),
        };
        match self.apply(leg, &context, &mut work) {
            Ok(()) => LegOutcome::Prepared(Prepared {
                config: work.config,
                entered: work.entered,
                exited: work.exited,
                pending: Pending {
                    context,
                    notifications: work.notifications,
                    changes_state: !leg.is_internal(),
                    transition: true,
                },
            }),
            Err(error) => self.fail(leg, &context, error),
        }
    }

    fn apply(
        &self,
        leg: &Leg,
        context: &StateContext<S, E>,
        work: &mut Work<S, E>,
    ) -> Result<(), MachineError> {
        for region in &leg.scope {
            self.exit_region(work, *region, context)?;
        }

        let transition = context.clone().with_stage(Stage::Transition);
        self.run_steps(&leg.chain.steps, &transition)?;
        work.notifications.push(transition);

        for region in &leg.scope {
            self.enter_region(work, *region, &leg.chain.targets, context)?;
        }

        if !leg.is_internal() {
            self.approve(context, &work.config)?;
        }
        Ok(())
    }

    /// Enter the initial configuration from an empty one.
    pub fn enter_initial(&self, live: &ActiveConfiguration<S>) -> Result<Prepared<S, E>, MachineError> {
        let context = self.context(Stage::StateEntry);
        let mut work = Work {
            config: live.clone(),
            notifications: Vec::new(),
            entered: Vec::new(),
            exited: Vec::new(),
        };
        self.enter_region(&mut work, self.graph.root(), &[], &context)?;
        self.approve(&context, &work.config)?;

        let target = self
            .graph
            .region(self.graph.root())
            .initial()
            .map(|i| self.graph.node(i.target()).id().clone());
        Ok(Prepared {
            config: work.config,
            entered: work.entered,
            exited: work.exited,
            pending: Pending {
                context: context.with_target(target),
                notifications: work.notifications,
                changes_state: true,
                transition: false,
            },
        })
    }

    fn approve(
        &self,
        context: &StateContext<S, E>,
        proposed: &ActiveConfiguration<S>,
    ) -> Result<(), MachineError> {
        if self.interceptors.is_empty() {
            return Ok(());
        }
        let proposed = snapshot(
            self.graph,
            self.machine_id,
            proposed,
            self.extended.variables(),
            self.message,
        );
        for interceptor in self.interceptors {
            match contain(|| interceptor.pre_state_change(context, &proposed)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(MachineError::StateChangeRejected(format!("{e:#}"))),
                Err(panic) => return Err(MachineError::StateChangeRejected(panic)),
            }
        }
        Ok(())
    }

    fn fail(
        &self,
        leg: &Leg,
        context: &StateContext<S, E>,
        error: MachineError,
    ) -> LegOutcome<S, E> {
        let transition = self.graph.transition(leg.transition);
        if let Some(action) = transition.error_action() {
            let failed = context
                .clone()
                .with_stage(Stage::StateMachineError)
                .with_error(Arc::new(error.clone()));
            match contain(|| action.execute(&failed)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    machine_id = %self.machine_id,
                    error = %format!("{e:#}"),
                    "error action failed"
                ),
                Err(panic) => error!(
                    machine_id = %self.machine_id,
                    panic = %panic,
                    "error action panicked"
                ),
            }
        }
        LegOutcome::Failed(error)
    }

    fn exit_region(
        &self,
        work: &mut Work<S, E>,
        region: RegionId,
        context: &StateContext<S, E>,
    ) -> Result<(), MachineError> {
        let Some(node) = work.config.active_in(region) else {
            return Ok(());
        };
        let state = self.graph.node(node);

        for child in state.regions() {
            if let Some(history) = self.graph.region(*child).history() {
                let recorded: Vec<S> = work
                    .config
                    .subtree(self.graph, *child)
                    .into_iter()
                    .map(|n| self.graph.node(n).id().clone())
                    .collect();
                if !recorded.is_empty() {
                    let key = self.graph.node(history).id().clone();
                    work.config.history_mut().record(key, recorded);
                }
            }
        }
        for child in state.regions() {
            self.exit_region(work, *child, context)?;
        }

        let exit = context
            .clone()
            .with_stage(Stage::StateExit)
            .with_source(Some(state.id().clone()))
            .with_target(None);
        for action in state.exit_actions() {
            self.run_action(action, &exit, || format!("exit of {}", state.id().name()))?;
        }
        work.notifications.push(exit);
        work.config.clear_region(region);
        work.exited.push(node);
        Ok(())
    }

    fn enter_region(
        &self,
        work: &mut Work<S, E>,
        region: RegionId,
        targets: &[NodeId],
        context: &StateContext<S, E>,
    ) -> Result<(), MachineError> {
        if let Some(child) = targets
            .iter()
            .find_map(|t| self.graph.child_on_path(region, *t))
        {
            return self.enter_node(work, child, targets, context);
        }

        let mut chain = Chain::default();
        Resolver::new(self.graph, &work.config, context).follow_initial(region, &mut chain)?;
        let entry = context.clone().with_stage(Stage::Transition);
        self.run_steps(&chain.steps, &entry)?;

        if !chain
            .targets
            .iter()
            .any(|t| self.graph.region_contains(region, *t))
        {
            return Err(MachineError::NoBranch {
                pseudostate: format!("initial of {}", self.graph.region_label(region)),
            });
        }
        self.enter_region(work, region, &chain.targets, context)
    }

    fn enter_node(
        &self,
        work: &mut Work<S, E>,
        node: NodeId,
        targets: &[NodeId],
        context: &StateContext<S, E>,
    ) -> Result<(), MachineError> {
        let state = self.graph.node(node);
        work.config.set(state.region(), node);

        let entry = context
            .clone()
            .with_stage(Stage::StateEntry)
            .with_source(None)
            .with_target(Some(state.id().clone()));
        for action in state.entry_actions() {
            self.run_action(action, &entry, || format!("entry of {}", state.id().name()))?;
        }
        work.notifications.push(entry);
        work.entered.push(node);

        for child in state.regions() {
            self.enter_region(work, *child, targets, context)?;
        }
        Ok(())
    }

    fn run_steps(&self, steps: &[Step], context: &StateContext<S, E>) -> Result<(), MachineError> {
        for step in steps {
            match step {
                Step::Transition(id) => {
                    let transition = self.graph.transition(*id);
                    for action in transition.actions() {
                        self.run_action(action, context, || {
                            transition_label(self.graph, transition)
                        })?;
                    }
                }
                Step::Initial(region) => {
                    let action = self
                        .graph
                        .region(*region)
                        .initial()
                        .and_then(|initial| initial.action());
                    if let Some(action) = action {
                        self.run_action(action, context, || {
                            format!("initial of {}", self.graph.region_label(*region))
                        })?;
                    }
                }
            }
        }
        Ok(())
    }

    fn run_action(
        &self,
        action: &Action<S, E>,
        context: &StateContext<S, E>,
        label: impl FnOnce() -> String,
    ) -> Result<(), MachineError> {
        let failure = match contain(|| action.execute(context)) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => format!("panicked: {panic}"),
        };
        Err(MachineError::ActionFailed {
            action: action.name().map(str::to_string).unwrap_or_else(label),
            message: failure,
        })
    }

    /// Deliver the buffered notifications of a committed leg, then
    /// `STATE_CHANGED` and `TRANSITION_END` with their interceptor hooks.
    pub fn finish(&self, pending: Pending<S, E>) {
        for notification in &pending.notifications {
            self.bus.notify(notification);
        }

        if pending.changes_state {
            let changed = pending.context.clone().with_stage(Stage::StateChanged);
            self.bus.notify(&changed);
            self.each_interceptor("post_state_change", |i| i.post_state_change(&changed));
        }

        if pending.transition {
            let end = pending.context.with_stage(Stage::TransitionEnd);
            self.bus.notify(&end);
            self.each_interceptor("post_transition", |i| i.post_transition(&end));
        }
    }

    fn each_interceptor(&self, hook: &str, call: impl Fn(&dyn Interceptor<S, E>)) {
        for interceptor in self.interceptors {
            if let Err(panic) = contain(|| call(interceptor.as_ref())) {
                error!(
                    machine_id = %self.machine_id,
                    hook,
                    panic = %panic,
                    "interceptor panicked"
                );
            }
        }
    }

    /// Cancel the state actions of exited states.
    pub fn cancel_activities(
        &self,
        exited: &[NodeId],
        activities: &mut HashMap<NodeId, CancellationToken>,
    ) {
        for node in exited {
            if let Some(token) = activities.remove(node) {
                token.cancel();
            }
        }
    }

    /// Run the state actions of entered states that are still active.
    pub fn start_activities(
        &self,
        entered: &[NodeId],
        config: &ActiveConfiguration<S>,
        activities: &mut HashMap<NodeId, CancellationToken>,
    ) -> Vec<MachineError> {
        let mut failures = Vec::new();
        for node in entered {
            let state = self.graph.node(*node);
            if state.state_actions().is_empty() || !config.is_active(self.graph, *node) {
                continue;
            }
            let token = CancellationToken::new();
            activities.insert(*node, token.clone());
            let context = self
                .context(Stage::StateEntry)
                .with_target(Some(state.id().clone()))
                .with_cancellation(token);
            for action in state.state_actions() {
                if let Err(error) = self.run_action(action, &context, || {
                    format!("state action of {}", state.id().name())
                }) {
                    failures.push(error);
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{on_event, RegionBuilder, StateBuilder, StateGraphBuilder, TransitionBuilder};
    use crate::runtime::join::JoinTracker;
    use crate::runtime::resolver::Resolution;
    use crate::runtime::FnListener;
    use crate::{event_enum, state_enum};
    use parking_lot::Mutex;

    state_enum! {
        enum S { P, A, B, C }
    }

    event_enum! {
        enum E { Go, Break }
    }

    fn record(log: &Arc<Mutex<Vec<String>>>, entry: &str) -> Action<S, E> {
        let log = log.clone();
        let entry = entry.to_string();
        Action::from_fn(move |_| log.lock().push(entry.clone()))
    }

    struct Fixture {
        graph: StateGraph<S, E>,
        log: Arc<Mutex<Vec<String>>>,
        bus: ListenerBus<S, E>,
        extended: ExtendedState,
        id: Arc<str>,
    }

    fn fixture() -> Fixture {
        let log = Arc::new(Mutex::new(Vec::new()));
        let graph = StateGraphBuilder::new()
            .region(
                RegionBuilder::top()
                    .initial(S::P)
                    .state(
                        StateBuilder::new(S::P)
                            .entry(record(&log, "enter P"))
                            .exit(record(&log, "exit P")),
                    )
                    .state(StateBuilder::new(S::C).entry(record(&log, "enter C"))),
            )
            .region(
                RegionBuilder::within(S::P)
                    .initial(S::A)
                    .state(StateBuilder::new(S::A).exit(record(&log, "exit A")))
                    .state(S::B),
            )
            .transition(
                TransitionBuilder::external()
                    .source(S::P)
                    .target(S::C)
                    .event(E::Go)
                    .action(record(&log, "act")),
            )
            .transition(
                on_event(S::A, S::B, E::Break)
                    .action(Action::new(|_| Err(anyhow::anyhow!("no way"))))
                    .error_action(record(&log, "recover")),
            )
            .build()
            .unwrap();
        Fixture {
            graph,
            log,
            bus: ListenerBus::new(),
            extended: ExtendedState::new(),
            id: Arc::from("exec"),
        }
    }

    fn executor<'a>(fixture: &'a Fixture) -> Executor<'a, S, E> {
        Executor {
            graph: &fixture.graph,
            machine_id: &fixture.id,
            extended: &fixture.extended,
            bus: &fixture.bus,
            interceptors: &[],
            message: None,
        }
    }

    fn plan(fixture: &Fixture, config: &ActiveConfiguration<S>, event: E) -> Leg {
        let context = StateContext::new(Stage::Transition, fixture.id.clone(), fixture.extended.clone());
        match Resolver::new(&fixture.graph, config, &context).resolve(Some(&event), &JoinTracker::default()) {
            Resolution::Plan(mut legs) => legs.remove(0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn initial_entry_is_top_down() {
        let fixture = fixture();
        let prepared = executor(&fixture)
            .enter_initial(&ActiveConfiguration::new())
            .unwrap();
        assert_eq!(prepared.config.state_ids(&fixture.graph), vec![S::P, S::A]);
        assert_eq!(*fixture.log.lock(), vec!["enter P"]);
    }

    #[test]
    fn exits_then_actions_then_entries() {
        let fixture = fixture();
        let exec = executor(&fixture);
        let (config, ..) = exec.enter_initial(&ActiveConfiguration::new()).unwrap().split();
        fixture.log.lock().clear();

        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = stages.clone();
        fixture.bus.add(Arc::new(FnListener::new(move |ctx: &StateContext<S, E>| {
            sink.lock().push(ctx.stage())
        })));

        let leg = plan(&fixture, &config, E::Go);
        let LegOutcome::Prepared(prepared) = exec.execute(&leg, &config) else {
            panic!("leg failed");
        };
        assert_eq!(*fixture.log.lock(), vec!["exit A", "exit P", "act", "enter C"]);

        let (next, _, exited, pending) = prepared.split();
        assert_eq!(next.state_ids(&fixture.graph), vec![S::C]);
        assert_eq!(exited.len(), 2);
        exec.finish(pending);
        assert_eq!(
            *stages.lock(),
            vec![
                Stage::TransitionStart,
                Stage::StateExit,
                Stage::StateExit,
                Stage::Transition,
                Stage::StateEntry,
                Stage::StateChanged,
                Stage::TransitionEnd,
            ]
        );
    }

    #[test]
    fn failing_action_leaves_configuration_and_runs_error_action() {
        let fixture = fixture();
        let exec = executor(&fixture);
        let (config, ..) = exec.enter_initial(&ActiveConfiguration::new()).unwrap().split();
        fixture.log.lock().clear();

        let leg = plan(&fixture, &config, E::Break);
        let LegOutcome::Failed(error) = exec.execute(&leg, &config) else {
            panic!("leg should fail");
        };
        assert!(matches!(error, MachineError::ActionFailed { .. }));
        assert_eq!(*fixture.log.lock(), vec!["exit A", "recover"]);
        assert_eq!(config.state_ids(&fixture.graph), vec![S::P, S::A]);
    }
}
