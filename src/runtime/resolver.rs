//! Transition resolution: from the active configuration and a trigger to an
//! ordered list of transition legs.
//!
//! Resolution never mutates anything. Guards are evaluated against a shared
//! [`StateContext`], so the same configuration, extended state and event
//! always produce the same plan.

use crate::core::{Event, State, StateContext, TransitionInfo};
use crate::graph::{
    NodeId, PseudoKind, RegionId, StateGraph, StateKind, TransitionDef, TransitionId,
    TransitionKind,
};
use crate::runtime::config::ActiveConfiguration;
use crate::runtime::error::{contain, MachineError};
use crate::runtime::join::JoinTracker;
use std::collections::HashSet;
use tracing::debug;

/// One transition (or initial transition) whose actions run in a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    Transition(TransitionId),
    Initial(RegionId),
}

/// A path through pseudostates ending in resting targets.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Chain {
    pub steps: Vec<Step>,
    pub visited: Vec<NodeId>,
    pub targets: Vec<NodeId>,
}

/// One concrete transition leg: exits, actions and entries applied together.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Leg {
    pub transition: TransitionId,
    pub kind: TransitionKind,
    /// Transition source, or every source of a join.
    pub sources: Vec<NodeId>,
    /// Regions whose active subtree is exited and re-entered. Empty for
    /// internal transitions.
    pub scope: Vec<RegionId>,
    pub chain: Chain,
    pub join: Option<NodeId>,
}

impl Leg {
    pub fn source(&self) -> NodeId {
        self.sources[0]
    }

    pub fn is_internal(&self) -> bool {
        self.scope.is_empty()
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum Resolution {
    Plan(Vec<Leg>),
    Deferred,
    NotAccepted,
    Failed(MachineError),
}

pub(crate) fn transition_info<S: State, E: Event>(
    graph: &StateGraph<S, E>,
    transition: &TransitionDef<S, E>,
) -> TransitionInfo<S> {
    TransitionInfo {
        name: transition.name().map(str::to_string),
        source: Some(graph.node(transition.source()).id().clone()),
        target: transition.target().map(|t| graph.node(t).id().clone()),
        kind: transition.kind(),
    }
}

pub(crate) fn transition_label<S: State, E: Event>(
    graph: &StateGraph<S, E>,
    transition: &TransitionDef<S, E>,
) -> String {
    if let Some(name) = transition.name() {
        return name.to_string();
    }
    let source = graph.node(transition.source()).id().name();
    match transition.target() {
        Some(target) => format!("{source} -> {}", graph.node(target).id().name()),
        None => format!("{source} (internal)"),
    }
}

pub(crate) struct Resolver<'a, S: State, E: Event> {
    graph: &'a StateGraph<S, E>,
    config: &'a ActiveConfiguration<S>,
    context: &'a StateContext<S, E>,
}

impl<'a, S: State, E: Event> Resolver<'a, S, E> {
    /// `context` carries the triggering message; it is specialised per guard.
    pub fn new(
        graph: &'a StateGraph<S, E>,
        config: &'a ActiveConfiguration<S>,
        context: &'a StateContext<S, E>,
    ) -> Self {
        Self {
            graph,
            config,
            context,
        }
    }

    /// Resolve `event`, or completion transitions and finished joins when
    /// `event` is `None`.
    pub fn resolve(&self, event: Option<&E>, joins: &JoinTracker) -> Resolution {
        match self.try_resolve(event, joins) {
            Ok(resolution) => resolution,
            Err(error) => Resolution::Failed(error),
        }
    }

    fn try_resolve(
        &self,
        event: Option<&E>,
        joins: &JoinTracker,
    ) -> Result<Resolution, MachineError> {
        let mut candidates: Vec<(&TransitionDef<S, E>, Option<NodeId>)> = Vec::new();
        let mut seen = HashSet::new();

        for leaf in self.config.leaves(self.graph) {
            let mut current = Some(leaf);
            'walk: while let Some(node) = current {
                if event.is_some() || self.is_completed(node) {
                    for transition in self.graph.outgoing(node) {
                        if transition.matches(event) && self.passes(transition)? {
                            if seen.insert(transition.id()) {
                                candidates.push((transition, None));
                            }
                            break 'walk;
                        }
                    }
                }
                current = self.graph.parent(node);
            }
        }

        if event.is_none() {
            for join in self.graph.joins() {
                if !joins.is_complete(join.node()) {
                    continue;
                }
                if let Some(transition) = self.graph.outgoing(join.node()).next() {
                    if self.passes(transition)? {
                        candidates.push((transition, Some(join.node())));
                    }
                }
            }
        }

        if candidates.is_empty() {
            let deferred = event.is_some_and(|e| {
                self.config
                    .nodes()
                    .any(|node| self.graph.node(node).defers(e))
            });
            return Ok(if deferred {
                Resolution::Deferred
            } else {
                Resolution::NotAccepted
            });
        }

        // Deeper sources win conflicts; a leg is dropped when it would exit
        // or fire from a state another accepted leg already touches.
        candidates.sort_by_key(|(t, join)| {
            let source = join.unwrap_or(t.source());
            std::cmp::Reverse(self.graph.node(source).depth())
        });

        let mut touched = HashSet::new();
        let mut legs = Vec::new();
        for (transition, join) in candidates {
            let leg = self.build_leg(transition, join)?;
            let footprint = self.footprint(&leg);
            if footprint.iter().any(|n| touched.contains(n)) {
                debug!(
                    transition = %transition_label(self.graph, transition),
                    "transition conflicts with a deeper one, skipped"
                );
                continue;
            }
            touched.extend(footprint);
            legs.push(leg);
        }

        Ok(Resolution::Plan(legs))
    }

    /// Whether a completion transition may leave `node`: always for simple
    /// and final states, and for a composite once every region rests in END.
    fn is_completed(&self, node: NodeId) -> bool {
        let state = self.graph.node(node);
        match state.kind() {
            StateKind::Composite | StateKind::Orthogonal => state.regions().iter().all(|r| {
                self.config
                    .active_in(*r)
                    .is_some_and(|n| self.graph.node(n).kind().is_end())
            }),
            _ => true,
        }
    }

    fn passes(&self, transition: &TransitionDef<S, E>) -> Result<bool, MachineError> {
        let Some(guard) = transition.guard() else {
            return Ok(true);
        };
        let info = transition_info(self.graph, transition);
        let context = self
            .context
            .clone()
            .with_source(info.source.clone())
            .with_target(info.target.clone())
            .with_transition(info);
        contain(|| guard.check(&context)).map_err(|message| MachineError::GuardFailed {
            transition: transition_label(self.graph, transition),
            message,
        })
    }

    fn build_leg(
        &self,
        transition: &TransitionDef<S, E>,
        join: Option<NodeId>,
    ) -> Result<Leg, MachineError> {
        let mut chain = Chain {
            steps: vec![Step::Transition(transition.id())],
            ..Chain::default()
        };
        let sources = match join {
            Some(join) => {
                chain.visited.push(join);
                self.graph.node(join).join_sources().to_vec()
            }
            None => vec![transition.source()],
        };

        let internal = transition.kind() == TransitionKind::Internal;
        if let (false, Some(target)) = (internal, transition.target()) {
            self.follow(target, &mut chain)?;
        }

        let scope = if internal {
            Vec::new()
        } else {
            self.scope(transition.kind(), &sources, &chain)
        };

        debug!(
            transition = %transition_label(self.graph, transition),
            targets = chain.targets.len(),
            "resolved transition leg"
        );

        Ok(Leg {
            transition: transition.id(),
            kind: transition.kind(),
            sources,
            scope,
            chain,
            join,
        })
    }

    /// Follow pseudostates from `node` until resting targets are reached.
    pub fn follow(&self, node: NodeId, chain: &mut Chain) -> Result<(), MachineError> {
        let state = self.graph.node(node);
        let StateKind::Pseudo(kind) = state.kind() else {
            chain.targets.push(node);
            return Ok(());
        };

        match kind {
            PseudoKind::End => {
                chain.targets.push(node);
                Ok(())
            }
            PseudoKind::Choice | PseudoKind::Junction => {
                chain.visited.push(node);
                for transition in self.graph.outgoing(node) {
                    if self.passes(transition)? {
                        return self.take(transition, chain);
                    }
                }
                Err(MachineError::NoBranch {
                    pseudostate: state.id().name().to_string(),
                })
            }
            PseudoKind::Fork => {
                chain.visited.push(node);
                for transition in self.graph.outgoing(node) {
                    self.take(transition, chain)?;
                }
                Ok(())
            }
            PseudoKind::Entry | PseudoKind::Exit => {
                chain.visited.push(node);
                match self.graph.outgoing(node).next() {
                    Some(transition) => self.take(transition, chain),
                    None => Err(MachineError::NoBranch {
                        pseudostate: state.id().name().to_string(),
                    }),
                }
            }
            PseudoKind::HistoryShallow | PseudoKind::HistoryDeep => {
                chain.visited.push(node);
                if let Some(record) = self.config.history().get(state.id()) {
                    let recorded: Vec<NodeId> = match kind {
                        PseudoKind::HistoryShallow => record.shallow().into_iter().collect::<Vec<_>>(),
                        _ => record.deep().iter().collect(),
                    }
                    .into_iter()
                    .filter_map(|id| self.graph.lookup(id))
                    .collect();
                    if !recorded.is_empty() {
                        chain.targets.extend(recorded);
                        return Ok(());
                    }
                }
                match self.graph.outgoing(node).next() {
                    Some(transition) => self.take(transition, chain),
                    None => self.follow_initial(state.region(), chain),
                }
            }
            PseudoKind::Join => Err(MachineError::NoBranch {
                pseudostate: state.id().name().to_string(),
            }),
        }
    }

    fn take(
        &self,
        transition: &TransitionDef<S, E>,
        chain: &mut Chain,
    ) -> Result<(), MachineError> {
        chain.steps.push(Step::Transition(transition.id()));
        match transition.target() {
            Some(target) => self.follow(target, chain),
            None => Ok(()),
        }
    }

    /// Follow a region's initial transition.
    pub fn follow_initial(&self, region: RegionId, chain: &mut Chain) -> Result<(), MachineError> {
        let Some(initial) = self.graph.region(region).initial() else {
            return Err(MachineError::NoBranch {
                pseudostate: format!("initial of {}", self.graph.region_label(region)),
            });
        };
        chain.steps.push(Step::Initial(region));
        self.follow(initial.target(), chain)
    }

    fn scope(&self, kind: TransitionKind, sources: &[NodeId], chain: &Chain) -> Vec<RegionId> {
        if kind == TransitionKind::Local {
            if let Some(scope) = self.local_scope(sources[0], chain) {
                return scope;
            }
        }
        let mut ends: Vec<NodeId> = sources.to_vec();
        ends.extend(&chain.visited);
        ends.extend(&chain.targets);
        vec![self.graph.common_region(&ends)]
    }

    /// Local transitions stay inside a composite end: the source's regions
    /// holding the targets, or the target's region holding the source.
    fn local_scope(&self, source: NodeId, chain: &Chain) -> Option<Vec<RegionId>> {
        let inner: Vec<NodeId> = chain
            .visited
            .iter()
            .chain(&chain.targets)
            .copied()
            .collect();

        if !inner.is_empty() && inner.iter().all(|n| self.graph.is_ancestor(source, *n)) {
            let regions = self
                .graph
                .node(source)
                .regions()
                .iter()
                .copied()
                .filter(|r| inner.iter().any(|n| self.graph.region_contains(*r, *n)))
                .collect();
            return Some(regions);
        }

        if let ([target], true) = (chain.targets.as_slice(), chain.visited.is_empty()) {
            if self.graph.is_ancestor(*target, source) {
                return self
                    .graph
                    .node(*target)
                    .regions()
                    .iter()
                    .copied()
                    .find(|r| self.graph.region_contains(*r, source))
                    .map(|r| vec![r]);
            }
        }
        None
    }

    /// Active nodes a leg exits, plus its sources.
    fn footprint(&self, leg: &Leg) -> Vec<NodeId> {
        let mut nodes = leg.sources.clone();
        for region in &leg.scope {
            nodes.extend(self.config.subtree(self.graph, *region));
        }
        nodes
    }
}
