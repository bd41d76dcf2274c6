//! Builder assembling regions, nodes and transitions into a [`StateGraph`].

use crate::builder::error::BuildError;
use crate::builder::region::{ChoiceBuilder, NodeDecl, RegionBuilder};
use crate::builder::transition::{TransitionBuilder, TransitionParts};
use crate::core::{Action, Event, Guard, State};
use crate::graph::{
    InitialTransition, NodeId, PseudoKind, Region, RegionId, StateGraph, StateKind, StateNode,
    TransitionDef, TransitionId, TransitionKind,
};
use crate::verify::{self, ConfigurationError, GraphViolation};
use std::collections::{HashMap, HashSet};

/// Builder for a state graph with a fluent API.
///
/// Nothing is checked until [`build`](Self::build), which reports every
/// structural problem at once.
///
/// # Example
///
/// ```
/// use statechart::builder::{RegionBuilder, StateGraphBuilder, TransitionBuilder};
/// use statechart::{event_enum, state_enum};
///
/// state_enum! { enum Door { Open, Closed } }
/// event_enum! { enum Cmd { Close, Open } }
///
/// let graph = StateGraphBuilder::new()
///     .region(RegionBuilder::top().initial(Door::Open).state(Door::Open).state(Door::Closed))
///     .transition(
///         TransitionBuilder::external()
///             .source(Door::Open)
///             .target(Door::Closed)
///             .event(Cmd::Close),
///     )
///     .transition(
///         TransitionBuilder::external()
///             .source(Door::Closed)
///             .target(Door::Open)
///             .event(Cmd::Open),
///     )
///     .build()
///     .unwrap();
///
/// assert_eq!(graph.transitions().count(), 2);
/// ```
pub struct StateGraphBuilder<S: State, E: Event> {
    regions: Vec<RegionBuilder<S, E>>,
    transitions: Vec<TransitionBuilder<S, E>>,
}

impl<S: State, E: Event> StateGraphBuilder<S, E> {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// Add a region with its nodes.
    pub fn region(mut self, region: RegionBuilder<S, E>) -> Self {
        self.regions.push(region);
        self
    }

    /// Add a transition.
    pub fn transition(mut self, transition: TransitionBuilder<S, E>) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Add several transitions at once.
    pub fn transitions(
        mut self,
        transitions: impl IntoIterator<Item = TransitionBuilder<S, E>>,
    ) -> Self {
        self.transitions.extend(transitions);
        self
    }

    /// Assemble and validate the graph.
    pub fn build(self) -> Result<StateGraph<S, E>, BuildError> {
        let transitions = self
            .transitions
            .into_iter()
            .map(TransitionBuilder::into_parts)
            .collect::<Result<Vec<_>, _>>()?;

        for region in &self.regions {
            for node in &region.nodes {
                if let NodeDecl::Join(join) = node {
                    if join.target.is_none() {
                        return Err(BuildError::MissingJoinTarget {
                            join: join.id.name().to_string(),
                        });
                    }
                }
            }
        }

        let graph = Assembly::new().run(self.regions, transitions)?;
        verify::verify(&graph).map_err(BuildError::from)?;
        Ok(graph)
    }
}

impl<S: State, E: Event> Default for StateGraphBuilder<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Outgoing transition of a pseudostate, resolved once all ids are known.
struct PendingEdge<S: State, E: Event> {
    source: NodeId,
    target: S,
    guard: Option<Guard<S, E>>,
    actions: Vec<Action<S, E>>,
}

fn branches<S: State, E: Event>(
    source: NodeId,
    choice: ChoiceBuilder<S, E>,
) -> impl Iterator<Item = PendingEdge<S, E>> {
    choice.branches.into_iter().map(move |branch| PendingEdge {
        source,
        target: branch.target,
        guard: branch.guard,
        actions: branch.actions,
    })
}

struct Assembly<S: State, E: Event> {
    nodes: Vec<StateNode<S, E>>,
    index: HashMap<S, NodeId>,
    regions: Vec<Region<S, E>>,
    transitions: Vec<TransitionDef<S, E>>,
    violations: Vec<GraphViolation>,
}

impl<S: State, E: Event> Assembly<S, E> {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            regions: Vec::new(),
            transitions: Vec::new(),
            violations: Vec::new(),
        }
    }

    fn run(
        mut self,
        builders: Vec<RegionBuilder<S, E>>,
        parts: Vec<TransitionParts<S, E>>,
    ) -> Result<StateGraph<S, E>, ConfigurationError> {
        let tops: Vec<usize> = builders
            .iter()
            .enumerate()
            .filter(|(_, r)| r.owner.is_none())
            .map(|(i, _)| i)
            .collect();
        let root = match tops.as_slice() {
            [] => {
                self.violations.push(GraphViolation::MissingTopRegion);
                RegionId(0)
            }
            [only] => RegionId(*only),
            _ => {
                self.violations.push(GraphViolation::MultipleTopRegions);
                RegionId(tops[0])
            }
        };

        let mut owners = Vec::with_capacity(builders.len());
        let mut initials = Vec::with_capacity(builders.len());
        let mut edges = Vec::new();
        let mut joins = Vec::new();

        for (index, builder) in builders.into_iter().enumerate() {
            let region = RegionId(index);
            self.regions.push(Region {
                id: region,
                owner: None,
                states: Vec::new(),
                initial: None,
                history: None,
                depth: 0,
            });
            owners.push(builder.owner);
            initials.push(builder.initial);
            for decl in builder.nodes {
                self.declare(region, decl, &mut edges, &mut joins);
            }
        }

        self.attach_regions(owners);
        self.compute_depths(root);

        for (index, initial) in initials.into_iter().enumerate() {
            if let Some((target, action)) = initial {
                if let Some(target) = self.resolve(&target, "initial transition") {
                    self.regions[index].initial = Some(InitialTransition { target, action });
                }
            }
        }

        for (join, sources) in joins {
            let ids: Vec<NodeId> = sources
                .iter()
                .filter_map(|s| self.resolve(s, "join source"))
                .collect();
            self.nodes[join.0].join_sources = ids;
        }

        for edge in edges {
            if let Some(target) = self.resolve(&edge.target, "pseudostate branch") {
                self.push_transition(TransitionDef {
                    id: TransitionId(0),
                    name: None,
                    source: edge.source,
                    target: Some(target),
                    event: None,
                    guard: edge.guard,
                    actions: edge.actions,
                    error_action: None,
                    kind: TransitionKind::External,
                });
            }
        }

        for part in parts {
            let source = self.resolve(&part.source, "transition source");
            let target = match &part.target {
                Some(target) => self.resolve(target, "transition target").map(Some),
                None => source.map(|_| None),
            };
            if let (Some(source), Some(target)) = (source, target) {
                self.push_transition(TransitionDef {
                    id: TransitionId(0),
                    name: part.name,
                    source,
                    target,
                    event: part.event,
                    guard: part.guard,
                    actions: part.actions,
                    error_action: part.error_action,
                    kind: part.kind,
                });
            }
        }

        if !self.violations.is_empty() {
            return Err(ConfigurationError::new(self.violations));
        }

        Ok(StateGraph {
            nodes: self.nodes,
            index: self.index,
            regions: self.regions,
            transitions: self.transitions,
            root,
        })
    }

    fn declare(
        &mut self,
        region: RegionId,
        decl: NodeDecl<S, E>,
        edges: &mut Vec<PendingEdge<S, E>>,
        joins: &mut Vec<(NodeId, Vec<S>)>,
    ) {
        let id = decl.id().clone();
        if self.index.contains_key(&id) {
            self.violations.push(GraphViolation::DuplicateState {
                state: id.name().to_string(),
            });
            return;
        }

        let node = NodeId(self.nodes.len());
        let mut entry_actions = Vec::new();
        let mut exit_actions = Vec::new();
        let mut state_actions = Vec::new();
        let mut deferred = HashSet::new();

        let edge = |target: S| PendingEdge {
            source: node,
            target,
            guard: None,
            actions: Vec::new(),
        };

        let kind = match decl {
            NodeDecl::State(state) => {
                entry_actions = state.entry;
                exit_actions = state.exit;
                state_actions = state.state_actions;
                deferred = state.deferred.into_iter().collect();
                StateKind::Simple
            }
            NodeDecl::Choice(choice) => {
                edges.extend(branches(node, choice));
                StateKind::Pseudo(PseudoKind::Choice)
            }
            NodeDecl::Junction(junction) => {
                edges.extend(branches(node, junction));
                StateKind::Pseudo(PseudoKind::Junction)
            }
            NodeDecl::Fork(fork) => {
                edges.extend(fork.targets.into_iter().map(edge));
                StateKind::Pseudo(PseudoKind::Fork)
            }
            NodeDecl::Join(join) => {
                if let Some(target) = join.target {
                    edges.push(PendingEdge {
                        source: node,
                        target,
                        guard: join.guard,
                        actions: join.actions,
                    });
                }
                joins.push((node, join.sources));
                StateKind::Pseudo(PseudoKind::Join)
            }
            NodeDecl::History {
                kind,
                default,
                ..
            } => {
                edges.extend(default.into_iter().map(edge));
                if self.regions[region.0].history.is_none() {
                    self.regions[region.0].history = Some(node);
                }
                StateKind::Pseudo(kind.into())
            }
            NodeDecl::Entry { target, .. } => {
                edges.push(edge(target));
                StateKind::Pseudo(PseudoKind::Entry)
            }
            NodeDecl::Exit { target, .. } => {
                edges.push(edge(target));
                StateKind::Pseudo(PseudoKind::Exit)
            }
            NodeDecl::End(_) => StateKind::Pseudo(PseudoKind::End),
        };

        self.index.insert(id.clone(), node);
        self.regions[region.0].states.push(node);
        self.nodes.push(StateNode {
            id,
            node,
            kind,
            region,
            regions: Vec::new(),
            entry_actions,
            exit_actions,
            state_actions,
            deferred,
            outgoing: Vec::new(),
            join_sources: Vec::new(),
            depth: 0,
        });
    }

    fn attach_regions(&mut self, owners: Vec<Option<S>>) {
        for (index, owner) in owners.into_iter().enumerate() {
            let Some(owner) = owner else { continue };
            let Some(node) = self.resolve(&owner, "region owner") else {
                continue;
            };
            if self.nodes[node.0].kind.is_pseudo() {
                self.violations.push(GraphViolation::PseudostateOwnsRegion {
                    state: owner.name().to_string(),
                });
                continue;
            }
            self.regions[index].owner = Some(node);
            let state = &mut self.nodes[node.0];
            state.regions.push(RegionId(index));
            state.kind = if state.regions.len() > 1 {
                StateKind::Orthogonal
            } else {
                StateKind::Composite
            };
        }
    }

    fn compute_depths(&mut self, root: RegionId) {
        for index in 0..self.regions.len() {
            let mut depth = 0;
            let mut current = RegionId(index);
            let mut cyclic = false;
            while let Some(owner) = self.regions[current.0].owner {
                depth += 1;
                current = self.nodes[owner.0].region;
                if depth > self.regions.len() {
                    cyclic = true;
                    break;
                }
            }
            if cyclic {
                let owner = self.regions[index]
                    .owner
                    .map(|n| self.nodes[n.0].id.name().to_string())
                    .unwrap_or_default();
                self.violations
                    .push(GraphViolation::RegionCycle { state: owner });
                continue;
            }
            if current != root && self.regions[index].owner.is_some() {
                // Nested under a second top region, already reported.
                continue;
            }
            self.regions[index].depth = depth;
        }
        for node in &mut self.nodes {
            node.depth = self.regions[node.region.0].depth;
        }
    }

    fn resolve(&mut self, id: &S, context: &'static str) -> Option<NodeId> {
        let found = self.index.get(id).copied();
        if found.is_none() {
            self.violations.push(GraphViolation::UnknownState {
                state: id.name().to_string(),
                context,
            });
        }
        found
    }

    fn push_transition(&mut self, mut transition: TransitionDef<S, E>) {
        let id = TransitionId(self.transitions.len());
        transition.id = id;
        self.nodes[transition.source.0].outgoing.push(id);
        self.transitions.push(transition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ForkBuilder, JoinBuilder};
    use crate::graph::HistoryKind;
    use crate::{event_enum, state_enum};

    state_enum! {
        enum S { A, B, C, O, R1A, R1B, R2A, R2B, Fork, Join, Choice, Hist }
    }

    event_enum! {
        enum E { Go }
    }

    fn go(source: S, target: S) -> TransitionBuilder<S, E> {
        TransitionBuilder::external()
            .source(source)
            .target(target)
            .event(E::Go)
    }

    fn violations(result: Result<StateGraph<S, E>, BuildError>) -> Vec<GraphViolation> {
        match result {
            Err(BuildError::Invalid(error)) => error.violations().to_vec(),
            Err(other) => panic!("unexpected build error: {other}"),
            Ok(_) => panic!("expected configuration error"),
        }
    }

    #[test]
    fn builds_flat_graph() {
        let graph = StateGraphBuilder::new()
            .region(RegionBuilder::top().initial(S::A).state(S::A).state(S::B))
            .transition(go(S::A, S::B))
            .build()
            .unwrap();

        let a = graph.lookup(&S::A).unwrap();
        assert_eq!(graph.region(graph.root()).initial().unwrap().target(), a);
        assert_eq!(graph.node(a).outgoing().len(), 1);
    }

    #[test]
    fn transition_builder_errors_surface_first() {
        let result = StateGraphBuilder::<S, E>::new()
            .region(RegionBuilder::top().initial(S::A).state(S::A))
            .transition(TransitionBuilder::external().source(S::A))
            .build();
        assert!(matches!(result, Err(BuildError::MissingTarget)));
    }

    #[test]
    fn join_without_target_is_rejected() {
        let result = StateGraphBuilder::<S, E>::new()
            .region(
                RegionBuilder::top()
                    .initial(S::A)
                    .state(S::A)
                    .join(JoinBuilder::new(S::Join).source(S::A)),
            )
            .build();
        assert!(matches!(result, Err(BuildError::MissingJoinTarget { .. })));
    }

    #[test]
    fn unknown_and_duplicate_states_accumulate() {
        let result = StateGraphBuilder::new()
            .region(RegionBuilder::top().initial(S::A).state(S::A).state(S::A))
            .transition(go(S::A, S::C))
            .transition(go(S::B, S::A))
            .build();

        let violations = violations(result);
        assert!(violations
            .iter()
            .any(|v| matches!(v, GraphViolation::DuplicateState { .. })));
        assert_eq!(
            violations
                .iter()
                .filter(|v| matches!(v, GraphViolation::UnknownState { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn missing_top_region_is_reported() {
        let result = StateGraphBuilder::<S, E>::new()
            .region(RegionBuilder::within(S::A).initial(S::B).state(S::B))
            .build();
        let violations = violations(result);
        assert!(violations.contains(&GraphViolation::MissingTopRegion));
    }

    #[test]
    fn pseudostate_edges_are_generated() {
        let graph = StateGraphBuilder::new()
            .region(
                RegionBuilder::top()
                    .initial(S::A)
                    .state(S::A)
                    .state(S::O)
                    .state(S::C)
                    .fork(ForkBuilder::new(S::Fork).target(S::R1B).target(S::R2B))
                    .join(
                        JoinBuilder::new(S::Join)
                            .source(S::R1B)
                            .source(S::R2B)
                            .target(S::C),
                    )
                    .choice(
                        ChoiceBuilder::new(S::Choice)
                            .first(S::B, Guard::never())
                            .last(S::C),
                    )
                    .state(S::B),
            )
            .region(RegionBuilder::within(S::O).initial(S::R1A).state(S::R1A).state(S::R1B))
            .region(RegionBuilder::within(S::O).initial(S::R2A).state(S::R2A).state(S::R2B))
            .transition(go(S::A, S::Fork))
            .transition(go(S::B, S::Choice))
            .build()
            .unwrap();

        let o = graph.state(&S::O).unwrap();
        assert_eq!(o.kind(), StateKind::Orthogonal);
        assert_eq!(o.regions().len(), 2);

        let fork = graph.lookup(&S::Fork).unwrap();
        assert_eq!(graph.node(fork).outgoing().len(), 2);

        let join = graph.state(&S::Join).unwrap();
        assert_eq!(join.join_sources().len(), 2);
        assert_eq!(join.outgoing().len(), 1);

        let choice = graph.lookup(&S::Choice).unwrap();
        let branches: Vec<_> = graph.outgoing(choice).collect();
        assert_eq!(branches.len(), 2);
        assert!(branches[0].guard().is_some());
        assert!(branches[1].guard().is_none());
        assert!(branches.iter().all(|t| t.is_completion()));
    }

    #[test]
    fn history_is_registered_on_its_region() {
        let graph = StateGraphBuilder::new()
            .region(RegionBuilder::top().initial(S::O).state(S::O).state(S::C))
            .region(
                RegionBuilder::within(S::O)
                    .initial(S::R1A)
                    .state(S::R1A)
                    .history(S::Hist, HistoryKind::Deep),
            )
            .transition(go(S::O, S::C))
            .transition(go(S::C, S::Hist))
            .build()
            .unwrap();

        let hist = graph.lookup(&S::Hist).unwrap();
        let region = graph.node(hist).region();
        assert_eq!(graph.region(region).history(), Some(hist));
        assert_eq!(
            graph.node(hist).kind(),
            StateKind::Pseudo(PseudoKind::HistoryDeep)
        );
    }
}
