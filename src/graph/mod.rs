//! Immutable, validated description of a state machine.
//!
//! A [`StateGraph`] is an arena of nodes (states and pseudostates), regions
//! and transitions, addressed by small copyable indices. It is assembled by
//! [`crate::builder::StateGraphBuilder`], checked by [`crate::verify`], and
//! never changes afterwards; every running machine shares it read-only.
//!
//! Regions form a tree: the top region has no owner, every other region is
//! owned by a COMPOSITE (one region) or ORTHOGONAL (two or more) state.

mod transition;

pub use transition::{TransitionDef, TransitionId, TransitionKind};

use crate::core::{Action, Event, State};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Index of a node (state or pseudostate) inside its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Index of a region inside its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub(crate) usize);

impl RegionId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Pseudostate flavours.
///
/// A region's INITIAL pseudostate has no id of its own and is kept on the
/// region as an [`InitialTransition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PseudoKind {
    Choice,
    Junction,
    Fork,
    Join,
    HistoryShallow,
    HistoryDeep,
    Entry,
    Exit,
    /// Final state. Unlike the others it can be active; reaching it in the
    /// top region completes the machine.
    End,
}

/// What a history pseudostate restores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryKind {
    /// Only the region's direct child that was last active.
    Shallow,
    /// The whole active subtree recorded at exit.
    Deep,
}

impl From<HistoryKind> for PseudoKind {
    fn from(kind: HistoryKind) -> Self {
        match kind {
            HistoryKind::Shallow => PseudoKind::HistoryShallow,
            HistoryKind::Deep => PseudoKind::HistoryDeep,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKind {
    Simple,
    Composite,
    Orthogonal,
    Pseudo(PseudoKind),
}

impl StateKind {
    /// Whether a node of this kind can be part of the active configuration.
    pub fn is_resting(&self) -> bool {
        !matches!(self, Self::Pseudo(kind) if *kind != PseudoKind::End)
    }

    pub fn is_pseudo(&self) -> bool {
        matches!(self, Self::Pseudo(_))
    }

    pub fn is_history(&self) -> bool {
        matches!(
            self,
            Self::Pseudo(PseudoKind::HistoryShallow | PseudoKind::HistoryDeep)
        )
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::Pseudo(PseudoKind::End))
    }
}

/// A state or pseudostate.
pub struct StateNode<S: State, E: Event> {
    pub(crate) id: S,
    pub(crate) node: NodeId,
    pub(crate) kind: StateKind,
    pub(crate) region: RegionId,
    pub(crate) regions: Vec<RegionId>,
    pub(crate) entry_actions: Vec<Action<S, E>>,
    pub(crate) exit_actions: Vec<Action<S, E>>,
    pub(crate) state_actions: Vec<Action<S, E>>,
    pub(crate) deferred: HashSet<E>,
    pub(crate) outgoing: Vec<TransitionId>,
    pub(crate) join_sources: Vec<NodeId>,
    pub(crate) depth: usize,
}

impl<S: State, E: Event> StateNode<S, E> {
    pub fn id(&self) -> &S {
        &self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    /// Region this node belongs to.
    pub fn region(&self) -> RegionId {
        self.region
    }

    /// Child regions, in declaration order.
    pub fn regions(&self) -> &[RegionId] {
        &self.regions
    }

    pub fn entry_actions(&self) -> &[Action<S, E>] {
        &self.entry_actions
    }

    pub fn exit_actions(&self) -> &[Action<S, E>] {
        &self.exit_actions
    }

    pub fn state_actions(&self) -> &[Action<S, E>] {
        &self.state_actions
    }

    pub fn defers(&self, event: &E) -> bool {
        self.deferred.contains(event)
    }

    /// Outgoing transitions in declaration order.
    pub fn outgoing(&self) -> &[TransitionId] {
        &self.outgoing
    }

    /// Source states of a JOIN pseudostate.
    pub fn join_sources(&self) -> &[NodeId] {
        &self.join_sources
    }

    /// Number of regions between this node and the top region.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl<S: State, E: Event> fmt::Debug for StateNode<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("region", &self.region)
            .field("regions", &self.regions)
            .field("outgoing", &self.outgoing)
            .finish()
    }
}

/// The transition out of a region's INITIAL pseudostate.
pub struct InitialTransition<S: State, E: Event> {
    pub(crate) target: NodeId,
    pub(crate) action: Option<Action<S, E>>,
}

impl<S: State, E: Event> InitialTransition<S, E> {
    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn action(&self) -> Option<&Action<S, E>> {
        self.action.as_ref()
    }
}

/// An ordered set of states active one at a time.
pub struct Region<S: State, E: Event> {
    pub(crate) id: RegionId,
    pub(crate) owner: Option<NodeId>,
    pub(crate) states: Vec<NodeId>,
    pub(crate) initial: Option<InitialTransition<S, E>>,
    pub(crate) history: Option<NodeId>,
    pub(crate) depth: usize,
}

impl<S: State, E: Event> Region<S, E> {
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Owning composite/orthogonal state; `None` for the top region.
    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    pub fn states(&self) -> &[NodeId] {
        &self.states
    }

    pub fn initial(&self) -> Option<&InitialTransition<S, E>> {
        self.initial.as_ref()
    }

    pub fn history(&self) -> Option<NodeId> {
        self.history
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Built, validated and immutable state graph.
pub struct StateGraph<S: State, E: Event> {
    pub(crate) nodes: Vec<StateNode<S, E>>,
    pub(crate) index: HashMap<S, NodeId>,
    pub(crate) regions: Vec<Region<S, E>>,
    pub(crate) transitions: Vec<TransitionDef<S, E>>,
    pub(crate) root: RegionId,
}

impl<S: State, E: Event> StateGraph<S, E> {
    pub fn root(&self) -> RegionId {
        self.root
    }

    pub fn lookup(&self, id: &S) -> Option<NodeId> {
        self.index.get(id).copied()
    }

    pub fn node(&self, node: NodeId) -> &StateNode<S, E> {
        &self.nodes[node.0]
    }

    pub fn state(&self, id: &S) -> Option<&StateNode<S, E>> {
        self.lookup(id).map(|node| self.node(node))
    }

    pub fn region(&self, region: RegionId) -> &Region<S, E> {
        &self.regions[region.0]
    }

    pub fn transition(&self, transition: TransitionId) -> &TransitionDef<S, E> {
        &self.transitions[transition.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &StateNode<S, E>> {
        self.nodes.iter()
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region<S, E>> {
        self.regions.iter()
    }

    pub fn transitions(&self) -> impl Iterator<Item = &TransitionDef<S, E>> {
        self.transitions.iter()
    }

    pub fn outgoing(&self, node: NodeId) -> impl Iterator<Item = &TransitionDef<S, E>> {
        self.node(node)
            .outgoing
            .iter()
            .map(move |t| self.transition(*t))
    }

    /// Composite/orthogonal state owning the node's region.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.region(self.node(node).region).owner
    }

    /// Regions from the top region down to (and including) the node's own.
    pub fn region_path(&self, node: NodeId) -> Vec<RegionId> {
        let mut path = Vec::new();
        let mut current = Some(node);
        while let Some(n) = current {
            let region = self.node(n).region;
            path.push(region);
            current = self.region(region).owner;
        }
        path.reverse();
        path
    }

    /// Whether `ancestor` strictly contains `node`.
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.parent(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    /// Whether `node` lies anywhere inside `region` (directly or nested).
    pub fn region_contains(&self, region: RegionId, node: NodeId) -> bool {
        self.child_on_path(region, node).is_some()
    }

    /// The node of `region` that is `node` itself or contains it.
    pub fn child_on_path(&self, region: RegionId, node: NodeId) -> Option<NodeId> {
        let mut current = node;
        loop {
            if self.node(current).region == region {
                return Some(current);
            }
            current = self.parent(current)?;
        }
    }

    /// Deepest region containing every node in `nodes`.
    pub fn common_region(&self, nodes: &[NodeId]) -> RegionId {
        let mut paths = nodes.iter().map(|n| self.region_path(*n));
        let Some(mut common) = paths.next() else {
            return self.root;
        };
        for path in paths {
            let shared = common
                .iter()
                .zip(path.iter())
                .take_while(|(a, b)| a == b)
                .count();
            common.truncate(shared);
        }
        common.last().copied().unwrap_or(self.root)
    }

    /// Human readable name of a region, for diagnostics.
    pub fn region_label(&self, region: RegionId) -> String {
        match self.region(region).owner {
            None => "top".to_string(),
            Some(owner) => {
                let node = self.node(owner);
                let position = node.regions.iter().position(|r| *r == region).unwrap_or(0);
                if node.regions.len() > 1 {
                    format!("{}[{}]", node.id.name(), position)
                } else {
                    node.id.name().to_string()
                }
            }
        }
    }

    /// Every JOIN pseudostate.
    pub fn joins(&self) -> impl Iterator<Item = &StateNode<S, E>> {
        self.nodes
            .iter()
            .filter(|n| n.kind == StateKind::Pseudo(PseudoKind::Join))
    }
}

impl<S: State, E: Event> fmt::Debug for StateGraph<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateGraph")
            .field("nodes", &self.nodes)
            .field("regions", &self.regions.len())
            .field("transitions", &self.transitions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{RegionBuilder, StateGraphBuilder, TransitionBuilder};
    use crate::{event_enum, state_enum};

    state_enum! {
        enum S { Top, A, A1, A2, B, B1, C }
    }

    event_enum! {
        enum E { Go }
    }

    fn graph() -> StateGraph<S, E> {
        StateGraphBuilder::new()
            .region(RegionBuilder::top().initial(S::Top).state(S::Top).state(S::C))
            .region(RegionBuilder::within(S::Top).initial(S::A).state(S::A).state(S::B))
            .region(RegionBuilder::within(S::A).initial(S::A1).state(S::A1).state(S::A2))
            .region(RegionBuilder::within(S::B).initial(S::B1).state(S::B1))
            .transition(
                TransitionBuilder::external()
                    .source(S::A1)
                    .target(S::C)
                    .event(E::Go),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn kinds_are_derived_from_regions() {
        let graph = graph();
        assert_eq!(graph.state(&S::Top).unwrap().kind(), StateKind::Composite);
        assert_eq!(graph.state(&S::A).unwrap().kind(), StateKind::Composite);
        assert_eq!(graph.state(&S::A1).unwrap().kind(), StateKind::Simple);
        assert_eq!(graph.state(&S::C).unwrap().kind(), StateKind::Simple);
    }

    #[test]
    fn region_path_runs_from_top() {
        let graph = graph();
        let a1 = graph.lookup(&S::A1).unwrap();
        let path = graph.region_path(a1);
        assert_eq!(path.len(), 3);
        assert_eq!(path[0], graph.root());
        assert_eq!(graph.node(a1).depth(), 2);
    }

    #[test]
    fn ancestry_queries() {
        let graph = graph();
        let top = graph.lookup(&S::Top).unwrap();
        let a = graph.lookup(&S::A).unwrap();
        let a1 = graph.lookup(&S::A1).unwrap();
        let b1 = graph.lookup(&S::B1).unwrap();

        assert!(graph.is_ancestor(top, a1));
        assert!(graph.is_ancestor(a, a1));
        assert!(!graph.is_ancestor(a, b1));
        assert!(!graph.is_ancestor(a1, a1));
        assert_eq!(graph.parent(a1), Some(a));
        assert_eq!(graph.child_on_path(graph.root(), a1), Some(top));
    }

    #[test]
    fn common_region_is_deepest_shared() {
        let graph = graph();
        let a1 = graph.lookup(&S::A1).unwrap();
        let a2 = graph.lookup(&S::A2).unwrap();
        let b1 = graph.lookup(&S::B1).unwrap();
        let c = graph.lookup(&S::C).unwrap();

        assert_eq!(graph.common_region(&[a1, a2]), graph.node(a1).region());
        let top_region = graph.node(graph.lookup(&S::A).unwrap()).region();
        assert_eq!(graph.common_region(&[a1, b1]), top_region);
        assert_eq!(graph.common_region(&[a1, c]), graph.root());
    }

    #[test]
    fn end_is_resting_but_choice_is_not() {
        assert!(StateKind::Pseudo(PseudoKind::End).is_resting());
        assert!(!StateKind::Pseudo(PseudoKind::Choice).is_resting());
        assert!(StateKind::Simple.is_resting());
        assert!(StateKind::Pseudo(PseudoKind::HistoryDeep).is_history());
    }
}
