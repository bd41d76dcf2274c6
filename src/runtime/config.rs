//! The live tree of active states.

use crate::core::{Event, HistoryRecords, State};
use crate::graph::{NodeId, RegionId, StateGraph};
use std::collections::BTreeMap;

/// One active node per active region, plus history records.
///
/// A region is active exactly when its owner is active (the top region
/// whenever the machine has been started). Only the executor mutates a
/// configuration, and only on a working copy that replaces the live one once
/// a transition leg has fully succeeded.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveConfiguration<S: State> {
    active: BTreeMap<RegionId, NodeId>,
    history: HistoryRecords<S>,
}

impl<S: State> Default for ActiveConfiguration<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State> ActiveConfiguration<S> {
    pub fn new() -> Self {
        Self {
            active: BTreeMap::new(),
            history: HistoryRecords::new(),
        }
    }

    /// `true` before the machine entered its initial configuration.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn active_in(&self, region: RegionId) -> Option<NodeId> {
        self.active.get(&region).copied()
    }

    pub fn is_active<E: Event>(&self, graph: &StateGraph<S, E>, node: NodeId) -> bool {
        self.active_in(graph.node(node).region()) == Some(node)
    }

    /// Every active node, in region order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.active.values().copied()
    }

    /// Active nodes without an active child region, deepest first.
    pub fn leaves<E: Event>(&self, graph: &StateGraph<S, E>) -> Vec<NodeId> {
        let mut leaves: Vec<NodeId> = self
            .nodes()
            .filter(|n| {
                graph
                    .node(*n)
                    .regions()
                    .iter()
                    .all(|r| !self.active.contains_key(r))
            })
            .collect();
        leaves.sort_by_key(|n| (std::cmp::Reverse(graph.node(*n).depth()), *n));
        leaves
    }

    /// Active nodes inside `region` (its active child first), pre-order.
    pub fn subtree<E: Event>(&self, graph: &StateGraph<S, E>, region: RegionId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect(graph, region, &mut out);
        out
    }

    fn collect<E: Event>(&self, graph: &StateGraph<S, E>, region: RegionId, out: &mut Vec<NodeId>) {
        if let Some(node) = self.active_in(region) {
            out.push(node);
            for child in graph.node(node).regions() {
                self.collect(graph, *child, out);
            }
        }
    }

    /// Ids of every active state, top region first.
    pub fn state_ids<E: Event>(&self, graph: &StateGraph<S, E>) -> Vec<S> {
        self.subtree(graph, graph.root())
            .into_iter()
            .map(|n| graph.node(n).id().clone())
            .collect()
    }

    /// Whether the state with this id is active.
    pub fn contains<E: Event>(&self, graph: &StateGraph<S, E>, id: &S) -> bool {
        graph
            .lookup(id)
            .is_some_and(|node| self.is_active(graph, node))
    }

    pub fn history(&self) -> &HistoryRecords<S> {
        &self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut HistoryRecords<S> {
        &mut self.history
    }

    pub(crate) fn set(&mut self, region: RegionId, node: NodeId) {
        self.active.insert(region, node);
    }

    pub(crate) fn clear_region(&mut self, region: RegionId) {
        self.active.remove(&region);
    }

    pub(crate) fn clear(&mut self) {
        self.active.clear();
    }
}
