//! Bookkeeping for JOIN pseudostates.

use crate::core::{Event, State};
use crate::graph::{NodeId, StateGraph};
use crate::runtime::config::ActiveConfiguration;
use std::collections::{BTreeSet, HashMap};

/// Progress of one join.
#[derive(Clone, Debug, Default, PartialEq)]
struct Progress {
    /// Sources not reached yet.
    remaining: BTreeSet<NodeId>,
    /// Sources that were active when the join last fired. They count again
    /// only after being left and reached anew.
    held: BTreeSet<NodeId>,
}

/// Join sources that have not been reached yet, per join.
///
/// A join is tracked while the orthogonal state owning its sources is
/// active. Sources are ticked off as they become active; once none are left
/// the join's outgoing transition may fire as a completion transition. A
/// join fires once per completion: [`consume`](Self::consume) re-arms it.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct JoinTracker {
    pending: HashMap<NodeId, Progress>,
}

impl JoinTracker {
    /// Update every join after a committed step. `entered` lists the nodes
    /// entered by that step; re-entering a join's owner starts it over.
    pub fn observe<S: State, E: Event>(
        &mut self,
        graph: &StateGraph<S, E>,
        config: &ActiveConfiguration<S>,
        entered: &[NodeId],
    ) {
        for join in graph.joins() {
            let Some(owner) = join
                .join_sources()
                .first()
                .and_then(|source| graph.parent(*source))
            else {
                continue;
            };
            if !config.is_active(graph, owner) {
                self.pending.remove(&join.node());
                continue;
            }
            if entered.contains(&owner) {
                self.pending.remove(&join.node());
            }
            let progress = self
                .pending
                .entry(join.node())
                .or_insert_with(|| Progress {
                    remaining: join.join_sources().iter().copied().collect(),
                    held: BTreeSet::new(),
                });
            progress
                .held
                .retain(|source| config.is_active(graph, *source));
            let held = &progress.held;
            progress
                .remaining
                .retain(|source| held.contains(source) || !config.is_active(graph, *source));
        }
    }

    pub fn is_complete(&self, join: NodeId) -> bool {
        self.pending
            .get(&join)
            .is_some_and(|progress| progress.remaining.is_empty())
    }

    /// Re-arm `join` after its outgoing leg was attempted, committed or not.
    /// Sources still active must be left and reached again before it fires
    /// once more.
    pub fn consume<S: State, E: Event>(
        &mut self,
        graph: &StateGraph<S, E>,
        config: &ActiveConfiguration<S>,
        join: NodeId,
    ) {
        let Some(progress) = self.pending.get_mut(&join) else {
            return;
        };
        let sources = graph.node(join).join_sources();
        progress.remaining = sources.iter().copied().collect();
        progress.held = sources
            .iter()
            .copied()
            .filter(|source| config.is_active(graph, *source))
            .collect();
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{on_event, JoinBuilder, RegionBuilder, StateGraphBuilder};
    use crate::{event_enum, state_enum};

    state_enum! {
        enum S { Idle, Work, X1, X2, Y1, Y2, J, Done }
    }

    event_enum! {
        enum E { Start, FinishX, FinishY }
    }

    fn graph() -> StateGraph<S, E> {
        StateGraphBuilder::new()
            .region(
                RegionBuilder::top()
                    .initial(S::Idle)
                    .state(S::Idle)
                    .state(S::Work)
                    .state(S::Done)
                    .join(JoinBuilder::new(S::J).source(S::X2).source(S::Y2).target(S::Done)),
            )
            .region(RegionBuilder::within(S::Work).initial(S::X1).state(S::X1).state(S::X2))
            .region(RegionBuilder::within(S::Work).initial(S::Y1).state(S::Y1).state(S::Y2))
            .transition(on_event(S::Idle, S::Work, E::Start))
            .transition(on_event(S::X1, S::X2, E::FinishX))
            .transition(on_event(S::Y1, S::Y2, E::FinishY))
            .build()
            .unwrap()
    }

    fn activate(graph: &StateGraph<S, E>, ids: &[S]) -> ActiveConfiguration<S> {
        let mut config = ActiveConfiguration::new();
        for id in ids {
            let node = graph.lookup(id).unwrap();
            config.set(graph.node(node).region(), node);
        }
        config
    }

    #[test]
    fn join_completes_once_every_source_was_reached() {
        let graph = graph();
        let join = graph.lookup(&S::J).unwrap();
        let mut tracker = JoinTracker::default();

        tracker.observe(&graph, &activate(&graph, &[S::Work, S::X1, S::Y1]), &[]);
        assert!(!tracker.is_complete(join));

        tracker.observe(&graph, &activate(&graph, &[S::Work, S::X2, S::Y1]), &[]);
        assert!(!tracker.is_complete(join));

        tracker.observe(&graph, &activate(&graph, &[S::Work, S::X2, S::Y2]), &[]);
        assert!(tracker.is_complete(join));
    }

    #[test]
    fn leaving_the_owner_forgets_progress() {
        let graph = graph();
        let join = graph.lookup(&S::J).unwrap();
        let mut tracker = JoinTracker::default();

        tracker.observe(&graph, &activate(&graph, &[S::Work, S::X2, S::Y1]), &[]);
        tracker.observe(&graph, &activate(&graph, &[S::Idle]), &[]);
        tracker.observe(&graph, &activate(&graph, &[S::Work, S::X1, S::Y2]), &[]);
        assert!(!tracker.is_complete(join));
    }

    #[test]
    fn reentering_the_owner_starts_over() {
        let graph = graph();
        let join = graph.lookup(&S::J).unwrap();
        let work = graph.lookup(&S::Work).unwrap();
        let mut tracker = JoinTracker::default();

        tracker.observe(&graph, &activate(&graph, &[S::Work, S::X2, S::Y1]), &[]);
        tracker.observe(&graph, &activate(&graph, &[S::Work, S::X1, S::Y2]), &[work]);
        assert!(!tracker.is_complete(join));

        tracker.reset();
        assert!(!tracker.is_complete(join));
    }

    #[test]
    fn consumed_join_waits_for_sources_to_be_reached_again() {
        let graph = graph();
        let join = graph.lookup(&S::J).unwrap();
        let mut tracker = JoinTracker::default();

        let reached = activate(&graph, &[S::Work, S::X2, S::Y2]);
        tracker.observe(&graph, &reached, &[]);
        assert!(tracker.is_complete(join));

        tracker.consume(&graph, &reached, join);
        assert!(!tracker.is_complete(join));
        tracker.observe(&graph, &reached, &[]);
        assert!(!tracker.is_complete(join));

        // Y leaves and comes back; X never left.
        tracker.observe(&graph, &activate(&graph, &[S::Work, S::X2, S::Y1]), &[]);
        tracker.observe(&graph, &reached, &[]);
        assert!(!tracker.is_complete(join));

        tracker.observe(&graph, &activate(&graph, &[S::Work, S::X1, S::Y2]), &[]);
        tracker.observe(&graph, &reached, &[]);
        assert!(tracker.is_complete(join));
    }
}
