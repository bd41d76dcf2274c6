//! Structural rules checked on every assembled graph.

use crate::core::{Event, State};
use crate::graph::{
    NodeId, PseudoKind, Region, StateGraph, StateKind, StateNode, TransitionDef, TransitionKind,
};
use crate::verify::violations::GraphViolation;
use std::collections::HashSet;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

type Check = Validation<(), NonEmptyVec<GraphViolation>>;

fn pass() -> Check {
    Validation::success(())
}

fn require(condition: bool, violation: impl FnOnce() -> GraphViolation) -> Check {
    if condition {
        pass()
    } else {
        Validation::fail(violation())
    }
}

fn all(checks: Vec<Check>) -> Check {
    Validation::all_vec(checks).map(|_| ())
}

/// Run every rule, accumulating ALL violations.
pub(crate) fn check_graph<S: State, E: Event>(graph: &StateGraph<S, E>) -> Check {
    let mut checks = vec![require(graph.transitions().next().is_some(), || {
        GraphViolation::NoTransitions
    })];

    checks.extend(graph.regions().map(|region| check_region(graph, region)));
    checks.extend(graph.nodes().map(|node| check_node(graph, node)));
    checks.extend(
        graph
            .transitions()
            .map(|transition| check_transition(graph, transition)),
    );
    checks.push(check_completion_cycles(graph));

    all(checks)
}

fn check_region<S: State, E: Event>(graph: &StateGraph<S, E>, region: &Region<S, E>) -> Check {
    let label = || graph.region_label(region.id());
    let mut checks = Vec::new();

    match region.initial() {
        None => checks.push(Validation::fail(GraphViolation::MissingInitial {
            region: label(),
        })),
        Some(initial) => {
            let target = graph.node(initial.target());
            checks.push(require(target.region() == region.id(), || {
                GraphViolation::InitialOutsideRegion {
                    region: label(),
                    target: target.id().name().to_string(),
                }
            }));
            checks.push(require(
                target.kind() != StateKind::Pseudo(PseudoKind::Join),
                || GraphViolation::TransitionIntoJoin {
                    pseudostate: target.id().name().to_string(),
                },
            ));
        }
    }

    let histories: Vec<&StateNode<S, E>> = region
        .states()
        .iter()
        .map(|n| graph.node(*n))
        .filter(|n| n.kind().is_history())
        .collect();
    checks.push(require(histories.len() <= 1, || {
        GraphViolation::MultipleHistory { region: label() }
    }));
    if region.owner().is_none() {
        checks.extend(histories.iter().map(|h| {
            Validation::fail(GraphViolation::HistoryInTopRegion {
                state: h.id().name().to_string(),
            })
        }));
    }

    all(checks)
}

fn check_node<S: State, E: Event>(graph: &StateGraph<S, E>, node: &StateNode<S, E>) -> Check {
    let StateKind::Pseudo(kind) = node.kind() else {
        return pass();
    };
    let name = || node.id().name().to_string();
    let outgoing: Vec<&TransitionDef<S, E>> = graph.outgoing(node.node()).collect();

    let mut checks = vec![require(
        kind == PseudoKind::End || outgoing.iter().all(|t| t.is_completion()),
        || GraphViolation::TriggeredPseudostateTransition {
            pseudostate: name(),
        },
    )];

    match kind {
        PseudoKind::Choice | PseudoKind::Junction => {
            checks.push(check_branches(node, &outgoing));
        }
        PseudoKind::Entry | PseudoKind::Exit => {
            checks.push(exactly_one(node, outgoing.len()));
        }
        PseudoKind::Join => {
            checks.push(exactly_one(node, outgoing.len()));
            checks.push(check_parallel_ends(
                graph,
                node.join_sources(),
                2,
                |reason| GraphViolation::InvalidJoin {
                    pseudostate: name(),
                    reason,
                },
            ));
        }
        PseudoKind::Fork => {
            let targets: Vec<NodeId> = outgoing.iter().filter_map(|t| t.target()).collect();
            checks.push(check_parallel_ends(graph, &targets, 1, |reason| {
                GraphViolation::InvalidFork {
                    pseudostate: name(),
                    reason,
                }
            }));
        }
        PseudoKind::HistoryShallow | PseudoKind::HistoryDeep => {
            checks.push(require(outgoing.len() <= 1, || {
                GraphViolation::PseudostateOutgoing {
                    pseudostate: name(),
                    expected: 1,
                    found: outgoing.len(),
                }
            }));
        }
        PseudoKind::End => {}
    }

    all(checks)
}

fn exactly_one<S: State, E: Event>(node: &StateNode<S, E>, found: usize) -> Check {
    require(found == 1, || GraphViolation::PseudostateOutgoing {
        pseudostate: node.id().name().to_string(),
        expected: 1,
        found,
    })
}

fn check_branches<S: State, E: Event>(
    node: &StateNode<S, E>,
    outgoing: &[&TransitionDef<S, E>],
) -> Check {
    let name = || node.id().name().to_string();
    let Some((last, rest)) = outgoing.split_last() else {
        return Validation::fail(GraphViolation::NoBranches {
            pseudostate: name(),
        });
    };

    all(vec![
        require(last.guard().is_none(), || {
            GraphViolation::MissingDefaultBranch {
                pseudostate: name(),
            }
        }),
        require(rest.iter().all(|t| t.guard().is_some()), || {
            GraphViolation::UnguardedBranchNotLast {
                pseudostate: name(),
            }
        }),
    ])
}

/// Fork targets and join sources: resting states in distinct regions of one
/// orthogonal state.
fn check_parallel_ends<S: State, E: Event>(
    graph: &StateGraph<S, E>,
    ends: &[NodeId],
    minimum: usize,
    violation: impl Fn(String) -> GraphViolation,
) -> Check {
    if ends.len() < minimum {
        return Validation::fail(violation(format!(
            "needs at least {minimum} state(s), found {}",
            ends.len()
        )));
    }

    let mut checks = Vec::new();
    let mut seen = HashSet::new();
    let mut owners = HashSet::new();
    for end in ends {
        let node = graph.node(*end);
        checks.push(require(node.kind().is_resting(), || {
            violation(format!("{} is a pseudostate", node.id().name()))
        }));
        checks.push(require(seen.insert(node.region()), || {
            violation(format!(
                "{} shares its region with another state",
                node.id().name()
            ))
        }));
        owners.insert(graph.region(node.region()).owner());
    }

    let owner = owners.iter().next().copied().flatten();
    let orthogonal = owners.len() == 1
        && owner.map(|o| graph.node(o).kind()) == Some(StateKind::Orthogonal);
    checks.push(require(orthogonal, || {
        violation("states must lie in regions of one orthogonal state".to_string())
    }));

    all(checks)
}

fn check_transition<S: State, E: Event>(
    graph: &StateGraph<S, E>,
    transition: &TransitionDef<S, E>,
) -> Check {
    let source = graph.node(transition.source());
    let mut checks = Vec::new();

    if let Some(target) = transition.target() {
        let target = graph.node(target);
        checks.push(require(
            target.kind() != StateKind::Pseudo(PseudoKind::Join),
            || GraphViolation::TransitionIntoJoin {
                pseudostate: target.id().name().to_string(),
            },
        ));
        if transition.kind() == TransitionKind::Internal {
            checks.push(require(target.node() == source.node(), || {
                GraphViolation::InternalTargetMismatch {
                    state: source.id().name().to_string(),
                }
            }));
        }
    }

    all(checks)
}

fn check_completion_cycles<S: State, E: Event>(graph: &StateGraph<S, E>) -> Check {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Open,
        Done,
    }

    fn visit<S: State, E: Event>(
        graph: &StateGraph<S, E>,
        node: NodeId,
        marks: &mut [Mark],
        cycles: &mut Vec<NodeId>,
    ) {
        marks[node.index()] = Mark::Open;
        for transition in graph.outgoing(node) {
            let Some(next) = transition.target() else {
                continue;
            };
            let kind = graph.node(next).kind();
            if !kind.is_pseudo() || kind.is_end() {
                continue;
            }
            match marks[next.index()] {
                Mark::Open => cycles.push(next),
                Mark::New => visit(graph, next, marks, cycles),
                Mark::Done => {}
            }
        }
        marks[node.index()] = Mark::Done;
    }

    let mut marks = vec![Mark::New; graph.nodes().count()];
    let mut cycles = Vec::new();
    for node in graph.nodes() {
        let pseudo = node.kind().is_pseudo() && !node.kind().is_end();
        if pseudo && marks[node.node().index()] == Mark::New {
            visit(graph, node.node(), &mut marks, &mut cycles);
        }
    }

    all(cycles
        .into_iter()
        .map(|n| {
            Validation::fail(GraphViolation::PseudostateCycle {
                pseudostate: graph.node(n).id().name().to_string(),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use crate::builder::{
        BuildError, ChoiceBuilder, ForkBuilder, JoinBuilder, RegionBuilder, StateGraphBuilder,
        TransitionBuilder,
    };
    use crate::core::Guard;
    use crate::graph::HistoryKind;
    use crate::verify::GraphViolation;
    use crate::{event_enum, state_enum};

    state_enum! {
        enum S { A, B, C, O, X1, X2, Y1, Y2, P, Q, H, H2 }
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

    fn orthogonal() -> StateGraphBuilder<S, E> {
        StateGraphBuilder::new()
            .region(RegionBuilder::within(S::O).initial(S::X1).state(S::X1).state(S::X2))
            .region(RegionBuilder::within(S::O).initial(S::Y1).state(S::Y1).state(S::Y2))
    }

    fn violations(result: Result<impl Sized, BuildError>) -> Vec<GraphViolation> {
        match result {
            Err(BuildError::Invalid(error)) => error.violations().to_vec(),
            Err(other) => panic!("unexpected build error: {other}"),
            Ok(_) => panic!("expected configuration error"),
        }
    }

    #[test]
    fn graph_without_transitions_is_rejected() {
        let result = StateGraphBuilder::<S, E>::new()
            .region(RegionBuilder::top().initial(S::A).state(S::A))
            .build();
        assert_eq!(violations(result), vec![GraphViolation::NoTransitions]);
    }

    #[test]
    fn accumulates_all_violations() {
        let result = StateGraphBuilder::new()
            .region(
                RegionBuilder::top()
                    .state(S::A)
                    .state(S::B)
                    .choice(ChoiceBuilder::new(S::P).last(S::A).then(S::B, Guard::always())),
            )
            .transition(
                TransitionBuilder::internal()
                    .source(S::A)
                    .target(S::B)
                    .event(E::Go),
            )
            .build();

        let violations = violations(result);
        assert!(violations
            .iter()
            .any(|v| matches!(v, GraphViolation::MissingInitial { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, GraphViolation::MissingDefaultBranch { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, GraphViolation::UnguardedBranchNotLast { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, GraphViolation::InternalTargetMismatch { .. })));
    }

    #[test]
    fn choice_without_branches_is_rejected() {
        let result = StateGraphBuilder::new()
            .region(
                RegionBuilder::top()
                    .initial(S::A)
                    .state(S::A)
                    .choice(ChoiceBuilder::new(S::P)),
            )
            .transition(go(S::A, S::P))
            .build();
        assert!(violations(result)
            .iter()
            .any(|v| matches!(v, GraphViolation::NoBranches { .. })));
    }

    #[test]
    fn fork_targets_must_span_distinct_regions() {
        let result = orthogonal()
            .region(
                RegionBuilder::top()
                    .initial(S::A)
                    .state(S::A)
                    .state(S::O)
                    .fork(ForkBuilder::new(S::P).target(S::X1).target(S::X2)),
            )
            .transition(go(S::A, S::P))
            .build();
        assert!(violations(result)
            .iter()
            .any(|v| matches!(v, GraphViolation::InvalidFork { .. })));
    }

    #[test]
    fn join_sources_must_belong_to_one_orthogonal_state() {
        let result = orthogonal()
            .region(
                RegionBuilder::top()
                    .initial(S::A)
                    .state(S::A)
                    .state(S::O)
                    .join(JoinBuilder::new(S::Q).source(S::A).source(S::X2).target(S::A)),
            )
            .transition(go(S::A, S::O))
            .build();
        assert!(violations(result)
            .iter()
            .any(|v| matches!(v, GraphViolation::InvalidJoin { .. })));
    }

    #[test]
    fn transitions_cannot_target_a_join() {
        let result = orthogonal()
            .region(
                RegionBuilder::top()
                    .initial(S::O)
                    .state(S::A)
                    .state(S::O)
                    .join(JoinBuilder::new(S::Q).source(S::X2).source(S::Y2).target(S::A)),
            )
            .transition(go(S::X1, S::Q))
            .build();
        assert!(violations(result)
            .iter()
            .any(|v| matches!(v, GraphViolation::TransitionIntoJoin { .. })));
    }

    #[test]
    fn history_rules() {
        let result = StateGraphBuilder::new()
            .region(
                RegionBuilder::top()
                    .initial(S::A)
                    .state(S::A)
                    .history(S::H, HistoryKind::Shallow),
            )
            .region(
                RegionBuilder::within(S::A)
                    .initial(S::B)
                    .state(S::B)
                    .history(S::H2, HistoryKind::Shallow)
                    .history(S::P, HistoryKind::Deep),
            )
            .transition(go(S::B, S::H2))
            .build();

        let violations = violations(result);
        assert!(violations
            .iter()
            .any(|v| matches!(v, GraphViolation::HistoryInTopRegion { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, GraphViolation::MultipleHistory { .. })));
    }

    #[test]
    fn completion_cycles_between_pseudostates_are_rejected() {
        let result = StateGraphBuilder::new()
            .region(
                RegionBuilder::top()
                    .initial(S::A)
                    .state(S::A)
                    .junction(ChoiceBuilder::new(S::P).last(S::Q))
                    .junction(ChoiceBuilder::new(S::Q).last(S::P)),
            )
            .transition(go(S::A, S::P))
            .build();
        assert!(violations(result)
            .iter()
            .any(|v| matches!(v, GraphViolation::PseudostateCycle { .. })));
    }

    #[test]
    fn triggered_transitions_out_of_pseudostates_are_rejected() {
        let result = StateGraphBuilder::new()
            .region(
                RegionBuilder::top()
                    .initial(S::A)
                    .state(S::A)
                    .state(S::O)
                    .entry_point(S::P, S::A),
            )
            .transition(go(S::P, S::O))
            .build();

        let violations = violations(result);
        assert!(violations
            .iter()
            .any(|v| matches!(v, GraphViolation::TriggeredPseudostateTransition { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, GraphViolation::PseudostateOutgoing { found: 2, .. })));
    }
}
