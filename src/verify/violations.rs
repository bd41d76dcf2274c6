//! Structural problems found while assembling or checking a state graph.

use thiserror::Error;

/// One structural problem in a state graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphViolation {
    #[error("state {state} is declared more than once")]
    DuplicateState { state: String },

    #[error("unknown state {state} referenced as {context}")]
    UnknownState {
        state: String,
        context: &'static str,
    },

    #[error("no top region declared")]
    MissingTopRegion,

    #[error("more than one top region declared")]
    MultipleTopRegions,

    #[error("pseudostate {state} cannot own a region")]
    PseudostateOwnsRegion { state: String },

    #[error("state {state} is nested inside its own region")]
    RegionCycle { state: String },

    #[error("no transitions defined")]
    NoTransitions,

    #[error("region {region} has no initial state")]
    MissingInitial { region: String },

    #[error("initial target {target} of region {region} lies outside that region")]
    InitialOutsideRegion { region: String, target: String },

    #[error("region {region} declares more than one history pseudostate")]
    MultipleHistory { region: String },

    #[error("history pseudostate {state} cannot be placed in the top region")]
    HistoryInTopRegion { state: String },

    #[error("{pseudostate} has no outgoing branches")]
    NoBranches { pseudostate: String },

    #[error("{pseudostate} has no unguarded default branch in last position")]
    MissingDefaultBranch { pseudostate: String },

    #[error("{pseudostate} has an unguarded branch before its last branch")]
    UnguardedBranchNotLast { pseudostate: String },

    #[error("{pseudostate} needs exactly {expected} outgoing transition(s), found {found}")]
    PseudostateOutgoing {
        pseudostate: String,
        expected: usize,
        found: usize,
    },

    #[error("fork {pseudostate}: {reason}")]
    InvalidFork { pseudostate: String, reason: String },

    #[error("join {pseudostate}: {reason}")]
    InvalidJoin { pseudostate: String, reason: String },

    #[error("pseudostate {pseudostate} has an event-triggered outgoing transition")]
    TriggeredPseudostateTransition { pseudostate: String },

    #[error("join {pseudostate} is entered by reaching its sources, not by a transition")]
    TransitionIntoJoin { pseudostate: String },

    #[error("internal transition on {state} targets another state")]
    InternalTargetMismatch { state: String },

    #[error("pseudostate {pseudostate} is part of a completion cycle")]
    PseudostateCycle { pseudostate: String },
}
