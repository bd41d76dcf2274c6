//! Builders for regions and the nodes placed in them.

use crate::core::{Action, Event, Guard, State};
use crate::graph::HistoryKind;

/// Behaviour attached to a resting state.
///
/// # Example
///
/// ```
/// use statechart::builder::StateBuilder;
/// use statechart::core::Action;
/// use statechart::{event_enum, state_enum};
///
/// state_enum! { enum Door { Open, Closed } }
/// event_enum! { enum Cmd { Lock } }
///
/// let open: StateBuilder<Door, Cmd> = StateBuilder::new(Door::Open)
///     .entry(Action::from_fn(|ctx| {
///         ctx.extended_state().set("opened", true).ok();
///     }))
///     .defer(Cmd::Lock);
/// ```
pub struct StateBuilder<S: State, E: Event> {
    pub(crate) id: S,
    pub(crate) entry: Vec<Action<S, E>>,
    pub(crate) exit: Vec<Action<S, E>>,
    pub(crate) state_actions: Vec<Action<S, E>>,
    pub(crate) deferred: Vec<E>,
}

impl<S: State, E: Event> StateBuilder<S, E> {
    pub fn new(id: S) -> Self {
        Self {
            id,
            entry: Vec::new(),
            exit: Vec::new(),
            state_actions: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Append an entry action.
    pub fn entry(mut self, action: Action<S, E>) -> Self {
        self.entry.push(action);
        self
    }

    /// Append an exit action.
    pub fn exit(mut self, action: Action<S, E>) -> Self {
        self.exit.push(action);
        self
    }

    /// Append an action run once the state is active. Its context carries a
    /// cancellation token raised when the state is exited.
    pub fn state_action(mut self, action: Action<S, E>) -> Self {
        self.state_actions.push(action);
        self
    }

    /// Queue `event` instead of rejecting it while this state is active.
    pub fn defer(mut self, event: E) -> Self {
        self.deferred.push(event);
        self
    }
}

impl<S: State, E: Event> From<S> for StateBuilder<S, E> {
    fn from(id: S) -> Self {
        StateBuilder::new(id)
    }
}

pub(crate) struct Branch<S: State, E: Event> {
    pub target: S,
    pub guard: Option<Guard<S, E>>,
    pub actions: Vec<Action<S, E>>,
}

/// Outgoing branches of a CHOICE or JUNCTION pseudostate.
///
/// Branches are evaluated in declaration order and the first passing guard
/// wins. The last branch must be the unguarded default.
pub struct ChoiceBuilder<S: State, E: Event> {
    pub(crate) id: S,
    pub(crate) branches: Vec<Branch<S, E>>,
}

impl<S: State, E: Event> ChoiceBuilder<S, E> {
    pub fn new(id: S) -> Self {
        Self {
            id,
            branches: Vec::new(),
        }
    }

    /// First guarded branch.
    pub fn first(self, target: S, guard: Guard<S, E>) -> Self {
        self.branch(target, Some(guard))
    }

    /// Further guarded branch.
    pub fn then(self, target: S, guard: Guard<S, E>) -> Self {
        self.branch(target, Some(guard))
    }

    /// Default branch.
    pub fn last(self, target: S) -> Self {
        self.branch(target, None)
    }

    /// Attach an action to the most recently added branch.
    pub fn action(mut self, action: Action<S, E>) -> Self {
        if let Some(branch) = self.branches.last_mut() {
            branch.actions.push(action);
        }
        self
    }

    fn branch(mut self, target: S, guard: Option<Guard<S, E>>) -> Self {
        self.branches.push(Branch {
            target,
            guard,
            actions: Vec::new(),
        });
        self
    }
}

/// FORK pseudostate entering several regions of one orthogonal state.
pub struct ForkBuilder<S: State> {
    pub(crate) id: S,
    pub(crate) targets: Vec<S>,
}

impl<S: State> ForkBuilder<S> {
    pub fn new(id: S) -> Self {
        Self {
            id,
            targets: Vec::new(),
        }
    }

    pub fn target(mut self, state: S) -> Self {
        self.targets.push(state);
        self
    }
}

/// JOIN pseudostate leaving an orthogonal state once every source was reached.
pub struct JoinBuilder<S: State, E: Event> {
    pub(crate) id: S,
    pub(crate) sources: Vec<S>,
    pub(crate) target: Option<S>,
    pub(crate) guard: Option<Guard<S, E>>,
    pub(crate) actions: Vec<Action<S, E>>,
}

impl<S: State, E: Event> JoinBuilder<S, E> {
    pub fn new(id: S) -> Self {
        Self {
            id,
            sources: Vec::new(),
            target: None,
            guard: None,
            actions: Vec::new(),
        }
    }

    pub fn source(mut self, state: S) -> Self {
        self.sources.push(state);
        self
    }

    pub fn target(mut self, state: S) -> Self {
        self.target = Some(state);
        self
    }

    pub fn guard(mut self, guard: Guard<S, E>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn action(mut self, action: Action<S, E>) -> Self {
        self.actions.push(action);
        self
    }
}

pub(crate) enum NodeDecl<S: State, E: Event> {
    State(StateBuilder<S, E>),
    Choice(ChoiceBuilder<S, E>),
    Junction(ChoiceBuilder<S, E>),
    Fork(ForkBuilder<S>),
    Join(JoinBuilder<S, E>),
    History {
        id: S,
        kind: HistoryKind,
        default: Option<S>,
    },
    Entry {
        id: S,
        target: S,
    },
    Exit {
        id: S,
        target: S,
    },
    End(S),
}

impl<S: State, E: Event> NodeDecl<S, E> {
    pub fn id(&self) -> &S {
        match self {
            Self::State(state) => &state.id,
            Self::Choice(choice) | Self::Junction(choice) => &choice.id,
            Self::Fork(fork) => &fork.id,
            Self::Join(join) => &join.id,
            Self::History { id, .. }
            | Self::Entry { id, .. }
            | Self::Exit { id, .. }
            | Self::End(id) => id,
        }
    }
}

/// A region and the nodes declared in it.
///
/// `RegionBuilder::top()` declares the machine's top region. Every
/// `RegionBuilder::within(state)` adds one region to `state`: one makes it
/// composite, two or more make it orthogonal.
///
/// # Example
///
/// ```
/// use statechart::builder::RegionBuilder;
/// use statechart::graph::HistoryKind;
/// use statechart::{event_enum, state_enum};
///
/// state_enum! { enum Player { Off, On, Playing, Paused, Resume } }
/// event_enum! { enum Button { Power } }
///
/// let top: RegionBuilder<Player, Button> = RegionBuilder::top()
///     .initial(Player::Off)
///     .state(Player::Off)
///     .state(Player::On);
///
/// let inside = RegionBuilder::<Player, Button>::within(Player::On)
///     .initial(Player::Playing)
///     .state(Player::Playing)
///     .state(Player::Paused)
///     .history(Player::Resume, HistoryKind::Shallow);
/// ```
pub struct RegionBuilder<S: State, E: Event> {
    pub(crate) owner: Option<S>,
    pub(crate) initial: Option<(S, Option<Action<S, E>>)>,
    pub(crate) nodes: Vec<NodeDecl<S, E>>,
}

impl<S: State, E: Event> RegionBuilder<S, E> {
    /// The machine's top region.
    pub fn top() -> Self {
        Self {
            owner: None,
            initial: None,
            nodes: Vec::new(),
        }
    }

    /// A region nested in `owner`.
    pub fn within(owner: S) -> Self {
        Self {
            owner: Some(owner),
            initial: None,
            nodes: Vec::new(),
        }
    }

    /// Target of the region's initial pseudostate (required).
    pub fn initial(mut self, target: S) -> Self {
        self.initial = Some((target, None));
        self
    }

    /// Initial target with an action run when the initial transition fires.
    pub fn initial_with_action(mut self, target: S, action: Action<S, E>) -> Self {
        self.initial = Some((target, Some(action)));
        self
    }

    pub fn state(mut self, state: impl Into<StateBuilder<S, E>>) -> Self {
        self.nodes.push(NodeDecl::State(state.into()));
        self
    }

    pub fn choice(mut self, choice: ChoiceBuilder<S, E>) -> Self {
        self.nodes.push(NodeDecl::Choice(choice));
        self
    }

    /// Static conditional branch. Behaves like a choice at runtime.
    pub fn junction(mut self, junction: ChoiceBuilder<S, E>) -> Self {
        self.nodes.push(NodeDecl::Junction(junction));
        self
    }

    pub fn fork(mut self, fork: ForkBuilder<S>) -> Self {
        self.nodes.push(NodeDecl::Fork(fork));
        self
    }

    pub fn join(mut self, join: JoinBuilder<S, E>) -> Self {
        self.nodes.push(NodeDecl::Join(join));
        self
    }

    /// History pseudostate of this region. Without a record it enters the
    /// region's initial target.
    pub fn history(mut self, id: S, kind: HistoryKind) -> Self {
        self.nodes.push(NodeDecl::History {
            id,
            kind,
            default: None,
        });
        self
    }

    /// History pseudostate that falls back to `default` without a record.
    pub fn history_with_default(mut self, id: S, kind: HistoryKind, default: S) -> Self {
        self.nodes.push(NodeDecl::History {
            id,
            kind,
            default: Some(default),
        });
        self
    }

    /// Entry point: a named way into this region leading to `target`.
    pub fn entry_point(mut self, id: S, target: S) -> Self {
        self.nodes.push(NodeDecl::Entry { id, target });
        self
    }

    /// Exit point: a named way out of this region leading to `target`.
    pub fn exit_point(mut self, id: S, target: S) -> Self {
        self.nodes.push(NodeDecl::Exit { id, target });
        self
    }

    /// Final state of this region.
    pub fn end(mut self, id: S) -> Self {
        self.nodes.push(NodeDecl::End(id));
        self
    }
}
