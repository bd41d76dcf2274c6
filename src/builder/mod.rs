//! Builder API for declaring state graphs.
//!
//! Regions are declared with [`RegionBuilder`], which places states and
//! pseudostates; transitions between them with [`TransitionBuilder`]. The
//! [`StateGraphBuilder`] collects both and validates the result once, in
//! [`StateGraphBuilder::build`].

pub mod error;
pub mod graph;
pub mod macros;
pub mod region;
pub mod transition;

pub use error::BuildError;
pub use graph::StateGraphBuilder;
pub use region::{ChoiceBuilder, ForkBuilder, JoinBuilder, RegionBuilder, StateBuilder};
pub use transition::TransitionBuilder;

use crate::core::{Event, State};

/// Create an unguarded external transition triggered by `event`.
///
/// # Example
///
/// ```
/// use statechart::builder::on_event;
/// use statechart::{event_enum, state_enum};
///
/// state_enum! { enum Door { Open, Closed } }
/// event_enum! { enum Cmd { Close } }
///
/// let close = on_event(Door::Open, Door::Closed, Cmd::Close);
/// ```
pub fn on_event<S: State, E: Event>(source: S, target: S, event: E) -> TransitionBuilder<S, E> {
    TransitionBuilder::external()
        .source(source)
        .target(target)
        .event(event)
}

/// Create an unguarded completion transition.
pub fn on_completion<S: State, E: Event>(source: S, target: S) -> TransitionBuilder<S, E> {
    TransitionBuilder::external().source(source).target(target)
}
