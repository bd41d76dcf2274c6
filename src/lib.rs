//! Statechart: hierarchical state machines with orthogonal regions
//!
//! A state graph is declared once with the [`builder`] API and validated as a
//! whole: every structural problem is reported together. A [`StateMachine`]
//! then drives one live configuration of that graph with events.
//!
//! # Core Concepts
//!
//! - **States and regions**: composite states own one or more regions; each
//!   active region has exactly one active state
//! - **Pseudostates**: choice, junction, fork, join, history, entry and exit
//!   points, and end
//! - **Transitions**: external, internal and local, with guards, actions and
//!   error actions; triggered by events or by completion
//! - **Deferral**: events a state defers are replayed once it is left
//! - **Listeners and interceptors**: observe every stage, or veto events,
//!   legs and state changes
//! - **Checkpoints**: snapshot, persist and restore configurations
//! - **Ensembles**: keep several machines on one shared configuration
//!
//! # Example
//!
//! ```rust
//! use statechart::builder::{on_event, RegionBuilder, StateGraphBuilder};
//! use statechart::runtime::{MachineSettings, StateMachine};
//! use statechart::{event_enum, state_enum};
//!
//! state_enum! {
//!     enum Order { Placed, Paid, Shipped }
//! }
//!
//! event_enum! {
//!     enum OrderEvent { Pay, Ship }
//! }
//!
//! let graph = StateGraphBuilder::new()
//!     .region(
//!         RegionBuilder::top()
//!             .initial(Order::Placed)
//!             .state(Order::Placed)
//!             .state(Order::Paid)
//!             .state(Order::Shipped),
//!     )
//!     .transition(on_event(Order::Placed, Order::Paid, OrderEvent::Pay))
//!     .transition(on_event(Order::Paid, Order::Shipped, OrderEvent::Ship))
//!     .build()
//!     .unwrap();
//!
//! let machine = StateMachine::new(graph, MachineSettings::default());
//! machine.start().unwrap();
//!
//! assert!(!machine.send_event(OrderEvent::Ship));
//! assert!(machine.send_event(OrderEvent::Pay));
//! assert!(machine.send_event(OrderEvent::Ship));
//! assert_eq!(machine.state(), Some(Order::Shipped));
//! ```

pub mod builder;
pub mod checkpoint;
pub mod core;
pub mod ensemble;
pub mod graph;
pub mod runtime;
pub mod verify;

// Re-export commonly used types
pub use crate::builder::{BuildError, StateGraphBuilder};
pub use crate::core::{Action, Event, Guard, Message, Stage, State, StateContext};
pub use crate::graph::StateGraph;
pub use crate::runtime::{EventOutcome, Listener, MachineError, MachineSettings, StateMachine};
