//! Executing state graphs.
//!
//! A [`StateMachine`] owns the live [`ActiveConfiguration`] of one graph and
//! drives it with events: each event is resolved to transition legs, each
//! leg is executed atomically, and every lifecycle stage is reported to
//! registered [`Listener`]s. [`Interceptor`]s can veto events, legs and state
//! changes.

mod config;
mod error;
mod executor;
mod interceptor;
mod join;
mod listener;
mod machine;
mod resolver;
mod settings;

pub use config::ActiveConfiguration;
pub use error::MachineError;
pub(crate) use error::contain;
pub use interceptor::Interceptor;
pub use listener::{FnListener, Listener, ListenerBus, LoggingListener};
pub use machine::{EventHandle, EventOutcome, EventResult, Lifecycle, StateMachine};
pub use settings::MachineSettings;
