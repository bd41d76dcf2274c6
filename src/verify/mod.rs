//! Validation of assembled state graphs.
//!
//! Every structural rule is evaluated with Stillwater's `Validation`, so a
//! broken graph reports ALL of its problems in one [`ConfigurationError`]
//! instead of stopping at the first one.
//!
//! # Example
//!
//! ```rust
//! use statechart::builder::{BuildError, RegionBuilder, StateGraphBuilder};
//! use statechart::verify::GraphViolation;
//! use statechart::{event_enum, state_enum};
//!
//! state_enum! { enum Light { Red, Green } }
//! event_enum! { enum Tick { Next } }
//!
//! let result = StateGraphBuilder::<Light, Tick>::new()
//!     .region(RegionBuilder::top().state(Light::Red).state(Light::Green))
//!     .build();
//!
//! let Err(BuildError::Invalid(error)) = result else { panic!("expected errors") };
//! assert!(error.violations().contains(&GraphViolation::NoTransitions));
//! assert_eq!(error.violations().len(), 2);
//! ```

mod rules;
mod violations;

pub use violations::GraphViolation;

use crate::core::{Event, State};
use crate::graph::StateGraph;
use stillwater::validation::Validation;
use thiserror::Error;

/// A structurally invalid state graph. Fatal: no machine is built from it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid state graph ({} violation(s)): {}", .violations.len(), summary(.violations))]
pub struct ConfigurationError {
    violations: Vec<GraphViolation>,
}

fn summary(violations: &[GraphViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConfigurationError {
    pub fn new(violations: Vec<GraphViolation>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[GraphViolation] {
        &self.violations
    }
}

/// Check every structural rule of `graph`.
pub fn verify<S: State, E: Event>(graph: &StateGraph<S, E>) -> Result<(), ConfigurationError> {
    match rules::check_graph(graph) {
        Validation::Success(_) => Ok(()),
        Validation::Failure(errors) => Err(ConfigurationError::new(
            errors.iter().cloned().collect(),
        )),
    }
}
