//! Build errors for graph, region and transition builders.

use crate::verify::ConfigurationError;
use thiserror::Error;

/// Errors that can occur when building a state graph.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Transition source state not specified. Call .source(state)")]
    MissingSource,

    #[error("Transition target state not specified. Call .target(state)")]
    MissingTarget,

    #[error("Join {join} has no target. Call .target(state)")]
    MissingJoinTarget { join: String },

    #[error(transparent)]
    Invalid(#[from] ConfigurationError),
}
