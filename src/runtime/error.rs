//! Runtime errors and panic containment.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// Errors reported by a running machine.
///
/// Guard and action failures never reach the event submitter: they are
/// attached to a `STATEMACHINE_ERROR` notification and kept as the machine's
/// last error. Lifecycle misuse is returned directly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MachineError {
    #[error("guard of transition {transition} failed: {message}")]
    GuardFailed { transition: String, message: String },

    #[error("action {action} failed: {message}")]
    ActionFailed { action: String, message: String },

    #[error("state change rejected by interceptor: {0}")]
    StateChangeRejected(String),

    #[error("no branch of {pseudostate} could be taken")]
    NoBranch { pseudostate: String },

    #[error("completion transitions did not settle within {0} steps")]
    CompletionLimit(usize),

    #[error("machine {machine_id} is stopped, reset it before starting again")]
    RestartRequiresReset { machine_id: String },

    #[error("machine {machine_id} cannot be driven from inside its own callbacks")]
    Reentrant { machine_id: String },

    #[error("machine {machine_id} failed to start: {reason}")]
    StartFailed { machine_id: String, reason: String },

    #[error("cannot restore snapshot: {0}")]
    Restore(String),
}

/// Run `f`, turning a panic into its message.
pub(crate) fn contain<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contain_passes_values_through() {
        assert_eq!(contain(|| 41 + 1), Ok(42));
    }

    #[test]
    fn contain_extracts_panic_messages() {
        let static_msg = contain(|| -> u8 { panic!("boom") });
        assert_eq!(static_msg, Err("boom".to_string()));

        let formatted = contain(|| -> u8 { panic!("code {}", 7) });
        assert_eq!(formatted, Err("code 7".to_string()));
    }

    #[test]
    fn errors_render_their_context() {
        let error = MachineError::ActionFailed {
            action: "entry of Open".to_string(),
            message: "disk full".to_string(),
        };
        assert_eq!(error.to_string(), "action entry of Open failed: disk full");
    }
}
