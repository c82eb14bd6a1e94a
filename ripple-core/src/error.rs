//! Error Types
//!
//! Every failure the kernel can report is a variant of [`ReactiveError`].
//! Errors are synchronous and local to the call that triggered them: edge
//! reconciliation always completes before any user callback can fail, so an
//! error never leaves the graph partially linked.

use std::any::Any;

use thiserror::Error;

/// Errors produced by the reactive kernel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A computed value re-entered its own in-progress recomputation.
    #[error("cycle detected in computation {name}")]
    Cycle { name: String },

    /// An observed observable was written while a computed value was
    /// being derived.
    #[error(
        "computed values are not allowed to cause side effects by changing observed observables; tried to modify {name}"
    )]
    MutationInsideComputed { name: String },

    /// An observable was written outside an action while actions are enforced.
    #[error("changing observed observables outside actions is not allowed; tried to modify {name}")]
    MutationOutsideAction { name: String },

    /// A computed value marked `requires_reaction` was read outside a
    /// reactive context.
    #[error("computed value {name} is read outside a reactive context")]
    UntrackedRead { name: String },

    /// A computed value without a setter was assigned.
    #[error("it is not possible to assign a new value to computed value {name}")]
    NoSetter { name: String },

    /// The setter of a computed value tried to assign the computed itself.
    #[error("the setter of computed value {name} is trying to update itself")]
    SetterReentry { name: String },

    /// The body of a derivation failed. The failure is captured during
    /// tracking and surfaces when the value is consumed.
    #[error("derivation {name} failed: {message}")]
    Derivation { name: String, message: String },

    /// Reactions kept re-triggering each other past the iteration ceiling.
    #[error(
        "reactions did not converge to a stable state after {iterations} iterations; probably a cycle in reaction {name}"
    )]
    ReactionLoop { name: String, iterations: usize },

    /// `end_batch` was called without a matching `start_batch`.
    #[error("end_batch called without a matching start_batch")]
    UnbalancedBatch,

    /// The configuration could not be parsed or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;

impl ReactiveError {
    /// Convert a panic payload captured from the derivation `name`.
    ///
    /// A payload that already is a `ReactiveError` (raised by
    /// [`Computed::get`](crate::reactive::Computed::get)) is passed through
    /// unchanged so nested computed failures keep their kind.
    pub(crate) fn from_panic(name: &str, payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<ReactiveError>() {
            Ok(error) => return *error,
            Err(other) => other,
        };

        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };

        ReactiveError::Derivation {
            name: name.to_string(),
            message,
        }
    }
}

impl From<serde_json::Error> for ReactiveError {
    fn from(error: serde_json::Error) -> Self {
        ReactiveError::Config(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_with_str_becomes_derivation_error() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        let error = ReactiveError::from_panic("total", payload);
        assert_eq!(
            error,
            ReactiveError::Derivation {
                name: "total".into(),
                message: "boom".into()
            }
        );
    }

    #[test]
    fn panic_with_reactive_error_is_preserved() {
        let cycle = ReactiveError::Cycle { name: "inner".into() };
        let payload: Box<dyn Any + Send> = Box::new(cycle.clone());
        assert_eq!(ReactiveError::from_panic("outer", payload), cycle);
    }

    #[test]
    fn json_errors_become_config_errors() {
        let error: ReactiveError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(error, ReactiveError::Config(_)));
    }
}
