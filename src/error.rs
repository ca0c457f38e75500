//! Error taxonomy for the server core.
//!
//! Every fallible public operation on [`RestServer`](crate::RestServer) returns
//! [`ServerResult`]. Only [`ServerError::HandlerFault`] is subject to the
//! exception policy; the other variants always surface to the caller.
use thiserror::Error;

use crate::{
    core::{prefix::PrefixError, state::ServerState},
    ports::{listener::ListenerError, router::HandlerError},
};

/// Errors reported by the lifecycle controller and the dispatch chain
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerError {
    /// Guarded configuration was touched, or a transition was requested, while
    /// the server was not in a state that allows it
    #[error("Cannot {operation} while the server is {state}")]
    StateViolation {
        operation: &'static str,
        state: ServerState,
    },

    /// The listener could not bind the configured prefix
    #[error("Failed to bind listener: {0}")]
    BindFailure(#[source] ListenerError),

    /// A route handler or lifecycle hook faulted
    #[error("{origin} faulted: {source}")]
    HandlerFault {
        origin: String,
        #[source]
        source: HandlerError,
    },

    /// The listen prefix could not be parsed
    #[error(transparent)]
    InvalidPrefix(#[from] PrefixError),
}

impl ServerError {
    pub(crate) fn state_violation(operation: &'static str, state: ServerState) -> Self {
        ServerError::StateViolation { operation, state }
    }

    pub(crate) fn fault(origin: impl Into<String>, source: HandlerError) -> Self {
        ServerError::HandlerFault {
            origin: origin.into(),
            source,
        }
    }

    pub fn is_state_violation(&self) -> bool {
        matches!(self, ServerError::StateViolation { .. })
    }

    pub fn is_bind_failure(&self) -> bool {
        matches!(self, ServerError::BindFailure(_))
    }

    pub fn is_handler_fault(&self) -> bool {
        matches!(self, ServerError::HandlerFault { .. })
    }
}

/// Result type alias for server operations
pub type ServerResult<T> = Result<T, ServerError>;
