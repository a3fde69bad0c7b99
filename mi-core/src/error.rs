//! Errors returned by the services.

use crate::command::MiError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The context is missing or belongs to another session.
    #[error("unknown execution context")]
    UnknownExecutionContext,
    /// The target has no breakpoint cache, or the breakpoint has no target.
    #[error("unknown breakpoint context")]
    UnknownBreakpointContext,
    #[error("unknown breakpoint type")]
    UnknownBreakpointType,
    #[error("unknown breakpoint")]
    UnknownBreakpoint,
    #[error("unknown context type")]
    UnknownContextType,
    #[error("invalid breakpoint location")]
    InvalidLocation,
    #[error("invalid value for attribute {name}: expected {expected}")]
    InvalidAttribute { name: String, expected: &'static str },
    #[error("watchpoint must be read, write or both")]
    InvalidWatchpointAccess,
    #[error("breakpoint insertion failure")]
    BreakpointInsertionFailure,
    #[error("watchpoint insertion failure")]
    WatchpointInsertionFailure,
    #[error("invalid breakpoint condition")]
    InvalidCondition,
    #[error("{0} is not supported")]
    NotSupported(&'static str),
    #[error("backend error: {0}")]
    Backend(#[from] MiError),
    #[error("service has shut down")]
    ServiceShutdown,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
