//! Typed backend output: command replies, breakpoint descriptors and
//! asynchronous backend events.

use crate::context::{Context, SessionId};
use serde::{Deserialize, Serialize};

/// One breakpoint as described by the backend in an insert, watch or list
/// reply.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MiBreakpoint {
    /// Backend number. `None` when the backend did not report a usable one.
    pub number: Option<u32>,
    /// Backend type string: `breakpoint`, `hw breakpoint`, `watchpoint`,
    /// `hw watchpoint`, `read watchpoint`, `acc watchpoint`, `catchpoint`.
    #[serde(rename = "type")]
    pub kind: String,
    /// `true` for a `del` disposition.
    pub temporary: bool,
    pub enabled: bool,
    pub address: Option<String>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub thread_id: Option<String>,
    pub condition: Option<String>,
    pub ignore_count: u32,
    pub hit_count: Option<u32>,
    pub expression: Option<String>,
    pub original_location: Option<String>,
}

/// Successful reply to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiReply {
    /// Status-only acknowledgement (`^done`).
    Done,
    /// Installed breakpoints reported by `-break-insert` / `-break-watch`.
    BreakInsert(Vec<MiBreakpoint>),
    /// Full breakpoint table reported by `-break-list`.
    BreakList(Vec<MiBreakpoint>),
}

impl MiReply {
    /// Accept a status-only acknowledgement for `operation`.
    pub fn into_done(self, operation: &'static str) -> Result<(), MiError> {
        match self {
            Self::Done => Ok(()),
            other => Err(MiError::unexpected(operation, &other)),
        }
    }

    /// Accept the breakpoint descriptors carried by an insert or list reply.
    pub fn into_breakpoints(self, operation: &'static str) -> Result<Vec<MiBreakpoint>, MiError> {
        match self {
            Self::BreakInsert(breakpoints) | Self::BreakList(breakpoints) => Ok(breakpoints),
            other @ Self::Done => Err(MiError::unexpected(operation, &other)),
        }
    }
}

/// Failure reported by the backend or by the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MiError {
    /// `^error` record.
    #[error("{message}")]
    Rejected { message: String },
    #[error("backend connection closed")]
    TransportClosed,
    #[error("unexpected reply to {operation}: {reply}")]
    UnexpectedReply { operation: &'static str, reply: String },
}

impl MiError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into() }
    }

    fn unexpected(operation: &'static str, reply: &MiReply) -> Self {
        Self::UnexpectedReply { operation, reply: format!("{reply:?}") }
    }
}

/// Backend-initiated notification, independent of any caller command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiEvent {
    /// A watchpoint went out of lexical scope and the backend deleted it.
    WatchpointScope { context: Context, number: u32 },
    /// Execution stopped in `context` at the listed breakpoint numbers.
    BreakpointHit { context: Context, numbers: Vec<u32> },
    /// Execution resumed in `context`.
    Resumed(Context),
    /// `context` exited.
    Exited(Context),
    /// The backend connection for a session is gone.
    SessionEnded(SessionId),
}
