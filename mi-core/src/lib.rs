//! mi-core - breakpoint and process services for GDB/MI.
//!
//! This crate turns high-level debugger operations into MI commands, keeps a
//! per-target cache of the breakpoints GDB reports back, and notifies
//! subscribers when that state changes. The transport that talks to a real
//! GDB is a collaborator behind [`CommandControl`]; [`sim::SimulatedGdb`]
//! stands in for it in tests and demos.

pub mod breakpoint;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod processes;
pub mod session;
pub mod sim;

// Re-export commonly used types
pub use breakpoint::{
    AttributeDelta, AttributeValue, Attributes, BreakpointEvent, BreakpointKind, BreakpointRecord, BreakpointService,
};
pub use command::{CommandControl, MiBreakpoint, MiCommand, MiError, MiEvent, MiReply, PendingReply, ReplySender, WatchAccess};
pub use config::ServiceConfig;
pub use context::{
    BreakpointRef, ContainerContext, Context, ContextFactory, ContextKind, ControlContext, ExecutionGroupContext,
    ProcessContext, SessionId, TargetContext, ThreadContext, TypedContext,
};
pub use error::{Error, Result};
pub use processes::{ProcessCapabilities, ProcessService, ThreadMetadata, UNIQUE_GROUP_ID, UNKNOWN_PROCESS_NAME};
pub use session::ServiceHandle;
pub use sim::{GdbState, SimulatedGdb};
