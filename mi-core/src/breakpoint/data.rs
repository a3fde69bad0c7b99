//! Cached breakpoint data.

use crate::command::{MiBreakpoint, WatchAccess};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointKind {
    Breakpoint,
    Watchpoint(WatchAccess),
    Catchpoint,
}

impl BreakpointKind {
    /// Parse the backend's type string. Unknown strings are treated as code
    /// breakpoints, which is what GDB reports for most of its variants.
    pub fn from_mi(kind: &str) -> Self {
        let kind = kind.trim();
        if kind.contains("catchpoint") {
            Self::Catchpoint
        } else if kind.contains("watchpoint") {
            if kind.starts_with("read") {
                Self::Watchpoint(WatchAccess::Read)
            } else if kind.starts_with("acc") {
                Self::Watchpoint(WatchAccess::Access)
            } else {
                Self::Watchpoint(WatchAccess::Write)
            }
        } else {
            Self::Breakpoint
        }
    }
}

/// The backend's view of one installed breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakpointRecord {
    pub reference: u32,
    pub kind: BreakpointKind,
    pub location: String,
    pub condition: String,
    pub ignore_count: u32,
    pub enabled: bool,
    pub hit_count: Option<u32>,
    pub temporary: bool,
    pub hardware: bool,
    /// Thread the breakpoint is scoped to, if any.
    pub thread_id: Option<String>,
    pub expression: Option<String>,
}

impl BreakpointRecord {
    /// Build a record from a reply descriptor. `None` when the descriptor has
    /// no usable number.
    pub fn from_descriptor(descriptor: &MiBreakpoint) -> Option<Self> {
        let reference = descriptor.number.filter(|number| *number > 0)?;
        Some(Self {
            reference,
            kind: BreakpointKind::from_mi(&descriptor.kind),
            location: resolve_location(descriptor),
            condition: descriptor.condition.clone().unwrap_or_default(),
            ignore_count: descriptor.ignore_count,
            enabled: descriptor.enabled,
            hit_count: descriptor.hit_count,
            temporary: descriptor.temporary,
            hardware: descriptor.kind.starts_with("hw"),
            thread_id: descriptor.thread_id.clone().filter(|tid| !tid.is_empty() && tid != "0"),
            expression: descriptor.expression.clone(),
        })
    }

    pub fn is_watchpoint(&self) -> bool {
        matches!(self.kind, BreakpointKind::Watchpoint(_))
    }
}

fn resolve_location(descriptor: &MiBreakpoint) -> String {
    match (&descriptor.file, descriptor.line, &descriptor.function) {
        (Some(file), Some(line), _) => format!("{file}:{line}"),
        (Some(file), None, Some(function)) => format!("{file}:{function}"),
        (None, _, Some(function)) => function.clone(),
        _ => descriptor
            .address
            .clone()
            .or_else(|| descriptor.expression.clone())
            .or_else(|| descriptor.original_location.clone())
            .unwrap_or_default(),
    }
}
