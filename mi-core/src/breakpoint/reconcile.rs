//! Planning for the condition / ignore count / enabled reconciliation.
//!
//! Each slot that differs between the cached record and the requested delta
//! becomes one independent command. The service issues them all, joins on the
//! replies and folds the per-slot outcomes with [`join_outcomes`].

use super::attributes::AttributeDelta;
use super::data::BreakpointRecord;
use crate::command::MiCommand;
use crate::context::TargetContext;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SlotChange {
    Condition(String),
    IgnoreCount(u32),
    Enabled(bool),
}

impl SlotChange {
    pub fn command(&self, target: &TargetContext, reference: u32) -> MiCommand {
        let target = target.clone();
        match self {
            Self::Condition(condition) => MiCommand::BreakCondition { target, reference, condition: condition.clone() },
            Self::IgnoreCount(count) => MiCommand::BreakAfter { target, reference, count: *count },
            Self::Enabled(true) => MiCommand::BreakEnable { target, references: vec![reference] },
            Self::Enabled(false) => MiCommand::BreakDisable { target, references: vec![reference] },
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::Condition(_) => "-break-condition",
            Self::IgnoreCount(_) => "-break-after",
            Self::Enabled(true) => "-break-enable",
            Self::Enabled(false) => "-break-disable",
        }
    }

    /// Record a confirmed change.
    pub fn apply(&self, record: &mut BreakpointRecord) {
        match self {
            Self::Condition(condition) => record.condition.clone_from(condition),
            Self::IgnoreCount(count) => record.ignore_count = *count,
            Self::Enabled(enabled) => record.enabled = *enabled,
        }
    }
}

/// The slots of `delta` that differ from `record`, in slot order.
pub(crate) fn plan(record: &BreakpointRecord, delta: &AttributeDelta) -> Vec<SlotChange> {
    let mut changes = Vec::with_capacity(3);
    if let Some(condition) = delta.condition.as_ref().filter(|c| **c != record.condition) {
        changes.push(SlotChange::Condition(condition.clone()));
    }
    if let Some(count) = delta.ignore_count.filter(|c| *c != record.ignore_count) {
        changes.push(SlotChange::IgnoreCount(count));
    }
    if let Some(enabled) = delta.enabled.filter(|e| *e != record.enabled) {
        changes.push(SlotChange::Enabled(enabled));
    }
    changes
}

/// Result of one reconciliation slot.
#[derive(Debug)]
pub(crate) struct SlotOutcome {
    /// Whether the cached record was modified.
    pub applied: bool,
    pub result: Result<()>,
}

/// Fold the slot outcomes: whether anything was applied, and the first error
/// in slot order.
pub(crate) fn join_outcomes(outcomes: Vec<SlotOutcome>) -> (bool, Result<()>) {
    let mut applied = false;
    let mut first_error = None;
    for outcome in outcomes {
        applied |= outcome.applied;
        if let Err(err) = outcome.result {
            first_error.get_or_insert(err);
        }
    }
    (applied, first_error.map_or(Ok(()), Err))
}
