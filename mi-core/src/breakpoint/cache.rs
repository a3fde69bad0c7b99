//! Per-target breakpoint cache.

use super::data::BreakpointRecord;
use crate::context::{SessionId, TargetContext, TypedContext};
use std::collections::{BTreeMap, HashMap};

pub type TargetBreakpoints = BTreeMap<u32, BreakpointRecord>;

/// Breakpoints known for each target, keyed by backend reference.
///
/// A target has an entry once something was inserted there. Only the
/// breakpoint service writes to it, always from the executor.
#[derive(Debug, Default)]
pub(crate) struct BreakpointCache {
    targets: HashMap<TargetContext, TargetBreakpoints>,
}

impl BreakpointCache {
    pub fn get(&self, target: &TargetContext) -> Option<&TargetBreakpoints> {
        self.targets.get(target)
    }

    pub fn contains_target(&self, target: &TargetContext) -> bool {
        self.targets.contains_key(target)
    }

    pub fn record(&self, target: &TargetContext, reference: u32) -> Option<&BreakpointRecord> {
        self.targets.get(target)?.get(&reference)
    }

    pub fn record_mut(&mut self, target: &TargetContext, reference: u32) -> Option<&mut BreakpointRecord> {
        self.targets.get_mut(target)?.get_mut(&reference)
    }

    pub fn ensure(&mut self, target: &TargetContext) -> &mut TargetBreakpoints {
        self.targets.entry(target.clone()).or_default()
    }

    pub fn upsert(&mut self, target: &TargetContext, record: BreakpointRecord) {
        self.ensure(target).insert(record.reference, record);
    }

    pub fn remove(&mut self, target: &TargetContext, reference: u32) -> Option<BreakpointRecord> {
        self.targets.get_mut(target)?.remove(&reference)
    }

    /// Install a fresh listing, discarding whatever was cached before.
    pub fn clear_and_replace(&mut self, target: &TargetContext, records: impl IntoIterator<Item = BreakpointRecord>) {
        let entry = self.ensure(target);
        entry.clear();
        entry.extend(records.into_iter().map(|record| (record.reference, record)));
    }

    /// Forget every target of `session`. Returns how many were dropped.
    pub fn drop_session(&mut self, session: &SessionId) -> usize {
        let before = self.targets.len();
        self.targets.retain(|target, _| target.context().session() != session);
        before - self.targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::data::BreakpointKind;
    use crate::context::ContextFactory;

    fn record(reference: u32) -> BreakpointRecord {
        BreakpointRecord {
            reference,
            kind: BreakpointKind::Breakpoint,
            location: format!("a.c:{reference}"),
            condition: String::new(),
            ignore_count: 0,
            enabled: true,
            hit_count: None,
            temporary: false,
            hardware: false,
            thread_id: None,
            expression: None,
        }
    }

    #[test]
    fn test_lazy_target_entries() {
        let target = ContextFactory::new(SessionId::new("s1")).root_container("0");
        let mut cache = BreakpointCache::default();
        assert!(!cache.contains_target(&target));
        assert!(cache.remove(&target, 1).is_none());

        cache.upsert(&target, record(1));
        assert!(cache.contains_target(&target));
        assert_eq!(cache.record(&target, 1).map(|r| r.reference), Some(1));

        cache.remove(&target, 1);
        assert!(cache.record(&target, 1).is_none());
        // The target entry outlives its last breakpoint.
        assert!(cache.contains_target(&target));
    }

    #[test]
    fn test_clear_and_replace_heals_drift() {
        let target = ContextFactory::new(SessionId::new("s1")).root_container("0");
        let mut cache = BreakpointCache::default();
        cache.upsert(&target, record(1));
        cache.upsert(&target, record(2));

        cache.clear_and_replace(&target, vec![record(2), record(7)]);
        let refs: Vec<u32> = cache.get(&target).unwrap().keys().copied().collect();
        assert_eq!(refs, vec![2, 7]);
    }

    #[test]
    fn test_drop_session_is_scoped() {
        let s1 = ContextFactory::new(SessionId::new("s1")).root_container("0");
        let s2 = ContextFactory::new(SessionId::new("s2")).root_container("0");
        let mut cache = BreakpointCache::default();
        cache.upsert(&s1, record(1));
        cache.upsert(&s2, record(1));

        assert_eq!(cache.drop_session(&SessionId::new("s1")), 1);
        assert!(!cache.contains_target(&s1));
        assert!(cache.record(&s2, 1).is_some());
    }

    #[test]
    fn test_record_mut_updates_in_place() {
        let target = ContextFactory::new(SessionId::new("s1")).root_container("0");
        let mut cache = BreakpointCache::default();
        cache.upsert(&target, record(3));
        if let Some(r) = cache.record_mut(&target, 3) {
            r.enabled = false;
        }
        assert_eq!(cache.record(&target, 3).map(|r| r.enabled), Some(false));
    }
}
