//! Breakpoint service.
//!
//! Translates caller operations into MI commands, correlates the replies back
//! into the per-target [`cache`](BreakpointCache) and publishes
//! [`BreakpointEvent`]s. Runs on the session executor: every method is called
//! from one thread, and cache borrows never span an `.await`.

pub mod attributes;
mod cache;
pub mod data;
mod reconcile;

pub use attributes::{AttributeDelta, AttributeValue, Attributes, BreakpointSpec, LineBreakpoint, Watchpoint};
pub use data::{BreakpointKind, BreakpointRecord};

use self::cache::BreakpointCache;
use self::reconcile::{SlotChange, SlotOutcome};
use crate::command::{CommandControl, MiCommand, MiError, MiEvent, MiReply, PendingReply};
use crate::context::{BreakpointRef, ContainerContext, Context, ContextFactory, SessionId, TargetContext, TypedContext};
use crate::error::{Error, Result};
use crate::processes::UNIQUE_GROUP_ID;
use futures_util::future::join_all;
use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tokio::sync::broadcast;

/// Change notification published after a confirmed backend change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointEvent {
    Added { target: TargetContext, breakpoints: Vec<BreakpointRef> },
    Updated { target: TargetContext, breakpoints: Vec<BreakpointRef> },
    Removed { target: TargetContext, breakpoints: Vec<BreakpointRef> },
}

impl BreakpointEvent {
    pub fn target(&self) -> &TargetContext {
        match self {
            Self::Added { target, .. } | Self::Updated { target, .. } | Self::Removed { target, .. } => target,
        }
    }

    pub fn breakpoints(&self) -> &[BreakpointRef] {
        match self {
            Self::Added { breakpoints, .. }
            | Self::Updated { breakpoints, .. }
            | Self::Removed { breakpoints, .. } => breakpoints,
        }
    }
}

pub struct BreakpointService {
    control: Rc<dyn CommandControl>,
    cache: RefCell<BreakpointCache>,
    /// Breakpoints each suspended execution context last stopped at.
    hits: RefCell<HashMap<Context, Vec<BreakpointRef>>>,
    events: broadcast::Sender<BreakpointEvent>,
    session: SessionId,
    /// Breakpoint space of contexts that sit under no container.
    default_target: TargetContext,
    strict_watchpoint_access: bool,
}

impl BreakpointService {
    pub fn new(
        control: Rc<dyn CommandControl>,
        session: SessionId,
        events: broadcast::Sender<BreakpointEvent>,
        strict_watchpoint_access: bool,
    ) -> Self {
        let default_target = ContextFactory::new(session.clone()).root_container(UNIQUE_GROUP_ID);
        Self {
            control,
            cache: RefCell::default(),
            hits: RefCell::default(),
            events,
            session,
            default_target,
            strict_watchpoint_access,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakpointEvent> {
        self.events.subscribe()
    }

    /// List the breakpoints of `target`.
    ///
    /// A target nothing was ever inserted into has no breakpoints and the
    /// backend is not asked. Otherwise the backend listing replaces the cache.
    pub async fn get_breakpoints(&self, target: &TargetContext) -> Result<Vec<BreakpointRef>> {
        self.check_session(target)?;
        if !self.cache.borrow().contains_target(target) {
            return Ok(Vec::new());
        }

        let command = MiCommand::BreakList { target: target.clone() };
        let operation = command.operation();
        let descriptors = self.queue(command).await?.into_breakpoints(operation)?;

        let records: Vec<BreakpointRecord> = descriptors
            .iter()
            .filter_map(|descriptor| {
                let record = BreakpointRecord::from_descriptor(descriptor);
                if record.is_none() {
                    warn!("{target}: skipping listed breakpoint without a number");
                }
                record
            })
            .collect();
        let refs = records.iter().map(|record| BreakpointRef::new(target, record.reference)).collect();
        self.cache.borrow_mut().clear_and_replace(target, records);
        Ok(refs)
    }

    /// Cached data for one breakpoint. Never contacts the backend.
    pub fn get_breakpoint_data(&self, breakpoint: &BreakpointRef) -> Result<BreakpointRecord> {
        let target = self.target_of(breakpoint)?;
        self.cache
            .borrow()
            .record(&target, breakpoint.reference())
            .cloned()
            .ok_or(Error::UnknownBreakpoint)
    }

    pub async fn insert_breakpoint(&self, target: &TargetContext, attributes: &Attributes) -> Result<BreakpointRef> {
        self.check_session(target)?;
        let spec = BreakpointSpec::from_attributes(attributes, self.strict_watchpoint_access)?;
        self.cache.borrow_mut().ensure(target);

        match spec {
            BreakpointSpec::Breakpoint(breakpoint) => self.add_breakpoint(target, &breakpoint).await,
            BreakpointSpec::Watchpoint(watchpoint) => self.add_watchpoint(target, &watchpoint).await,
        }
    }

    async fn add_breakpoint(&self, target: &TargetContext, breakpoint: &LineBreakpoint) -> Result<BreakpointRef> {
        let command = MiCommand::BreakInsert {
            target: target.clone(),
            temporary: breakpoint.temporary,
            hardware: breakpoint.hardware,
            condition: breakpoint.condition.clone(),
            ignore_count: breakpoint.ignore_count,
            location: breakpoint.location.clone(),
            thread_id: breakpoint.thread_id,
        };
        let operation = command.operation();
        let reply = self.queue(command).await;
        let record = first_record(reply, operation).map_err(|reason| {
            warn!("{target}: breakpoint at {} not inserted: {reason}", breakpoint.location);
            Error::BreakpointInsertionFailure
        })?;

        let handle = self.install(target, record);
        // The backend always creates breakpoints enabled.
        self.modify_breakpoint(&handle, target, &breakpoint.follow_up(), false).await?;
        Ok(handle)
    }

    async fn add_watchpoint(&self, target: &TargetContext, watchpoint: &Watchpoint) -> Result<BreakpointRef> {
        let command = MiCommand::BreakWatch {
            target: target.clone(),
            access: watchpoint.access,
            expression: watchpoint.expression.clone(),
        };
        let operation = command.operation();
        let reply = self.queue(command).await;
        let record = first_record(reply, operation).map_err(|reason| {
            warn!("{target}: watchpoint on {} not inserted: {reason}", watchpoint.expression);
            Error::WatchpointInsertionFailure
        })?;

        let handle = self.install(target, record);
        self.modify_breakpoint(&handle, target, &watchpoint.follow_up(), false).await?;
        Ok(handle)
    }

    fn install(&self, target: &TargetContext, record: BreakpointRecord) -> BreakpointRef {
        let handle = BreakpointRef::new(target, record.reference);
        info!("{target}: installed {:?} {} at {}", record.kind, record.reference, record.location);
        self.cache.borrow_mut().upsert(target, record);
        let _ = self.events.send(BreakpointEvent::Added { target: target.clone(), breakpoints: vec![handle.clone()] });
        handle
    }

    /// Delete a breakpoint. The cache entry goes away only once the backend
    /// confirms.
    pub async fn remove_breakpoint(&self, breakpoint: &BreakpointRef) -> Result<()> {
        let target = self.resolve(breakpoint)?;
        let reference = breakpoint.reference();

        let command = MiCommand::BreakDelete { target: target.clone(), references: vec![reference] };
        let operation = command.operation();
        if let Err(err) = self.queue(command).await.and_then(|reply| reply.into_done(operation)) {
            warn!("{target}: failed to delete breakpoint {reference}: {err}");
            return Err(err.into());
        }

        self.cache.borrow_mut().remove(&target, reference);
        let _ = self.events.send(BreakpointEvent::Removed { target, breakpoints: vec![breakpoint.clone()] });
        Ok(())
    }

    /// Apply the condition, ignore count and enabled state found in
    /// `attributes`. Other attributes are ignored.
    pub async fn update_breakpoint(&self, breakpoint: &BreakpointRef, attributes: &Attributes) -> Result<()> {
        let target = self.resolve(breakpoint)?;
        let delta = AttributeDelta::try_from(attributes)?;
        self.modify_breakpoint(breakpoint, &target, &delta, true).await
    }

    /// Move the cached record to `delta`, one command per differing slot.
    ///
    /// All commands are queued before any reply is awaited. The record only
    /// takes the slots the backend confirmed. The first failing slot, in slot
    /// order, is the result.
    async fn modify_breakpoint(
        &self,
        breakpoint: &BreakpointRef,
        target: &TargetContext,
        delta: &AttributeDelta,
        generate_update_event: bool,
    ) -> Result<()> {
        let reference = breakpoint.reference();
        let changes = {
            let cache = self.cache.borrow();
            let record = cache.record(target, reference).ok_or(Error::UnknownBreakpoint)?;
            reconcile::plan(record, delta)
        };
        if changes.is_empty() {
            return Ok(());
        }

        let slots: Vec<_> = changes
            .into_iter()
            .map(|change| {
                let reply = self.queue(change.command(target, reference));
                self.complete_slot(target, reference, change, reply)
            })
            .collect();
        let (applied, result) = reconcile::join_outcomes(join_all(slots).await);

        if applied && generate_update_event {
            let _ = self.events.send(BreakpointEvent::Updated {
                target: target.clone(),
                breakpoints: vec![breakpoint.clone()],
            });
        }
        result
    }

    async fn complete_slot(
        &self,
        target: &TargetContext,
        reference: u32,
        change: SlotChange,
        reply: PendingReply,
    ) -> SlotOutcome {
        match reply.await.and_then(|reply| reply.into_done(change.operation())) {
            Ok(()) => match self.cache.borrow_mut().record_mut(target, reference) {
                Some(record) => {
                    change.apply(record);
                    SlotOutcome { applied: true, result: Ok(()) }
                }
                None => SlotOutcome { applied: false, result: Err(Error::UnknownBreakpoint) },
            },
            Err(err) if matches!(change, SlotChange::Condition(_)) => {
                self.recover_condition(target, reference, &err).await
            }
            Err(err) => {
                warn!("{target}: {} for breakpoint {reference} failed: {err}", change.operation());
                SlotOutcome { applied: false, result: Err(err.into()) }
            }
        }
    }

    /// GDB either keeps the old condition or the rejected one after a failed
    /// `-break-condition`. Clear it on both sides and report the rejection.
    async fn recover_condition(&self, target: &TargetContext, reference: u32, err: &MiError) -> SlotOutcome {
        warn!("{target}: condition rejected for breakpoint {reference}, clearing it: {err}");
        match self.cache.borrow_mut().record_mut(target, reference) {
            Some(record) => record.condition.clear(),
            None => return SlotOutcome { applied: false, result: Err(Error::UnknownBreakpoint) },
        }

        let command = MiCommand::BreakCondition { target: target.clone(), reference, condition: String::new() };
        if let Err(clear_err) = self.queue(command).await {
            debug!("{target}: clearing condition of breakpoint {reference} failed: {clear_err}");
        }
        SlotOutcome { applied: true, result: Err(Error::InvalidCondition) }
    }

    /// Breakpoints `context` is suspended at.
    ///
    /// A container with no entry of its own collects the entries of every
    /// execution context inside it. Anything else without an entry is not
    /// suspended at a breakpoint.
    pub fn get_execution_context_breakpoints(&self, context: &Context) -> Result<Vec<BreakpointRef>> {
        if *context.session() != self.session {
            return Err(Error::UnknownExecutionContext);
        }
        let hits = self.hits.borrow();
        if let Some(breakpoints) = hits.get(context) {
            return Ok(breakpoints.clone());
        }
        let Some(container) = ContainerContext::from_context(context) else {
            return Ok(Vec::new());
        };

        let mut breakpoints: Vec<BreakpointRef> = hits
            .iter()
            .filter(|(suspended, _)| self.target_for(suspended).as_ref() == Some(&container))
            .flat_map(|(_, breakpoints)| breakpoints.iter().cloned())
            .collect();
        breakpoints.sort_by_key(BreakpointRef::reference);
        breakpoints.dedup();
        Ok(breakpoints)
    }

    /// Apply a backend-initiated change. These never produce events.
    pub fn handle_event(&self, event: &MiEvent) {
        match event {
            MiEvent::WatchpointScope { context, number } => {
                let Some(target) = self.target_for(context) else {
                    warn!("{context}: scope exit for watchpoint {number} from another session");
                    return;
                };
                if self.cache.borrow_mut().remove(&target, *number).is_some() {
                    debug!("{target}: watchpoint {number} went out of scope");
                }
            }
            MiEvent::BreakpointHit { context, numbers } => {
                let Some(target) = self.target_for(context) else {
                    warn!("{context}: breakpoint hit from another session");
                    return;
                };
                let breakpoints = numbers.iter().map(|number| BreakpointRef::new(&target, *number)).collect();
                debug!("{context}: stopped at breakpoint(s) {numbers:?}");
                self.hits.borrow_mut().insert(context.clone(), breakpoints);
            }
            MiEvent::Resumed(context) | MiEvent::Exited(context) => self.clear_hits(context),
            MiEvent::SessionEnded(session) => {
                let dropped = self.cache.borrow_mut().drop_session(session);
                self.hits.borrow_mut().retain(|suspended, _| suspended.session() != session);
                info!("session {session} ended, dropped {dropped} breakpoint target(s)");
            }
        }
    }

    /// Forget the hits of `context`, and of everything inside it when it is a
    /// container.
    fn clear_hits(&self, context: &Context) {
        let mut hits = self.hits.borrow_mut();
        match ContainerContext::from_context(context) {
            Some(container) => hits.retain(|suspended, _| self.target_for(suspended).as_ref() != Some(&container)),
            None => {
                hits.remove(context);
            }
        }
    }

    /// Breakpoint space `context` belongs to: its nearest container, or the
    /// single-process group when it has none. `None` for another session.
    fn target_for(&self, context: &Context) -> Option<TargetContext> {
        if *context.session() != self.session {
            return None;
        }
        Some(context.ancestor::<TargetContext>().unwrap_or_else(|| self.default_target.clone()))
    }

    fn queue(&self, command: MiCommand) -> PendingReply {
        debug!("{} <- {command}", command.context());
        self.control.queue_command(command)
    }

    fn check_session(&self, target: &TargetContext) -> Result<()> {
        if *target.context().session() == self.session {
            Ok(())
        } else {
            Err(Error::UnknownExecutionContext)
        }
    }

    fn target_of(&self, breakpoint: &BreakpointRef) -> Result<TargetContext> {
        let target = breakpoint.target().ok_or(Error::UnknownExecutionContext)?;
        self.check_session(&target)?;
        Ok(target)
    }

    /// Target of a breakpoint that must currently be cached.
    fn resolve(&self, breakpoint: &BreakpointRef) -> Result<TargetContext> {
        let target = self.target_of(breakpoint)?;
        let cache = self.cache.borrow();
        let known = cache.get(&target).ok_or(Error::UnknownBreakpointContext)?;
        if !known.contains_key(&breakpoint.reference()) {
            return Err(Error::UnknownBreakpoint);
        }
        Ok(target)
    }
}

/// The record described by an insert or watch reply. An empty reply means
/// the location was not resolved, even though the backend reported success.
fn first_record(reply: Result<MiReply, MiError>, operation: &'static str) -> Result<BreakpointRecord, String> {
    let descriptors = reply.and_then(|reply| reply.into_breakpoints(operation)).map_err(|err| err.to_string())?;
    let descriptor = descriptors.first().ok_or_else(|| "no breakpoint in reply".to_string())?;
    BreakpointRecord::from_descriptor(descriptor).ok_or_else(|| "reply has no breakpoint number".to_string())
}

#[cfg(test)]
mod tests {
    use super::attributes::{CONDITION, FUNCTION, IS_ENABLED};
    use super::*;
    use crate::command::MiBreakpoint;
    use crate::context::ContextFactory;
    use std::cell::RefCell;

    /// Answers inline: inserts succeed with the next number, everything else
    /// is acknowledged.
    #[derive(Default)]
    struct InlineBackend {
        issued: RefCell<Vec<String>>,
        next: RefCell<u32>,
    }

    impl CommandControl for InlineBackend {
        fn queue_command(&self, command: MiCommand) -> PendingReply {
            self.issued.borrow_mut().push(command.to_string());
            let reply = match command {
                MiCommand::BreakInsert { location, .. } => {
                    *self.next.borrow_mut() += 1;
                    MiReply::BreakInsert(vec![MiBreakpoint {
                        number: Some(*self.next.borrow()),
                        kind: "breakpoint".to_string(),
                        enabled: true,
                        function: Some(location),
                        ..MiBreakpoint::default()
                    }])
                }
                _ => MiReply::Done,
            };
            PendingReply::ready(Ok(reply))
        }
    }

    fn service() -> (Rc<InlineBackend>, BreakpointService, ContextFactory) {
        let backend = Rc::new(InlineBackend::default());
        let (events, _) = broadcast::channel(16);
        let factory = ContextFactory::new(SessionId::new("s1"));
        let service = BreakpointService::new(backend.clone(), factory.session().clone(), events, true);
        (backend, service, factory)
    }

    #[tokio::test]
    async fn test_insert_then_disable_follow_up() {
        let (backend, service, factory) = service();
        let target = factory.root_container("0");
        let mut events = service.subscribe();

        let attributes = Attributes::breakpoint().with(FUNCTION, "main").with(IS_ENABLED, false);
        let bp = service.insert_breakpoint(&target, &attributes).await.unwrap();

        assert_eq!(*backend.issued.borrow(), vec!["-break-insert main", "-break-disable 1"]);
        assert!(!service.get_breakpoint_data(&bp).unwrap().enabled);
        assert!(matches!(events.try_recv(), Ok(BreakpointEvent::Added { .. })));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_validation_issues_nothing() {
        let (backend, service, factory) = service();
        let target = factory.root_container("0");
        let foreign = ContextFactory::new(SessionId::new("s2")).root_container("0");

        assert_eq!(
            service.insert_breakpoint(&foreign, &Attributes::breakpoint().with(FUNCTION, "f")).await,
            Err(Error::UnknownExecutionContext)
        );
        assert_eq!(
            service.insert_breakpoint(&target, &Attributes::new()).await,
            Err(Error::UnknownBreakpointType)
        );
        assert_eq!(
            service.update_breakpoint(&BreakpointRef::new(&target, 1), &Attributes::new()).await,
            Err(Error::UnknownBreakpointContext)
        );
        assert!(backend.issued.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_update_emits_once() {
        let (backend, service, factory) = service();
        let target = factory.root_container("0");
        let bp = service.insert_breakpoint(&target, &Attributes::breakpoint().with(FUNCTION, "f")).await.unwrap();
        let mut events = service.subscribe();

        let attributes = Attributes::new().with(CONDITION, "i > 3").with(IS_ENABLED, false);
        service.update_breakpoint(&bp, &attributes).await.unwrap();

        assert_eq!(backend.issued.borrow()[1..], ["-break-condition 1 i > 3", "-break-disable 1"]);
        let record = service.get_breakpoint_data(&bp).unwrap();
        assert_eq!(record.condition, "i > 3");
        assert!(!record.enabled);
        assert!(matches!(events.try_recv(), Ok(BreakpointEvent::Updated { .. })));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_scope_exit_is_silent() {
        let (_backend, service, factory) = service();
        let target = factory.root_container("0");
        let bp = service.insert_breakpoint(&target, &Attributes::breakpoint().with(FUNCTION, "f")).await.unwrap();
        let mut events = service.subscribe();

        service.handle_event(&MiEvent::WatchpointScope { context: target.context().clone(), number: bp.reference() });
        assert_eq!(service.get_breakpoint_data(&bp), Err(Error::UnknownBreakpoint));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_thread_scope_exit_uses_default_group() {
        let (_backend, service, factory) = service();
        let target = factory.root_container("0");
        let bp = service.insert_breakpoint(&target, &Attributes::breakpoint().with(FUNCTION, "f")).await.unwrap();

        let thread = factory.thread(&factory.process("42"), "1");
        service.handle_event(&MiEvent::WatchpointScope { context: thread.context().clone(), number: bp.reference() });
        assert_eq!(service.get_breakpoint_data(&bp), Err(Error::UnknownBreakpoint));
    }

    #[test]
    fn test_hits_replace_and_clear() {
        let (_backend, service, factory) = service();
        let target = factory.root_container("0");
        let thread = factory.thread(&factory.process("42"), "1");
        let context = thread.context();

        service.handle_event(&MiEvent::BreakpointHit { context: context.clone(), numbers: vec![1, 2] });
        service.handle_event(&MiEvent::BreakpointHit { context: context.clone(), numbers: vec![3] });
        assert_eq!(service.get_execution_context_breakpoints(context), Ok(vec![BreakpointRef::new(&target, 3)]));

        service.handle_event(&MiEvent::Resumed(context.clone()));
        assert_eq!(service.get_execution_context_breakpoints(context), Ok(Vec::new()));

        let foreign = ContextFactory::new(SessionId::new("s2")).root_container("0");
        assert_eq!(
            service.get_execution_context_breakpoints(foreign.context()),
            Err(Error::UnknownExecutionContext)
        );
    }
}
