//! In-process GDB stand-in.
//!
//! [`GdbState`] answers MI commands the way GDB does, including its quirks:
//! an unresolvable location produces an empty insert reply rather than an
//! error, and a rejected condition is kept by the breakpoint. [`SimulatedGdb`]
//! runs a state on its own thread behind the [`CommandControl`] seam.

use crate::command::{
    CommandControl, MiBreakpoint, MiCommand, MiError, MiEvent, MiReply, PendingReply, ReplySender, WatchAccess,
};
use crate::context::{Context, SessionId, TargetContext, TypedContext};
use anyhow::Context as _;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};
use std::collections::{BTreeMap, HashSet};
use std::thread;

#[derive(Debug, Default)]
pub struct GdbState {
    breakpoints: BTreeMap<u32, (TargetContext, MiBreakpoint)>,
    last_number: u32,
    unresolved_locations: HashSet<String>,
    invalid_conditions: HashSet<String>,
    attached: Option<String>,
    refuse_attach: bool,
}

impl GdbState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locations and watch expressions that do not resolve.
    #[must_use]
    pub fn unresolved_location(mut self, location: &str) -> Self {
        self.unresolved_locations.insert(location.to_string());
        self
    }

    /// Conditions GDB refuses to parse.
    #[must_use]
    pub fn invalid_condition(mut self, condition: &str) -> Self {
        self.invalid_conditions.insert(condition.to_string());
        self
    }

    #[must_use]
    pub fn refuse_attach(mut self) -> Self {
        self.refuse_attach = true;
        self
    }

    pub fn breakpoint(&self, number: u32) -> Option<&MiBreakpoint> {
        self.breakpoints.get(&number).map(|(_, bp)| bp)
    }

    pub fn attached(&self) -> Option<&str> {
        self.attached.as_deref()
    }

    pub fn execute(&mut self, command: &MiCommand) -> Result<MiReply, MiError> {
        match command {
            MiCommand::BreakInsert { target, temporary, hardware, condition, ignore_count, location, thread_id } => {
                if self.unresolved_locations.contains(location) {
                    return Ok(MiReply::BreakInsert(Vec::new()));
                }
                self.check_condition(condition)?;
                let mut bp = MiBreakpoint {
                    kind: (if *hardware { "hw breakpoint" } else { "breakpoint" }).to_string(),
                    temporary: *temporary,
                    enabled: true,
                    condition: (!condition.is_empty()).then(|| condition.clone()),
                    ignore_count: *ignore_count,
                    hit_count: Some(0),
                    thread_id: (*thread_id > 0).then(|| thread_id.to_string()),
                    original_location: Some(location.clone()),
                    ..MiBreakpoint::default()
                };
                resolve(&mut bp, location);
                Ok(MiReply::BreakInsert(vec![self.install(target, bp)]))
            }
            MiCommand::BreakWatch { target, access, expression } => {
                if self.unresolved_locations.contains(expression) {
                    return Err(MiError::rejected(format!("No symbol \"{expression}\" in current context.")));
                }
                let kind = match access {
                    WatchAccess::Write => "hw watchpoint",
                    WatchAccess::Read => "read watchpoint",
                    WatchAccess::Access => "acc watchpoint",
                };
                let bp = MiBreakpoint {
                    kind: kind.to_string(),
                    enabled: true,
                    expression: Some(expression.clone()),
                    hit_count: Some(0),
                    ..MiBreakpoint::default()
                };
                Ok(MiReply::BreakInsert(vec![self.install(target, bp)]))
            }
            MiCommand::BreakDelete { references, .. } => {
                self.check_references(references)?;
                for number in references {
                    self.breakpoints.remove(number);
                }
                Ok(MiReply::Done)
            }
            MiCommand::BreakEnable { references, .. } | MiCommand::BreakDisable { references, .. } => {
                self.check_references(references)?;
                let enabled = matches!(command, MiCommand::BreakEnable { .. });
                for number in references {
                    if let Some((_, bp)) = self.breakpoints.get_mut(number) {
                        bp.enabled = enabled;
                    }
                }
                Ok(MiReply::Done)
            }
            MiCommand::BreakCondition { reference, condition, .. } => {
                let bp = self.lookup(*reference)?;
                // GDB keeps the rejected expression on the breakpoint.
                bp.condition = (!condition.is_empty()).then(|| condition.clone());
                self.check_condition(condition)?;
                Ok(MiReply::Done)
            }
            MiCommand::BreakAfter { reference, count, .. } => {
                self.lookup(*reference)?.ignore_count = *count;
                Ok(MiReply::Done)
            }
            MiCommand::BreakList { target } => Ok(MiReply::BreakList(
                self.breakpoints
                    .values()
                    .filter(|(owner, _)| owner == target)
                    .map(|(_, bp)| bp.clone())
                    .collect(),
            )),
            MiCommand::TargetAttach { pid, .. } => {
                if pid.parse::<u32>().is_err() {
                    return Err(MiError::rejected(format!("Illegal process-id: {pid}.")));
                }
                if self.refuse_attach {
                    return Err(MiError::rejected(format!("Cannot attach to process ID {pid}: Operation not permitted.")));
                }
                self.attached = Some(pid.clone());
                Ok(MiReply::Done)
            }
        }
    }

    /// Drop a watchpoint whose frame went away, as GDB does on scope exit.
    pub fn leave_scope(&mut self, number: u32) -> Option<MiEvent> {
        let (target, bp) = self.breakpoints.remove(&number)?;
        debug!("watchpoint {number} on {:?} left scope", bp.expression);
        Some(MiEvent::WatchpointScope { context: target.context().clone(), number })
    }

    /// Run `context` into breakpoint `number`. Disabled breakpoints and
    /// pending ignore counts let execution through. A temporary breakpoint is
    /// deleted by its hit.
    pub fn hit(&mut self, context: &Context, number: u32) -> Option<MiEvent> {
        let (_, bp) = self.breakpoints.get_mut(&number)?;
        if !bp.enabled {
            return None;
        }
        if bp.ignore_count > 0 {
            bp.ignore_count -= 1;
            return None;
        }
        bp.hit_count = Some(bp.hit_count.unwrap_or(0) + 1);
        if bp.temporary {
            self.breakpoints.remove(&number);
        }
        debug!("{context} stopped at breakpoint {number}");
        Some(MiEvent::BreakpointHit { context: context.clone(), numbers: vec![number] })
    }

    fn install(&mut self, target: &TargetContext, mut bp: MiBreakpoint) -> MiBreakpoint {
        self.last_number += 1;
        bp.number = Some(self.last_number);
        self.breakpoints.insert(self.last_number, (target.clone(), bp.clone()));
        bp
    }

    fn lookup(&mut self, number: u32) -> Result<&mut MiBreakpoint, MiError> {
        self.breakpoints
            .get_mut(&number)
            .map(|(_, bp)| bp)
            .ok_or_else(|| MiError::rejected(format!("No breakpoint number {number}.")))
    }

    fn check_references(&self, references: &[u32]) -> Result<(), MiError> {
        match references.iter().find(|number| !self.breakpoints.contains_key(*number)) {
            Some(number) => Err(MiError::rejected(format!("No breakpoint number {number}."))),
            None => Ok(()),
        }
    }

    fn check_condition(&self, condition: &str) -> Result<(), MiError> {
        if self.invalid_conditions.contains(condition) {
            Err(MiError::rejected(format!("A syntax error in expression, near `{condition}'.")))
        } else {
            Ok(())
        }
    }
}

/// Fill the location fields of a descriptor from a linespec.
fn resolve(bp: &mut MiBreakpoint, location: &str) {
    if let Some(address) = location.strip_prefix('*') {
        bp.address = Some(address.to_string());
    } else if let Some((file, rest)) = location.rsplit_once(':') {
        bp.file = Some(file.trim_matches('"').to_string());
        match rest.parse() {
            Ok(line) => bp.line = Some(line),
            Err(_) => bp.function = Some(rest.to_string()),
        }
    } else {
        bp.function = Some(location.to_string());
    }
}

enum SimRequest {
    Command(MiCommand, ReplySender),
    LeaveScope(u32),
    Hit(Context, u32),
    Resume(Context),
    EndSession(SessionId),
}

/// A [`GdbState`] on its own thread, fed through a crossbeam channel.
///
/// Commands are executed in the order they were queued. Backend-initiated
/// events come out of the receiver returned by [`SimulatedGdb::spawn`].
#[derive(Clone)]
pub struct SimulatedGdb {
    request_tx: Sender<SimRequest>,
}

impl SimulatedGdb {
    pub fn spawn(state: GdbState) -> anyhow::Result<(Self, Receiver<MiEvent>)> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name("simulated-gdb".to_string())
            .spawn(move || serve(state, &request_rx, &event_tx))
            .context("Failed to spawn simulated backend")?;
        Ok((Self { request_tx }, event_rx))
    }

    /// Make watchpoint `number` go out of scope.
    pub fn leave_scope(&self, number: u32) {
        let _ = self.request_tx.send(SimRequest::LeaveScope(number));
    }

    /// Run `context` into breakpoint `number`.
    pub fn hit(&self, context: Context, number: u32) {
        let _ = self.request_tx.send(SimRequest::Hit(context, number));
    }

    /// Let `context` continue.
    pub fn resume(&self, context: Context) {
        let _ = self.request_tx.send(SimRequest::Resume(context));
    }

    /// Report the connection for `session` as gone.
    pub fn end_session(&self, session: SessionId) {
        let _ = self.request_tx.send(SimRequest::EndSession(session));
    }
}

impl CommandControl for SimulatedGdb {
    fn queue_command(&self, command: MiCommand) -> PendingReply {
        let (reply_tx, reply) = PendingReply::channel();
        // A closed backend drops the sender, which resolves the reply as
        // TransportClosed.
        let _ = self.request_tx.send(SimRequest::Command(command, reply_tx));
        reply
    }
}

fn serve(mut state: GdbState, requests: &Receiver<SimRequest>, events: &Sender<MiEvent>) {
    info!("simulated backend started");
    for request in requests {
        match request {
            SimRequest::Command(command, reply) => {
                let result = state.execute(&command);
                debug!("{command} -> {result:?}");
                reply.send(result);
            }
            SimRequest::LeaveScope(number) => {
                if let Some(event) = state.leave_scope(number) {
                    let _ = events.send(event);
                }
            }
            SimRequest::Hit(context, number) => {
                if let Some(event) = state.hit(&context, number) {
                    let _ = events.send(event);
                }
            }
            SimRequest::Resume(context) => {
                let _ = events.send(MiEvent::Resumed(context));
            }
            SimRequest::EndSession(session) => {
                let _ = events.send(MiEvent::SessionEnded(session));
            }
        }
    }
    info!("simulated backend stopped");
}
