//! Service session.
//!
//! Runs the breakpoint and process services on a dedicated executor thread
//! and exposes them through [`ServiceHandle`]. Callers on any thread send
//! requests over a channel and await a oneshot reply; breakpoint events are
//! broadcast to every subscriber.

use crate::breakpoint::{Attributes, BreakpointEvent, BreakpointRecord, BreakpointService};
use crate::command::{CommandControl, MiEvent};
use crate::config::ServiceConfig;
use crate::context::{
    BreakpointRef, ContainerContext, Context, ContextFactory, ExecutionGroupContext, ProcessContext, SessionId,
    TargetContext, ThreadContext,
};
use crate::error::{Error, Result};
use crate::processes::{ProcessCapabilities, ProcessService, ThreadMetadata};
use anyhow::{anyhow, Context as _};
use log::{debug, info};
use std::rc::Rc;
use std::thread;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{spawn_local, LocalSet};

type Reply<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
enum ServiceCommand {
    GetBreakpoints { target: TargetContext, reply: Reply<Vec<BreakpointRef>> },
    GetBreakpointData { breakpoint: BreakpointRef, reply: Reply<BreakpointRecord> },
    InsertBreakpoint { target: TargetContext, attributes: Attributes, reply: Reply<BreakpointRef> },
    RemoveBreakpoint { breakpoint: BreakpointRef, reply: Reply<()> },
    UpdateBreakpoint { breakpoint: BreakpointRef, attributes: Attributes, reply: Reply<()> },
    GetExecutionContextBreakpoints { context: Context, reply: Reply<Vec<BreakpointRef>> },
    GetExecutionData { context: Context, reply: Reply<ThreadMetadata> },
    AttachDebugger { process: ProcessContext, reply: Reply<ContainerContext> },
    GetProcessesBeingDebugged { context: Context, reply: Reply<Vec<ContainerContext>> },
    Capabilities { reply: Reply<ProcessCapabilities> },
    RunNewProcess { executable: String, reply: Reply<ProcessContext> },
    DebugNewProcess { executable: String, reply: Reply<ProcessContext> },
    DetachDebugger { process: ProcessContext, reply: Reply<()> },
    BackendEvent(MiEvent),
}

/// A handle to the services running on their executor thread.
///
/// Dropping the handle closes the request channel; the executor finishes the
/// requests already accepted and exits. [`ServiceHandle::shutdown`] also
/// waits for that.
pub struct ServiceHandle {
    command_tx: mpsc::UnboundedSender<ServiceCommand>,
    event_tx: broadcast::Sender<BreakpointEvent>,
    factory: ContextFactory,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl ServiceHandle {
    /// Start the executor thread with `control` as the command transport.
    pub fn spawn<C>(config: &ServiceConfig, control: C) -> anyhow::Result<Self>
    where
        C: CommandControl + Send + 'static,
    {
        config.validate()?;
        let factory = ContextFactory::new(SessionId::new(config.session_id.clone()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .context("Failed to build service runtime")?;

        let thread_factory = factory.clone();
        let thread_events = event_tx.clone();
        let strict = config.strict_watchpoint_access;
        let thread_handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let control: Rc<dyn CommandControl> = Rc::new(control);
                let breakpoints = Rc::new(BreakpointService::new(
                    Rc::clone(&control),
                    thread_factory.session().clone(),
                    thread_events,
                    strict,
                ));
                let processes = Rc::new(ProcessService::new(control, thread_factory));

                let local = LocalSet::new();
                local.spawn_local(run(command_rx, breakpoints, processes));
                // Completes once the request channel is closed and every
                // accepted request has finished.
                runtime.block_on(local);
            })
            .context("Failed to spawn service thread")?;

        info!("session {} started", factory.session());
        Ok(Self { command_tx, event_tx, factory, thread_handle: Some(thread_handle) })
    }

    /// Subscribe to breakpoint events
    pub fn subscribe(&self) -> broadcast::Receiver<BreakpointEvent> {
        self.event_tx.subscribe()
    }

    pub fn session(&self) -> &SessionId {
        self.factory.session()
    }

    pub fn contexts(&self) -> &ContextFactory {
        &self.factory
    }

    pub fn create_thread_context(&self, process: &ProcessContext, os_thread_id: &str) -> ThreadContext {
        self.factory.thread(process, os_thread_id)
    }

    pub fn create_process_context(&self, os_pid: &str) -> ProcessContext {
        self.factory.process(os_pid)
    }

    pub fn create_container_context(&self, process: &ProcessContext, group_id: &str) -> ContainerContext {
        self.factory.container(process, group_id)
    }

    pub fn create_execution_group_context(
        &self,
        container: &ContainerContext,
        process: &ProcessContext,
        group_id: &str,
    ) -> ExecutionGroupContext {
        self.factory.execution_group(container, process, group_id)
    }

    pub async fn get_breakpoints(&self, target: &TargetContext) -> Result<Vec<BreakpointRef>> {
        self.request(|reply| ServiceCommand::GetBreakpoints { target: target.clone(), reply }).await
    }

    pub async fn get_breakpoint_data(&self, breakpoint: &BreakpointRef) -> Result<BreakpointRecord> {
        self.request(|reply| ServiceCommand::GetBreakpointData { breakpoint: breakpoint.clone(), reply }).await
    }

    pub async fn insert_breakpoint(&self, target: &TargetContext, attributes: Attributes) -> Result<BreakpointRef> {
        self.request(|reply| ServiceCommand::InsertBreakpoint { target: target.clone(), attributes, reply }).await
    }

    pub async fn remove_breakpoint(&self, breakpoint: &BreakpointRef) -> Result<()> {
        self.request(|reply| ServiceCommand::RemoveBreakpoint { breakpoint: breakpoint.clone(), reply }).await
    }

    pub async fn update_breakpoint(&self, breakpoint: &BreakpointRef, attributes: Attributes) -> Result<()> {
        self.request(|reply| ServiceCommand::UpdateBreakpoint { breakpoint: breakpoint.clone(), attributes, reply })
            .await
    }

    /// Breakpoints `context` is suspended at, see
    /// [`BreakpointService::get_execution_context_breakpoints`].
    pub async fn get_execution_context_breakpoints(&self, context: &Context) -> Result<Vec<BreakpointRef>> {
        self.request(|reply| ServiceCommand::GetExecutionContextBreakpoints { context: context.clone(), reply }).await
    }

    pub async fn get_execution_data(&self, context: &Context) -> Result<ThreadMetadata> {
        self.request(|reply| ServiceCommand::GetExecutionData { context: context.clone(), reply }).await
    }

    pub async fn attach_debugger_to_process(&self, process: &ProcessContext) -> Result<ContainerContext> {
        self.request(|reply| ServiceCommand::AttachDebugger { process: process.clone(), reply }).await
    }

    pub async fn get_processes_being_debugged(&self, context: &Context) -> Result<Vec<ContainerContext>> {
        self.request(|reply| ServiceCommand::GetProcessesBeingDebugged { context: context.clone(), reply }).await
    }

    pub async fn capabilities(&self) -> Result<ProcessCapabilities> {
        self.request(|reply| ServiceCommand::Capabilities { reply }).await
    }

    pub async fn run_new_process(&self, executable: &str) -> Result<ProcessContext> {
        self.request(|reply| ServiceCommand::RunNewProcess { executable: executable.to_string(), reply }).await
    }

    pub async fn debug_new_process(&self, executable: &str) -> Result<ProcessContext> {
        self.request(|reply| ServiceCommand::DebugNewProcess { executable: executable.to_string(), reply }).await
    }

    pub async fn detach_debugger_from_process(&self, process: &ProcessContext) -> Result<()> {
        self.request(|reply| ServiceCommand::DetachDebugger { process: process.clone(), reply }).await
    }

    /// Deliver a backend-initiated event. It is applied after every request
    /// sent before it.
    pub fn notify(&self, event: MiEvent) -> Result<()> {
        self.command_tx.send(ServiceCommand::BackendEvent(event)).map_err(|_| Error::ServiceShutdown)
    }

    /// Stop accepting requests and wait for the executor to drain.
    pub fn shutdown(self) -> anyhow::Result<()> {
        let Self { command_tx, thread_handle, factory, .. } = self;
        drop(command_tx);
        if let Some(handle) = thread_handle {
            handle.join().map_err(|_| anyhow!("service thread panicked"))?;
        }
        info!("session {} stopped", factory.session());
        Ok(())
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> ServiceCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx.send(command(reply_tx)).map_err(|_| Error::ServiceShutdown)?;
        reply_rx.await.unwrap_or(Err(Error::ServiceShutdown))
    }
}

/// Every request becomes its own local task. Tasks are first polled in the
/// order the requests arrived, so their commands reach the transport in that
/// order too.
async fn run(
    mut command_rx: mpsc::UnboundedReceiver<ServiceCommand>,
    breakpoints: Rc<BreakpointService>,
    processes: Rc<ProcessService>,
) {
    while let Some(command) = command_rx.recv().await {
        let breakpoints = Rc::clone(&breakpoints);
        let processes = Rc::clone(&processes);
        spawn_local(async move {
            match command {
                ServiceCommand::GetBreakpoints { target, reply } => {
                    let _ = reply.send(breakpoints.get_breakpoints(&target).await);
                }
                ServiceCommand::GetBreakpointData { breakpoint, reply } => {
                    let _ = reply.send(breakpoints.get_breakpoint_data(&breakpoint));
                }
                ServiceCommand::InsertBreakpoint { target, attributes, reply } => {
                    let _ = reply.send(breakpoints.insert_breakpoint(&target, &attributes).await);
                }
                ServiceCommand::RemoveBreakpoint { breakpoint, reply } => {
                    let _ = reply.send(breakpoints.remove_breakpoint(&breakpoint).await);
                }
                ServiceCommand::UpdateBreakpoint { breakpoint, attributes, reply } => {
                    let _ = reply.send(breakpoints.update_breakpoint(&breakpoint, &attributes).await);
                }
                ServiceCommand::GetExecutionContextBreakpoints { context, reply } => {
                    let _ = reply.send(breakpoints.get_execution_context_breakpoints(&context));
                }
                ServiceCommand::GetExecutionData { context, reply } => {
                    let _ = reply.send(processes.get_execution_data(&context));
                }
                ServiceCommand::AttachDebugger { process, reply } => {
                    let _ = reply.send(processes.attach_debugger_to_process(&process).await);
                }
                ServiceCommand::GetProcessesBeingDebugged { context, reply } => {
                    let _ = reply.send(processes.get_processes_being_debugged(&context));
                }
                ServiceCommand::Capabilities { reply } => {
                    let _ = reply.send(Ok(processes.capabilities()));
                }
                ServiceCommand::RunNewProcess { executable, reply } => {
                    let _ = reply.send(processes.run_new_process(&executable));
                }
                ServiceCommand::DebugNewProcess { executable, reply } => {
                    let _ = reply.send(processes.debug_new_process(&executable));
                }
                ServiceCommand::DetachDebugger { process, reply } => {
                    let _ = reply.send(processes.detach_debugger_from_process(&process));
                }
                ServiceCommand::BackendEvent(event) => {
                    debug!("backend event: {event:?}");
                    breakpoints.handle_event(&event);
                    processes.handle_event(&event);
                }
            }
        });
    }
    debug!("request channel closed");
}
