//! Process and thread identification service.
//!
//! Only single-process debugging is modeled: the debugged inferior is always
//! represented by one synthetic container, which is also the breakpoint
//! target.

use crate::command::{CommandControl, MiCommand, MiEvent};
use crate::context::{
    ContainerContext, Context, ContextFactory, ContextKind, ExecutionGroupContext, ProcessContext, ThreadContext,
    TypedContext,
};
use crate::error::{Error, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

/// Group id of the synthetic container.
pub const UNIQUE_GROUP_ID: &str = "0";
/// Reported for processes; the backend is never asked for names.
pub const UNKNOWN_PROCESS_NAME: &str = "Unknown name";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadMetadata {
    pub name: String,
    pub id: String,
    pub debugger_attached: bool,
}

/// What the backend can do with processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessCapabilities {
    pub attach: bool,
    pub run_new_process: bool,
    pub debug_new_process: bool,
    pub detach: bool,
}

pub struct ProcessService {
    control: Rc<dyn CommandControl>,
    factory: ContextFactory,
    attached: RefCell<Option<String>>,
}

impl ProcessService {
    pub fn new(control: Rc<dyn CommandControl>, factory: ContextFactory) -> Self {
        Self { control, factory, attached: RefCell::new(None) }
    }

    pub fn factory(&self) -> &ContextFactory {
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

    /// The container standing for the debugged inferior.
    pub fn debugged_container(&self) -> ContainerContext {
        self.factory.root_container(UNIQUE_GROUP_ID)
    }

    /// Pid of the process attached to, if any.
    pub fn debugged_process(&self) -> Option<String> {
        self.attached.borrow().clone()
    }

    pub fn get_execution_data(&self, context: &Context) -> Result<ThreadMetadata> {
        self.check_session(context)?;
        let attached = self.attached.borrow();
        match context.kind() {
            ContextKind::Process(pid) => Ok(ThreadMetadata {
                name: UNKNOWN_PROCESS_NAME.to_string(),
                id: pid.clone(),
                debugger_attached: attached.as_deref() == Some(pid.as_str()),
            }),
            ContextKind::Thread(tid) => {
                let process: Option<ProcessContext> = context.ancestor();
                Ok(ThreadMetadata {
                    name: String::new(),
                    id: tid.clone(),
                    debugger_attached: process.is_some_and(|p| attached.as_deref() == Some(p.pid())),
                })
            }
            _ => Err(Error::UnknownContextType),
        }
    }

    /// Attach to `process` with `-target-attach`. Resolves once the backend
    /// confirms.
    pub async fn attach_debugger_to_process(&self, process: &ProcessContext) -> Result<ContainerContext> {
        self.check_session(process.context())?;
        let command = MiCommand::TargetAttach { control: self.factory.control().clone(), pid: process.pid().to_string() };
        let operation = command.operation();
        debug!("{} <- {command}", command.context());

        if let Err(err) = self.control.queue_command(command).await.and_then(|reply| reply.into_done(operation)) {
            warn!("{process}: attach failed: {err}");
            return Err(err.into());
        }
        info!("{process}: debugger attached");
        *self.attached.borrow_mut() = Some(process.pid().to_string());
        Ok(self.debugged_container())
    }

    pub fn get_processes_being_debugged(&self, context: &Context) -> Result<Vec<ContainerContext>> {
        self.check_session(context)?;
        Ok(vec![self.debugged_container()])
    }

    pub fn is_debugger_attach_supported(&self) -> bool {
        true
    }

    pub fn is_run_new_process_supported(&self) -> bool {
        false
    }

    pub fn is_debug_new_process_supported(&self) -> bool {
        false
    }

    pub fn can_detach_debugger_from_process(&self) -> bool {
        false
    }

    pub fn capabilities(&self) -> ProcessCapabilities {
        ProcessCapabilities {
            attach: self.is_debugger_attach_supported(),
            run_new_process: self.is_run_new_process_supported(),
            debug_new_process: self.is_debug_new_process_supported(),
            detach: self.can_detach_debugger_from_process(),
        }
    }

    pub fn run_new_process(&self, _executable: &str) -> Result<ProcessContext> {
        Err(Error::NotSupported("run new process"))
    }

    pub fn debug_new_process(&self, _executable: &str) -> Result<ProcessContext> {
        Err(Error::NotSupported("debug new process"))
    }

    pub fn detach_debugger_from_process(&self, _process: &ProcessContext) -> Result<()> {
        Err(Error::NotSupported("detach"))
    }

    pub fn handle_event(&self, event: &MiEvent) {
        if let MiEvent::SessionEnded(session) = event {
            if session == self.factory.session() {
                self.attached.borrow_mut().take();
            }
        }
    }

    fn check_session(&self, context: &Context) -> Result<()> {
        if context.session() == self.factory.session() {
            Ok(())
        } else {
            Err(Error::UnknownExecutionContext)
        }
    }
}
