//! JSON scripts of service operations, run against the simulated backend.

use anyhow::{anyhow, Context as _, Result};
use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use mi_core::{
    Attributes, BreakpointRef, Context, GdbState, MiEvent, ServiceHandle, SimulatedGdb, TargetContext, TypedContext,
    UNIQUE_GROUP_ID,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

/// Script run by `mi-cli demo`.
pub const DEMO: &str = include_str!("../scripts/demo.json");

/// How long a step waits for the backend event it provoked.
const BACKEND_EVENT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default)]
    pub backend: BackendSetup,
    pub steps: Vec<ScriptStep>,
}

impl Script {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse script")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::from_json(&json)
    }
}

/// Quirks of the simulated GDB.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSetup {
    pub unresolved_locations: Vec<String>,
    pub invalid_conditions: Vec<String>,
    pub refuse_attach: bool,
}

impl BackendSetup {
    pub fn state(&self) -> GdbState {
        let mut state = GdbState::new();
        for location in &self.unresolved_locations {
            state = state.unresolved_location(location);
        }
        for condition in &self.invalid_conditions {
            state = state.invalid_condition(condition);
        }
        if self.refuse_attach {
            state = state.refuse_attach();
        }
        state
    }
}

#[derive(Debug, Deserialize)]
pub struct ScriptStep {
    #[serde(flatten)]
    pub action: Step,
    /// The step is supposed to fail.
    #[serde(default)]
    pub expect_error: bool,
}

/// One operation. Breakpoints are named by their backend number.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Insert { attributes: Attributes },
    Update { breakpoint: u32, attributes: Attributes },
    Remove { breakpoint: u32 },
    Show { breakpoint: u32 },
    List,
    Attach { pid: String },
    ExecutionData { pid: String, thread: Option<String> },
    Processes,
    Capabilities,
    /// Make a watchpoint go out of scope in the backend.
    LeaveScope { breakpoint: u32 },
    /// Run a thread into a breakpoint.
    Hit { breakpoint: u32, pid: String, thread: String },
    /// Let a thread, or the whole target without one, continue.
    Resume { pid: String, thread: Option<String> },
    /// Breakpoints a thread, or the whole target without one, is stopped at.
    StoppedAt { pid: String, thread: Option<String> },
    /// Report the backend connection as gone.
    EndSession,
}

impl Step {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Remove { .. } => "remove",
            Self::Show { .. } => "show",
            Self::List => "list",
            Self::Attach { .. } => "attach",
            Self::ExecutionData { .. } => "execution_data",
            Self::Processes => "processes",
            Self::Capabilities => "capabilities",
            Self::LeaveScope { .. } => "leave_scope",
            Self::Hit { .. } => "hit",
            Self::Resume { .. } => "resume",
            Self::StoppedAt { .. } => "stopped_at",
            Self::EndSession => "end_session",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the outcome matched `expect_error`.
    pub as_expected: bool,
}

pub struct Runner<'a> {
    handle: &'a ServiceHandle,
    gdb: &'a SimulatedGdb,
    backend_events: &'a Receiver<MiEvent>,
    target: TargetContext,
}

impl<'a> Runner<'a> {
    pub fn new(handle: &'a ServiceHandle, gdb: &'a SimulatedGdb, backend_events: &'a Receiver<MiEvent>) -> Self {
        let target = handle.contexts().root_container(UNIQUE_GROUP_ID);
        Self { handle, gdb, backend_events, target }
    }

    /// Run every step, in order, whatever the outcome of the previous ones.
    pub async fn run(&self, script: &Script, mut on_step: impl FnMut(&StepReport)) -> Vec<StepReport> {
        info!("running {} step(s) on {}", script.steps.len(), self.target);
        let mut reports = Vec::with_capacity(script.steps.len());
        for (index, step) in script.steps.iter().enumerate() {
            let outcome = self.step(&step.action).await;
            let report = StepReport {
                index,
                op: step.action.name(),
                as_expected: outcome.is_err() == step.expect_error,
                error: outcome.as_ref().err().map(|err| format!("{err:#}")),
                result: outcome.ok(),
            };
            if !report.as_expected {
                warn!("step {index} ({}) did not go as expected", report.op);
            }
            on_step(&report);
            reports.push(report);
        }
        reports
    }

    async fn step(&self, step: &Step) -> Result<Value> {
        debug!("step: {step:?}");
        let handle = self.handle;
        let value = match step {
            Step::Insert { attributes } => {
                let bp = handle.insert_breakpoint(&self.target, attributes.clone()).await?;
                describe_breakpoint(&bp)
            }
            Step::Update { breakpoint, attributes } => {
                handle.update_breakpoint(&self.breakpoint(*breakpoint), attributes.clone()).await?;
                Value::Null
            }
            Step::Remove { breakpoint } => {
                handle.remove_breakpoint(&self.breakpoint(*breakpoint)).await?;
                Value::Null
            }
            Step::Show { breakpoint } => {
                let record = handle.get_breakpoint_data(&self.breakpoint(*breakpoint)).await?;
                serde_json::to_value(record)?
            }
            Step::List => {
                let breakpoints = handle.get_breakpoints(&self.target).await?;
                breakpoints.iter().map(describe_breakpoint).collect()
            }
            Step::Attach { pid } => {
                let process = handle.create_process_context(pid);
                let container = handle.attach_debugger_to_process(&process).await?;
                json!({ "container": container.to_string() })
            }
            Step::ExecutionData { pid, thread } => {
                let process = handle.create_process_context(pid);
                let data = match thread {
                    Some(thread) => {
                        let thread = handle.create_thread_context(&process, thread);
                        handle.get_execution_data(thread.context()).await?
                    }
                    None => handle.get_execution_data(process.context()).await?,
                };
                serde_json::to_value(data)?
            }
            Step::Processes => {
                let containers = handle.get_processes_being_debugged(handle.contexts().control().context()).await?;
                containers.iter().map(|container| Value::String(container.to_string())).collect()
            }
            Step::Capabilities => serde_json::to_value(handle.capabilities().await?)?,
            Step::LeaveScope { breakpoint } => {
                self.gdb.leave_scope(*breakpoint);
                self.forward_backend_event().await?
            }
            Step::Hit { breakpoint, pid, thread } => {
                let thread = handle.create_thread_context(&handle.create_process_context(pid), thread);
                self.gdb.hit(thread.context().clone(), *breakpoint);
                self.forward_backend_event().await?
            }
            Step::Resume { pid, thread } => {
                self.gdb.resume(self.execution_context(pid, thread.as_deref()));
                self.forward_backend_event().await?
            }
            Step::StoppedAt { pid, thread } => {
                let context = self.execution_context(pid, thread.as_deref());
                let breakpoints = handle.get_execution_context_breakpoints(&context).await?;
                breakpoints.iter().map(describe_breakpoint).collect()
            }
            Step::EndSession => {
                self.gdb.end_session(handle.session().clone());
                self.forward_backend_event().await?
            }
        };
        Ok(value)
    }

    fn execution_context(&self, pid: &str, thread: Option<&str>) -> Context {
        match thread {
            Some(thread) => {
                let process = self.handle.create_process_context(pid);
                self.handle.create_thread_context(&process, thread).context().clone()
            }
            None => self.target.context().clone(),
        }
    }

    fn breakpoint(&self, reference: u32) -> BreakpointRef {
        BreakpointRef::new(&self.target, reference)
    }

    /// Wait for the next backend event and hand it to the services.
    async fn forward_backend_event(&self) -> Result<Value> {
        let events = self.backend_events.clone();
        let event = tokio::task::spawn_blocking(move || events.recv_timeout(BACKEND_EVENT_TIMEOUT))
            .await?
            .map_err(|_| anyhow!("backend raised no event"))?;
        let description = format!("{event:?}");
        self.handle.notify(event)?;
        Ok(Value::String(description))
    }
}

pub fn describe_breakpoint(bp: &BreakpointRef) -> Value {
    json!({ "breakpoint": bp.reference(), "context": bp.to_string() })
}
