//! Shared harness: a backend whose replies are written by the test.

#![allow(dead_code)]

use mi_core::{
    BreakpointEvent, CommandControl, MiBreakpoint, MiCommand, MiError, MiReply, PendingReply, ReplySender,
    ServiceConfig, ServiceHandle,
};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Forwards every queued command to the test, which replies whenever and in
/// whatever order it likes.
pub struct ScriptedBackend {
    command_tx: mpsc::UnboundedSender<(MiCommand, ReplySender)>,
}

impl CommandControl for ScriptedBackend {
    fn queue_command(&self, command: MiCommand) -> PendingReply {
        let (reply_tx, reply) = PendingReply::channel();
        let _ = self.command_tx.send((command, reply_tx));
        reply
    }
}

/// Test side of a [`ScriptedBackend`].
pub struct Script {
    command_rx: mpsc::UnboundedReceiver<(MiCommand, ReplySender)>,
}

impl Script {
    pub async fn next(&mut self) -> (MiCommand, ReplySender) {
        timeout(STEP_TIMEOUT, self.command_rx.recv())
            .await
            .expect("timed out waiting for a command")
            .expect("backend dropped")
    }

    /// Wait for the next command and check its MI rendering.
    pub async fn expect(&mut self, text: &str) -> ReplySender {
        let (command, reply) = self.next().await;
        assert_eq!(command.to_string(), text);
        reply
    }

    /// Expect `text` and acknowledge it.
    pub async fn ack(&mut self, text: &str) {
        self.expect(text).await.send(Ok(MiReply::Done));
    }

    pub fn assert_idle(&mut self) {
        if let Ok((command, _)) = self.command_rx.try_recv() {
            panic!("unexpected command: {command}");
        }
    }
}

pub fn scripted() -> (ServiceHandle, Script) {
    scripted_with(&ServiceConfig { session_id: "s1".to_string(), ..ServiceConfig::default() })
}

pub fn scripted_with(config: &ServiceConfig) -> (ServiceHandle, Script) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let handle = ServiceHandle::spawn(config, ScriptedBackend { command_tx }).expect("failed to start services");
    (handle, Script { command_rx })
}

pub fn breakpoint(number: u32, function: &str) -> MiBreakpoint {
    MiBreakpoint {
        number: Some(number),
        kind: "breakpoint".to_string(),
        enabled: true,
        function: Some(function.to_string()),
        hit_count: Some(0),
        ..MiBreakpoint::default()
    }
}

pub fn watchpoint(number: u32, expression: &str) -> MiBreakpoint {
    MiBreakpoint {
        number: Some(number),
        kind: "hw watchpoint".to_string(),
        enabled: true,
        expression: Some(expression.to_string()),
        ..MiBreakpoint::default()
    }
}

pub fn inserted(descriptor: MiBreakpoint) -> Result<MiReply, MiError> {
    Ok(MiReply::BreakInsert(vec![descriptor]))
}

pub async fn next_event(events: &mut broadcast::Receiver<BreakpointEvent>) -> BreakpointEvent {
    timeout(STEP_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

pub fn assert_no_event(events: &mut broadcast::Receiver<BreakpointEvent>) {
    if let Ok(event) = events.try_recv() {
        panic!("unexpected event: {event:?}");
    }
}
