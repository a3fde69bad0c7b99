//! MI command vocabulary and the transport seam.
//!
//! Commands are typed objects that render themselves as MI text. The
//! transport behind [`CommandControl`] owns the wire: it serializes commands
//! in submission order and completes each [`PendingReply`] once the backend
//! answers.

pub mod output;

pub use output::{MiBreakpoint, MiError, MiEvent, MiReply};

use crate::context::{Context, ControlContext, TargetContext, TypedContext};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio::sync::oneshot;

/// Access that triggers a watchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchAccess {
    Read,
    Write,
    /// Read or write.
    Access,
}

impl WatchAccess {
    /// Map the caller's read/write flags. `None` when neither is set.
    pub fn from_flags(read: bool, write: bool) -> Option<Self> {
        match (read, write) {
            (true, true) => Some(Self::Access),
            (true, false) => Some(Self::Read),
            (false, true) => Some(Self::Write),
            (false, false) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiCommand {
    BreakInsert {
        target: TargetContext,
        temporary: bool,
        hardware: bool,
        condition: String,
        ignore_count: u32,
        location: String,
        /// 0 means every thread.
        thread_id: u32,
    },
    BreakWatch {
        target: TargetContext,
        access: WatchAccess,
        expression: String,
    },
    BreakDelete {
        target: TargetContext,
        references: Vec<u32>,
    },
    BreakEnable {
        target: TargetContext,
        references: Vec<u32>,
    },
    BreakDisable {
        target: TargetContext,
        references: Vec<u32>,
    },
    /// An empty condition clears it.
    BreakCondition {
        target: TargetContext,
        reference: u32,
        condition: String,
    },
    BreakAfter {
        target: TargetContext,
        reference: u32,
        count: u32,
    },
    BreakList {
        target: TargetContext,
    },
    TargetAttach {
        control: ControlContext,
        pid: String,
    },
}

impl MiCommand {
    /// The MI operation name, e.g. `-break-insert`.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::BreakInsert { .. } => "-break-insert",
            Self::BreakWatch { .. } => "-break-watch",
            Self::BreakDelete { .. } => "-break-delete",
            Self::BreakEnable { .. } => "-break-enable",
            Self::BreakDisable { .. } => "-break-disable",
            Self::BreakCondition { .. } => "-break-condition",
            Self::BreakAfter { .. } => "-break-after",
            Self::BreakList { .. } => "-break-list",
            Self::TargetAttach { .. } => "-target-attach",
        }
    }

    /// The context the command is addressed to.
    pub fn context(&self) -> &Context {
        match self {
            Self::BreakInsert { target, .. }
            | Self::BreakWatch { target, .. }
            | Self::BreakDelete { target, .. }
            | Self::BreakEnable { target, .. }
            | Self::BreakDisable { target, .. }
            | Self::BreakCondition { target, .. }
            | Self::BreakAfter { target, .. }
            | Self::BreakList { target } => target.context(),
            Self::TargetAttach { control, .. } => control.context(),
        }
    }
}

/// Quote an argument if MI would otherwise split it.
fn quoted(arg: &str) -> Cow<'_, str> {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        return Cow::Borrowed(arg);
    }
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    Cow::Owned(out)
}

fn write_references(f: &mut fmt::Formatter<'_>, references: &[u32]) -> fmt::Result {
    for reference in references {
        write!(f, " {reference}")?;
    }
    Ok(())
}

impl fmt::Display for MiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())?;
        match self {
            Self::BreakInsert { temporary, hardware, condition, ignore_count, location, thread_id, .. } => {
                if *temporary {
                    f.write_str(" -t")?;
                }
                if *hardware {
                    f.write_str(" -h")?;
                }
                if !condition.is_empty() {
                    write!(f, " -c {}", quoted(condition))?;
                }
                if *ignore_count > 0 {
                    write!(f, " -i {ignore_count}")?;
                }
                if *thread_id > 0 {
                    write!(f, " -p {thread_id}")?;
                }
                // Locations arrive already in linespec form.
                write!(f, " {location}")
            }
            Self::BreakWatch { access, expression, .. } => {
                match access {
                    WatchAccess::Read => f.write_str(" -r")?,
                    WatchAccess::Access => f.write_str(" -a")?,
                    WatchAccess::Write => {}
                }
                write!(f, " {}", quoted(expression))
            }
            Self::BreakDelete { references, .. }
            | Self::BreakEnable { references, .. }
            | Self::BreakDisable { references, .. } => write_references(f, references),
            Self::BreakCondition { reference, condition, .. } => {
                write!(f, " {reference}")?;
                if condition.is_empty() {
                    Ok(())
                } else {
                    // The condition is the rest of the line, not a single token.
                    write!(f, " {condition}")
                }
            }
            Self::BreakAfter { reference, count, .. } => write!(f, " {reference} {count}"),
            Self::BreakList { .. } => Ok(()),
            Self::TargetAttach { pid, .. } => write!(f, " {pid}"),
        }
    }
}

/// Completion side of a queued command, held by the transport.
#[derive(Debug)]
pub struct ReplySender(oneshot::Sender<Result<MiReply, MiError>>);

impl ReplySender {
    pub fn send(self, result: Result<MiReply, MiError>) {
        // The requester may have gone away; nothing left to notify then.
        let _ = self.0.send(result);
    }
}

/// Future reply to a queued command. Resolves to
/// [`MiError::TransportClosed`] if the transport drops the command.
#[derive(Debug)]
pub struct PendingReply(oneshot::Receiver<Result<MiReply, MiError>>);

impl PendingReply {
    pub fn channel() -> (ReplySender, Self) {
        let (tx, rx) = oneshot::channel();
        (ReplySender(tx), Self(rx))
    }

    /// A reply that is already known, for transports that answer inline.
    pub fn ready(result: Result<MiReply, MiError>) -> Self {
        let (tx, rx) = Self::channel();
        tx.send(result);
        rx
    }
}

impl Future for PendingReply {
    type Output = Result<MiReply, MiError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|received| received.unwrap_or(Err(MiError::TransportClosed)))
    }
}

/// The command transport consumed by the services.
///
/// Commands queued for the same target must reach the backend in submission
/// order. Replies may complete in any order.
pub trait CommandControl {
    fn queue_command(&self, command: MiCommand) -> PendingReply;
}

impl<T: CommandControl + ?Sized> CommandControl for Box<T> {
    fn queue_command(&self, command: MiCommand) -> PendingReply {
        (**self).queue_command(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextFactory, SessionId};

    fn target() -> TargetContext {
        ContextFactory::new(SessionId::new("s1")).root_container("0")
    }

    #[test]
    fn test_break_insert_rendering() {
        let command = MiCommand::BreakInsert {
            target: target(),
            temporary: true,
            hardware: true,
            condition: "x > 1".to_string(),
            ignore_count: 3,
            location: "a.c:10".to_string(),
            thread_id: 2,
        };
        assert_eq!(command.to_string(), r#"-break-insert -t -h -c "x > 1" -i 3 -p 2 a.c:10"#);

        let plain = MiCommand::BreakInsert {
            target: target(),
            temporary: false,
            hardware: false,
            condition: String::new(),
            ignore_count: 0,
            location: "*0x8000".to_string(),
            thread_id: 0,
        };
        assert_eq!(plain.to_string(), "-break-insert *0x8000");
    }

    #[test]
    fn test_watch_rendering() {
        let watch = |access| MiCommand::BreakWatch { target: target(), access, expression: "buf[1]".to_string() };
        assert_eq!(watch(WatchAccess::Write).to_string(), "-break-watch buf[1]");
        assert_eq!(watch(WatchAccess::Read).to_string(), "-break-watch -r buf[1]");
        assert_eq!(watch(WatchAccess::Access).to_string(), "-break-watch -a buf[1]");
    }

    #[test]
    fn test_status_command_rendering() {
        let t = target();
        let cases = vec![
            (MiCommand::BreakDelete { target: t.clone(), references: vec![1, 4] }, "-break-delete 1 4"),
            (MiCommand::BreakEnable { target: t.clone(), references: vec![2] }, "-break-enable 2"),
            (MiCommand::BreakDisable { target: t.clone(), references: vec![2] }, "-break-disable 2"),
            (
                MiCommand::BreakCondition { target: t.clone(), reference: 2, condition: "i == 5".to_string() },
                "-break-condition 2 i == 5",
            ),
            (
                MiCommand::BreakCondition { target: t.clone(), reference: 2, condition: String::new() },
                "-break-condition 2",
            ),
            (MiCommand::BreakAfter { target: t.clone(), reference: 2, count: 7 }, "-break-after 2 7"),
            (MiCommand::BreakList { target: t }, "-break-list"),
        ];
        for (command, expected) in cases {
            assert_eq!(command.to_string(), expected);
        }
    }

    #[test]
    fn test_attach_addresses_control_context() {
        let factory = ContextFactory::new(SessionId::new("s1"));
        let command = MiCommand::TargetAttach { control: factory.control().clone(), pid: "4242".to_string() };
        assert_eq!(command.to_string(), "-target-attach 4242");
        assert_eq!(command.context(), factory.control().context());
    }

    #[test]
    fn test_watch_access_flags() {
        assert_eq!(WatchAccess::from_flags(true, true), Some(WatchAccess::Access));
        assert_eq!(WatchAccess::from_flags(true, false), Some(WatchAccess::Read));
        assert_eq!(WatchAccess::from_flags(false, true), Some(WatchAccess::Write));
        assert_eq!(WatchAccess::from_flags(false, false), None);
    }

    #[tokio::test]
    async fn test_pending_reply_resolution() {
        assert_eq!(PendingReply::ready(Ok(MiReply::Done)).await, Ok(MiReply::Done));

        let (tx, rx) = PendingReply::channel();
        drop(tx);
        assert_eq!(rx.await, Err(MiError::TransportClosed));
    }
}
