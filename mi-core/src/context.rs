//! Context model.
//!
//! Contexts are immutable identity objects arranged in a parent tree. They
//! address every operation of the services: a breakpoint lives under a
//! target (container) context, a thread under a process, and everything
//! under the command-control root of one debug session.
//!
//! Contexts compare and hash structurally, so two independently built
//! contexts with the same session, parents and discriminant are the same key.

use std::fmt;
use std::sync::Arc;

/// Identifier of one debug session (one backend connection).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type-specific discriminant of a context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// Root of a session: the command-control connection itself.
    Control,
    /// OS process id.
    Process(String),
    /// OS thread id.
    Thread(String),
    /// Thread group id. Containers are the breakpoint targets.
    Container(String),
    ExecutionGroup(String),
    /// Backend breakpoint number.
    Breakpoint(u32),
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control => f.write_str("control"),
            Self::Process(pid) => write!(f, "proc[{pid}]"),
            Self::Thread(tid) => write!(f, "thread[{tid}]"),
            Self::Container(id) => write!(f, "group[{id}]"),
            Self::ExecutionGroup(id) => write!(f, "exec[{id}]"),
            Self::Breakpoint(reference) => write!(f, "bp[{reference}]"),
        }
    }
}

#[derive(PartialEq, Eq, Hash)]
struct ContextNode {
    session: SessionId,
    parents: Vec<Context>,
    kind: ContextKind,
}

/// An untyped context node. Cheap to clone and safe to share across threads.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Context(Arc<ContextNode>);

impl Context {
    fn new(session: SessionId, parents: Vec<Self>, kind: ContextKind) -> Self {
        Self(Arc::new(ContextNode { session, parents, kind }))
    }

    pub fn session(&self) -> &SessionId {
        &self.0.session
    }

    pub fn parents(&self) -> &[Self] {
        &self.0.parents
    }

    pub fn kind(&self) -> &ContextKind {
        &self.0.kind
    }

    /// Find the nearest context of type `T`, starting with this one and then
    /// walking the parents in order.
    pub fn ancestor<T: TypedContext>(&self) -> Option<T> {
        T::from_context(self).or_else(|| self.parents().iter().find_map(Self::ancestor::<T>))
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind(), self.parents().first()) {
            (ContextKind::Control, _) | (_, None) => write!(f, "{}", self.session())?,
            (_, Some(parent)) => write!(f, "{parent}")?,
        }
        if *self.kind() != ContextKind::Control {
            write!(f, ".{}", self.kind())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({self})")
    }
}

/// Strongly typed view over a [`Context`] of one particular kind.
pub trait TypedContext: Sized {
    /// Wrap `context` if it has the right kind.
    fn from_context(context: &Context) -> Option<Self>;

    fn context(&self) -> &Context;
}

macro_rules! typed_context {
    ($(#[$meta:meta])* $name:ident, $pattern:pat) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash)]
        pub struct $name(Context);

        impl TypedContext for $name {
            fn from_context(context: &Context) -> Option<Self> {
                matches!(context.kind(), $pattern).then(|| Self(context.clone()))
            }

            fn context(&self) -> &Context {
                &self.0
            }
        }

        impl From<$name> for Context {
            fn from(typed: $name) -> Self {
                typed.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

typed_context!(
    /// Root context of a session.
    ControlContext,
    ContextKind::Control
);
typed_context!(ProcessContext, ContextKind::Process(_));
typed_context!(ThreadContext, ContextKind::Thread(_));
typed_context!(
    /// A thread group. In the single-process model this is also the
    /// breakpoint space, see [`TargetContext`].
    ContainerContext,
    ContextKind::Container(_)
);
typed_context!(ExecutionGroupContext, ContextKind::ExecutionGroup(_));
typed_context!(
    /// Handle on one installed breakpoint: a backend reference under a target.
    BreakpointRef,
    ContextKind::Breakpoint(_)
);

/// The breakpoint space an operation applies to.
pub type TargetContext = ContainerContext;

impl ProcessContext {
    pub fn pid(&self) -> &str {
        match self.0.kind() {
            ContextKind::Process(pid) => pid,
            _ => unreachable!("ProcessContext always wraps a process node"),
        }
    }
}

impl ThreadContext {
    pub fn thread_id(&self) -> &str {
        match self.0.kind() {
            ContextKind::Thread(tid) => tid,
            _ => unreachable!("ThreadContext always wraps a thread node"),
        }
    }
}

impl ContainerContext {
    pub fn group_id(&self) -> &str {
        match self.0.kind() {
            ContextKind::Container(id) => id,
            _ => unreachable!("ContainerContext always wraps a container node"),
        }
    }
}

impl ExecutionGroupContext {
    pub fn group_id(&self) -> &str {
        match self.0.kind() {
            ContextKind::ExecutionGroup(id) => id,
            _ => unreachable!("ExecutionGroupContext always wraps an execution group node"),
        }
    }
}

impl BreakpointRef {
    /// Build the handle for `reference` inside `target`.
    pub fn new(target: &TargetContext, reference: u32) -> Self {
        let target = target.context();
        Self(Context::new(
            target.session().clone(),
            vec![target.clone()],
            ContextKind::Breakpoint(reference),
        ))
    }

    pub fn reference(&self) -> u32 {
        match self.0.kind() {
            ContextKind::Breakpoint(reference) => *reference,
            _ => unreachable!("BreakpointRef always wraps a breakpoint node"),
        }
    }

    /// The breakpoint space this reference belongs to.
    pub fn target(&self) -> Option<TargetContext> {
        self.0.ancestor()
    }
}

/// Pure constructors for the contexts of one session.
#[derive(Debug, Clone)]
pub struct ContextFactory {
    control: ControlContext,
}

impl ContextFactory {
    pub fn new(session: SessionId) -> Self {
        Self { control: ControlContext(Context::new(session, Vec::new(), ContextKind::Control)) }
    }

    pub fn session(&self) -> &SessionId {
        self.control.0.session()
    }

    pub fn control(&self) -> &ControlContext {
        &self.control
    }

    pub fn process(&self, pid: impl Into<String>) -> ProcessContext {
        ProcessContext(self.child(vec![self.control.0.clone()], ContextKind::Process(pid.into())))
    }

    pub fn thread(&self, process: &ProcessContext, thread_id: impl Into<String>) -> ThreadContext {
        ThreadContext(self.child(vec![process.0.clone()], ContextKind::Thread(thread_id.into())))
    }

    pub fn container(&self, process: &ProcessContext, group_id: impl Into<String>) -> ContainerContext {
        ContainerContext(self.child(vec![process.0.clone()], ContextKind::Container(group_id.into())))
    }

    /// A container hanging directly off the session root, used when no
    /// process has been identified yet.
    pub fn root_container(&self, group_id: impl Into<String>) -> ContainerContext {
        ContainerContext(
            self.child(vec![self.control.0.clone()], ContextKind::Container(group_id.into())),
        )
    }

    pub fn execution_group(
        &self,
        container: &ContainerContext,
        process: &ProcessContext,
        group_id: impl Into<String>,
    ) -> ExecutionGroupContext {
        ExecutionGroupContext(self.child(
            vec![container.0.clone(), process.0.clone()],
            ContextKind::ExecutionGroup(group_id.into()),
        ))
    }

    fn child(&self, parents: Vec<Context>, kind: ContextKind) -> Context {
        Context::new(self.session().clone(), parents, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn factory(session: &str) -> ContextFactory {
        ContextFactory::new(SessionId::new(session))
    }

    #[test]
    fn test_structural_equality() {
        let a = factory("s1");
        let b = factory("s1");
        let thread_a = a.thread(&a.process("42"), "7");
        let thread_b = b.thread(&b.process("42"), "7");
        assert_eq!(thread_a, thread_b);

        let mut set = HashSet::new();
        set.insert(thread_a);
        assert!(set.contains(&thread_b));
    }

    #[test]
    fn test_inequality_on_any_component() {
        let s1 = factory("s1");
        let s2 = factory("s2");
        assert_ne!(s1.process("42"), s2.process("42"));
        assert_ne!(s1.process("42"), s1.process("43"));
        assert_ne!(
            s1.thread(&s1.process("42"), "1"),
            s1.thread(&s1.process("43"), "1")
        );
        assert_ne!(s1.container(&s1.process("42"), "0"), s1.root_container("0"));
    }

    #[test]
    fn test_ancestor_lookup() {
        let f = factory("s1");
        let process = f.process("42");
        let container = f.container(&process, "42");
        let group = f.execution_group(&container, &process, "3");

        let found: Option<ProcessContext> = group.context().ancestor();
        assert_eq!(found, Some(process.clone()));
        let found: Option<ContainerContext> = group.context().ancestor();
        assert_eq!(found, Some(container));
        let found: Option<ControlContext> = group.context().ancestor();
        assert_eq!(found.as_ref(), Some(f.control()));

        let thread = f.thread(&process, "7");
        let missing: Option<ContainerContext> = thread.context().ancestor();
        assert!(missing.is_none());
    }

    #[test]
    fn test_ancestor_includes_self() {
        let f = factory("s1");
        let process = f.process("1");
        let found: Option<ProcessContext> = process.context().ancestor();
        assert_eq!(found, Some(process));
    }

    #[test]
    fn test_breakpoint_ref_target() {
        let f = factory("s1");
        let target = f.root_container("0");
        let bp = BreakpointRef::new(&target, 5);
        assert_eq!(bp.reference(), 5);
        assert_eq!(bp.target(), Some(target.clone()));
        assert_eq!(bp, BreakpointRef::new(&target, 5));
        assert_ne!(bp, BreakpointRef::new(&target, 6));
    }

    #[test]
    fn test_typed_conversion_rejects_other_kinds() {
        let f = factory("s1");
        let process = f.process("9");
        assert!(ThreadContext::from_context(process.context()).is_none());
        assert!(ProcessContext::from_context(process.context()).is_some());
    }

    #[test]
    fn test_display_paths() {
        let f = factory("s1");
        let process = f.process("42");
        assert_eq!(f.thread(&process, "7").to_string(), "s1.proc[42].thread[7]");
        let target = f.root_container("0");
        assert_eq!(BreakpointRef::new(&target, 3).to_string(), "s1.group[0].bp[3]");
        assert_eq!(f.control().to_string(), "s1");
    }
}
