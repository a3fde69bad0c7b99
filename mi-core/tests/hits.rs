//! Tracking of the breakpoints execution contexts are suspended at.

#![allow(missing_docs)]

mod common;

use common::scripted;
use mi_core::{BreakpointRef, ContextFactory, Error, MiEvent, ServiceHandle, SessionId, TargetContext, TypedContext};

fn target(handle: &ServiceHandle) -> TargetContext {
    handle.contexts().root_container("0")
}

fn hit(handle: &ServiceHandle, context: &impl TypedContext, numbers: &[u32]) {
    handle.notify(MiEvent::BreakpointHit { context: context.context().clone(), numbers: numbers.to_vec() }).unwrap();
}

#[tokio::test]
async fn test_hit_is_reported_until_resume() {
    let (handle, mut script) = scripted();
    let target = target(&handle);
    let thread = handle.create_thread_context(&handle.create_process_context("42"), "1");

    assert_eq!(handle.get_execution_context_breakpoints(thread.context()).await, Ok(Vec::new()));

    hit(&handle, &thread, &[2, 5]);
    assert_eq!(
        handle.get_execution_context_breakpoints(thread.context()).await,
        Ok(vec![BreakpointRef::new(&target, 2), BreakpointRef::new(&target, 5)])
    );

    // A later stop replaces the earlier one.
    hit(&handle, &thread, &[3]);
    assert_eq!(handle.get_execution_context_breakpoints(thread.context()).await, Ok(vec![BreakpointRef::new(&target, 3)]));

    handle.notify(MiEvent::Resumed(thread.context().clone())).unwrap();
    assert_eq!(handle.get_execution_context_breakpoints(thread.context()).await, Ok(Vec::new()));
    script.assert_idle();
    handle.shutdown().unwrap();
}

#[tokio::test]
async fn test_container_collects_its_execution_contexts() {
    let (handle, _script) = scripted();
    let root = target(&handle);
    let process = handle.create_process_context("42");
    let first = handle.create_thread_context(&process, "1");
    let second = handle.create_thread_context(&process, "2");

    let other_process = handle.create_process_context("77");
    let container = handle.create_container_context(&other_process, "7");
    let group = handle.create_execution_group_context(&container, &other_process, "1");

    hit(&handle, &second, &[4]);
    hit(&handle, &first, &[1, 4]);
    hit(&handle, &group, &[9]);

    // Threads outside any container belong to the single-process group.
    assert_eq!(
        handle.get_execution_context_breakpoints(root.context()).await,
        Ok(vec![BreakpointRef::new(&root, 1), BreakpointRef::new(&root, 4)])
    );
    assert_eq!(
        handle.get_execution_context_breakpoints(container.context()).await,
        Ok(vec![BreakpointRef::new(&container, 9)])
    );

    // Only containers aggregate.
    assert_eq!(handle.get_execution_context_breakpoints(process.context()).await, Ok(Vec::new()));
    handle.shutdown().unwrap();
}

#[tokio::test]
async fn test_container_entry_takes_precedence() {
    let (handle, _script) = scripted();
    let root = target(&handle);
    let thread = handle.create_thread_context(&handle.create_process_context("42"), "1");

    hit(&handle, &thread, &[1]);
    hit(&handle, &root, &[2]);
    assert_eq!(handle.get_execution_context_breakpoints(root.context()).await, Ok(vec![BreakpointRef::new(&root, 2)]));
    handle.shutdown().unwrap();
}

#[tokio::test]
async fn test_container_resume_clears_everything_inside() {
    let (handle, _script) = scripted();
    let root = target(&handle);
    let process = handle.create_process_context("42");
    let first = handle.create_thread_context(&process, "1");
    let second = handle.create_thread_context(&process, "2");
    let container = handle.create_container_context(&process, "7");
    let group = handle.create_execution_group_context(&container, &process, "1");

    hit(&handle, &first, &[1]);
    hit(&handle, &second, &[2]);
    hit(&handle, &group, &[3]);

    handle.notify(MiEvent::Resumed(root.context().clone())).unwrap();
    assert_eq!(handle.get_execution_context_breakpoints(first.context()).await, Ok(Vec::new()));
    assert_eq!(handle.get_execution_context_breakpoints(second.context()).await, Ok(Vec::new()));
    assert_eq!(handle.get_execution_context_breakpoints(root.context()).await, Ok(Vec::new()));
    assert_eq!(
        handle.get_execution_context_breakpoints(group.context()).await,
        Ok(vec![BreakpointRef::new(&container, 3)])
    );
    handle.shutdown().unwrap();
}

#[tokio::test]
async fn test_exit_clears_only_that_context() {
    let (handle, _script) = scripted();
    let root = target(&handle);
    let process = handle.create_process_context("42");
    let first = handle.create_thread_context(&process, "1");
    let second = handle.create_thread_context(&process, "2");

    hit(&handle, &first, &[1]);
    hit(&handle, &second, &[2]);
    handle.notify(MiEvent::Exited(first.context().clone())).unwrap();

    assert_eq!(handle.get_execution_context_breakpoints(first.context()).await, Ok(Vec::new()));
    assert_eq!(handle.get_execution_context_breakpoints(root.context()).await, Ok(vec![BreakpointRef::new(&root, 2)]));
    handle.shutdown().unwrap();
}

#[tokio::test]
async fn test_foreign_contexts() {
    let (handle, _script) = scripted();
    let foreign = ContextFactory::new(SessionId::new("s2"));
    let thread = foreign.thread(&foreign.process("42"), "1");

    hit(&handle, &thread, &[1]);
    assert_eq!(handle.get_execution_context_breakpoints(thread.context()).await, Err(Error::UnknownExecutionContext));
    assert_eq!(handle.get_execution_context_breakpoints(target(&handle).context()).await, Ok(Vec::new()));
    handle.shutdown().unwrap();
}

#[tokio::test]
async fn test_session_end_forgets_hits() {
    let (handle, _script) = scripted();
    let thread = handle.create_thread_context(&handle.create_process_context("42"), "1");

    hit(&handle, &thread, &[1]);
    handle.notify(MiEvent::SessionEnded(handle.session().clone())).unwrap();
    assert_eq!(handle.get_execution_context_breakpoints(thread.context()).await, Ok(Vec::new()));
    handle.shutdown().unwrap();
}
