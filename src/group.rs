//! # Thread-group latch: await everything a caller spawned in a region.
//!
//! Each caller context (a Tokio task, or a plain thread when no task is
//! running) owns a LIFO stack of **groups**; each group is the ordered list
//! of task handles registered while it was on top. The latch lets a caller
//! open a group, dispatch work into it, and then block until everything in
//! the group finished:
//!
//! ```text
//! create_group()            push an empty group
//!   dispatch ──► add_to_group(handle)   (appends to the top group)
//!   dispatch ──► add_to_group(handle)
//! wait_for_finish(timeout)  pop the top group, await handles in order
//! ```
//!
//! ## One rule
//! **Every created group must be waited on** (or released with
//! [`release_all`](GroupLatch::release_all)): an abandoned group keeps its
//! handles — and whatever they capture — alive in the latch until the
//! context entry is cleared.
//!
//! Contexts never alias: nested groups opened by different tasks live in
//! different stacks, and a child task dispatched from a grouped region
//! starts with an empty stack of its own. Caller-runs execution is the one
//! deliberate exception — the job runs *on the submitter*, so group
//! operations inside it land on the submitter's stack, which is exactly
//! where that work is being awaited.
//!
//! Groups created in the same context are processed LIFO: backing out of
//! nested regions waits on the innermost group first.

use std::time::Duration;

use dashmap::DashMap;

use crate::error::{MachineError, TaskError};
use crate::tasks::TaskHandle;

/// Default per-handle wait used when no explicit timeout is given.
pub const DEFAULT_GROUP_WAIT: Duration = Duration::from_secs(5 * 60);

/// Identity of a caller context.
///
/// Inside the runtime this is the current Tokio task; outside it falls
/// back to the OS thread, so the latch also works from blocking code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum ContextId {
    Task(tokio::task::Id),
    Thread(std::thread::ThreadId),
}

impl ContextId {
    fn current() -> Self {
        match tokio::task::try_id() {
            Some(id) => ContextId::Task(id),
            None => ContextId::Thread(std::thread::current().id()),
        }
    }
}

type Group = Vec<TaskHandle>;

/// Per-caller-context stack of pending-handle groups.
pub struct GroupLatch {
    stacks: DashMap<ContextId, Vec<Group>>,
}

impl GroupLatch {
    /// Creates an empty latch.
    pub fn new() -> Self {
        Self {
            stacks: DashMap::new(),
        }
    }

    /// True when the current context has at least one group.
    pub fn has_groups(&self) -> bool {
        self.stacks
            .get(&ContextId::current())
            .is_some_and(|stack| !stack.is_empty())
    }

    /// Pushes a new empty group for the current context.
    pub fn create_group(&self) {
        self.stacks
            .entry(ContextId::current())
            .or_default()
            .push(Vec::new());
    }

    /// Appends a handle to the current context's top group.
    pub fn add_to_group(&self, handle: TaskHandle) -> Result<(), MachineError> {
        match self.stacks.get_mut(&ContextId::current()) {
            Some(mut stack) => match stack.last_mut() {
                Some(group) => {
                    group.push(handle);
                    Ok(())
                }
                None => Err(MachineError::NoActiveGroup),
            },
            None => Err(MachineError::NoActiveGroup),
        }
    }

    /// Pops the current context's top group and awaits its handles in
    /// insertion order, each with the given per-handle timeout.
    ///
    /// Returns the number of handles that completed. With no group in the
    /// current context this is a no-op returning `Ok(0)`.
    ///
    /// Error translation, applied per handle:
    /// - a wait that exceeds `timeout` raises [`TaskError::Timeout`]
    ///   immediately;
    /// - a handle that finished with the shutdown signal re-raises
    ///   [`TaskError::Shutdown`] as-is;
    /// - any other failure is wrapped into [`TaskError::Failed`].
    pub async fn wait_for_finish(&self, timeout: Duration) -> Result<usize, TaskError> {
        let context = ContextId::current();

        let group = {
            let Some(mut stack) = self.stacks.get_mut(&context) else {
                return Ok(0);
            };
            let group = stack.pop();
            let emptied = stack.is_empty();
            drop(stack);
            if emptied {
                self.stacks.remove_if(&context, |_, stack| stack.is_empty());
            }
            match group {
                Some(group) => group,
                None => return Ok(0),
            }
        };

        let mut finished = 0;
        for handle in group {
            match handle.wait(timeout).await {
                Ok(Ok(())) => finished += 1,
                Ok(Err(TaskError::Shutdown)) => return Err(TaskError::Shutdown),
                Ok(Err(failure)) => return Err(TaskError::failed(failure.to_string())),
                Err(TaskError::Timeout { .. }) => return Err(TaskError::Timeout { timeout }),
                Err(other) => return Err(other),
            }
        }

        Ok(finished)
    }

    /// Like [`wait_for_finish`](GroupLatch::wait_for_finish) with the
    /// default per-handle wait.
    pub async fn wait_for_finish_default(&self) -> Result<usize, TaskError> {
        self.wait_for_finish(DEFAULT_GROUP_WAIT).await
    }

    /// Discards the current context's entire stack without cancelling
    /// anything.
    ///
    /// Returns the total number of handles released.
    pub fn release_all(&self) -> usize {
        match self.stacks.remove(&ContextId::current()) {
            Some((_, stack)) => stack.iter().map(Vec::len).sum(),
            None => 0,
        }
    }

    /// Number of groups in the current context.
    pub fn group_count(&self) -> usize {
        self.stacks
            .get(&ContextId::current())
            .map_or(0, |stack| stack.len())
    }

    /// Total number of handles across the current context's groups.
    pub fn handle_count(&self) -> usize {
        self.stacks
            .get(&ContextId::current())
            .map_or(0, |stack| stack.iter().map(Vec::len).sum())
    }
}

impl Default for GroupLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn finished_handle(name: &str) -> TaskHandle {
        let (tx, handle) = TaskHandle::channel(name, CancellationToken::new());
        let _ = tx.send(Some(Ok(())));
        handle
    }

    #[tokio::test]
    async fn stack_is_lifo_and_counts_are_per_context() {
        let latch = GroupLatch::new();
        assert!(!latch.has_groups());
        assert_eq!(latch.wait_for_finish(DEFAULT_GROUP_WAIT).await.unwrap(), 0);

        latch.create_group();
        latch.add_to_group(finished_handle("outer")).unwrap();
        latch.create_group();
        latch.add_to_group(finished_handle("inner-1")).unwrap();
        latch.add_to_group(finished_handle("inner-2")).unwrap();

        assert_eq!(latch.group_count(), 2);
        assert_eq!(latch.handle_count(), 3);

        // Pops the inner group first.
        assert_eq!(latch.wait_for_finish(DEFAULT_GROUP_WAIT).await.unwrap(), 2);
        assert_eq!(latch.wait_for_finish(DEFAULT_GROUP_WAIT).await.unwrap(), 1);
        assert!(!latch.has_groups());
    }

    #[tokio::test]
    async fn add_without_group_is_an_error() {
        let latch = GroupLatch::new();
        let result = latch.add_to_group(finished_handle("loose"));
        assert!(matches!(result, Err(MachineError::NoActiveGroup)));
    }

    #[tokio::test]
    async fn release_all_reports_the_handle_total() {
        let latch = GroupLatch::new();
        latch.create_group();
        latch.add_to_group(finished_handle("a")).unwrap();
        latch.create_group();
        latch.add_to_group(finished_handle("b")).unwrap();
        latch.add_to_group(finished_handle("c")).unwrap();

        assert_eq!(latch.release_all(), 3);
        assert!(!latch.has_groups());
        assert_eq!(latch.release_all(), 0);
    }

    #[tokio::test]
    async fn wait_times_out_on_a_stuck_handle() {
        let latch = GroupLatch::new();
        latch.create_group();

        let (_tx, handle) = TaskHandle::channel("stuck", CancellationToken::new());
        latch.add_to_group(handle).unwrap();

        let result = latch.wait_for_finish(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(TaskError::Timeout { .. })));
    }

    #[tokio::test]
    async fn shutdown_outcome_is_reraised_unwrapped() {
        let latch = GroupLatch::new();
        latch.create_group();

        let (tx, handle) = TaskHandle::channel("stopping", CancellationToken::new());
        let _ = tx.send(Some(Err(TaskError::Shutdown)));
        latch.add_to_group(handle).unwrap();

        let result = latch.wait_for_finish(DEFAULT_GROUP_WAIT).await;
        assert!(matches!(result, Err(TaskError::Shutdown)));
    }

    #[tokio::test]
    async fn contexts_do_not_alias_across_tasks() {
        let latch = std::sync::Arc::new(GroupLatch::new());
        latch.create_group();

        let child_latch = std::sync::Arc::clone(&latch);
        let child_sees_groups = tokio::spawn(async move { child_latch.has_groups() })
            .await
            .unwrap();

        assert!(!child_sees_groups);
        assert!(latch.has_groups());
        latch.release_all();
    }
}
