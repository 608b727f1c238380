//! Dispatch, thread-group, and shutdown behavior of the task machine.
//!
//! Every test builds its own machine so shutdowns cannot bleed across
//! tests; the process-wide singleton is exercised in `controllers.rs`
//! through the call-site functions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use taskmill::{
    EventKind, MachineConfig, MachineError, PoolConfig, TaskContext, TaskError, TaskEventListener,
    TaskFn, TaskMachine,
};

/// Machine sized so small tests never wait on worker spawning.
fn test_machine() -> Arc<TaskMachine> {
    let mut cfg = MachineConfig::default();
    cfg.pool = PoolConfig {
        queue_capacity: 16,
        core_workers: 4,
        max_workers: 8,
        idle_ttl: Duration::from_secs(5),
    };
    TaskMachine::new(cfg, Vec::new())
}

fn counting_task(
    name: &'static str,
    counter: &Arc<AtomicUsize>,
    iterations: usize,
    step: Duration,
) -> taskmill::TaskRef {
    let counter = Arc::clone(counter);
    TaskFn::arc(name, move |_ctx: CancellationToken| {
        let counter = Arc::clone(&counter);
        async move {
            for _ in 0..iterations {
                tokio::time::sleep(step).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn group_wait_aggregates_parallel_work() {
    let machine = test_machine();
    machine.create_thread_group().unwrap();

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let step = Duration::from_millis(10);

    machine
        .execute_in_thread(true, "workers", true, counting_task("first", &first, 20, step))
        .await
        .unwrap();
    machine
        .execute_in_thread(true, "workers", true, counting_task("second", &second, 20, step))
        .await
        .unwrap();

    assert_eq!(machine.thread_group_count(), 1);
    assert_eq!(machine.grouped_thread_count(), 2);

    let start = Instant::now();
    let finished = machine
        .await_current_thread_group(Duration::from_secs(5))
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(finished, 2);
    assert_eq!(first.load(Ordering::SeqCst), 20);
    assert_eq!(second.load(Ordering::SeqCst), 20);

    // Two ~200ms bodies must overlap, not run back to back.
    assert!(
        elapsed < Duration::from_millis(380),
        "group wait took {elapsed:?}, bodies ran serially"
    );
    assert_eq!(machine.thread_group_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn cooperative_shutdown_stops_running_bodies() {
    let machine = test_machine();

    let counters = [
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
    ];
    let mut handles = Vec::new();

    for (index, counter) in counters.iter().enumerate() {
        let counter = Arc::clone(counter);
        let checker = Arc::clone(&machine);
        let task = TaskFn::arc(format!("loop-{index}"), move |_ctx: CancellationToken| {
            let counter = Arc::clone(&counter);
            let checker = Arc::clone(&checker);
            async move {
                for _ in 0..100 {
                    checker.check_shutdown()?;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
        });
        handles.push(
            machine
                .execute_in_thread(true, "loops", false, task)
                .await
                .unwrap(),
        );
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    machine.shutdown(Duration::from_secs(3)).await.unwrap();

    for handle in &handles {
        let outcome = handle.wait(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome, Err(TaskError::Shutdown));
    }

    let frozen: Vec<usize> = counters
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .collect();
    assert!(frozen.iter().all(|&n| n < 100), "loops ran to completion");

    tokio::time::sleep(Duration::from_millis(300)).await;
    for (counter, before) in counters.iter().zip(&frozen) {
        assert_eq!(counter.load(Ordering::SeqCst), *before, "counter advanced after shutdown");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn explicit_before_check_raises_before_the_nested_body() {
    let machine = test_machine();

    let outer = Arc::new(AtomicUsize::new(0));
    let after_nested = Arc::new(AtomicUsize::new(0));

    let task = {
        let machine = Arc::clone(&machine);
        let outer = Arc::clone(&outer);
        let after_nested = Arc::clone(&after_nested);
        TaskFn::arc("checked-loop", move |_ctx: CancellationToken| {
            let machine = Arc::clone(&machine);
            let outer = Arc::clone(&outer);
            let after_nested = Arc::clone(&after_nested);
            async move {
                for i in 0..50 {
                    outer.fetch_add(1, Ordering::SeqCst);
                    // Before-execution check guarding the nested call.
                    machine.check_shutdown()?;
                    if i == 24 {
                        // The nested body fires shutdown on its 25th run.
                        let _ = machine.shutdown(Duration::from_millis(300)).await;
                    }
                    after_nested.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
        })
    };

    let handle = machine
        .execute_in_thread(true, "checked", false, task)
        .await
        .unwrap();
    let outcome = handle.wait(Duration::from_secs(5)).await.unwrap();

    assert_eq!(outcome, Err(TaskError::Shutdown));
    assert_eq!(outer.load(Ordering::SeqCst), 26);
    assert_eq!(after_nested.load(Ordering::SeqCst), 25);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_is_idempotent_and_reset_restores_service() {
    let machine = test_machine();
    let mut events = machine.subscribe();

    let ran = Arc::new(AtomicUsize::new(0));
    machine
        .execute_in_thread(false, "", false, counting_task("warm", &ran, 1, Duration::ZERO))
        .await
        .unwrap()
        .wait(Duration::from_secs(2))
        .await
        .unwrap()
        .unwrap();

    machine.shutdown(Duration::from_secs(2)).await.unwrap();
    machine.shutdown(Duration::from_secs(2)).await.unwrap();

    let refused = machine
        .execute_in_thread(false, "", false, counting_task("late", &ran, 1, Duration::ZERO))
        .await;
    assert!(matches!(refused, Err(MachineError::ShutdownActive)));
    assert!(matches!(
        machine.create_thread_group(),
        Err(MachineError::ShutdownActive)
    ));

    machine.reset().await.unwrap();
    assert!(!machine.is_shutdown());

    machine
        .execute_in_thread(false, "", false, counting_task("again", &ran, 1, Duration::ZERO))
        .await
        .unwrap()
        .wait(Duration::from_secs(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 2);

    // Exactly one shutdown request despite two calls.
    let mut shutdown_requests = 0;
    while let Ok(event) = events.try_recv() {
        if event.kind == EventKind::ShutdownRequested {
            shutdown_requests += 1;
        }
    }
    assert_eq!(shutdown_requests, 1);
}

#[tokio::test]
async fn reset_requires_shutdown_first() {
    let machine = test_machine();
    assert!(matches!(
        machine.reset().await,
        Err(MachineError::NotShutdown)
    ));
}

#[tokio::test]
async fn empty_pool_name_is_rejected_for_poolable_dispatch() {
    let machine = test_machine();
    let ran = Arc::new(AtomicUsize::new(0));
    let result = machine
        .execute_in_thread(true, "  ", false, counting_task("nameless", &ran, 1, Duration::ZERO))
        .await;
    assert!(matches!(result, Err(MachineError::EmptyPoolName)));
}

struct Vetoing {
    vetoed: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl TaskEventListener for Vetoing {
    fn before_task(&self, task: &TaskContext) -> bool {
        if task.name == "vetoed" {
            self.vetoed.fetch_add(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn after_task(&self, _task: &TaskContext) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_exception(&self, _task: &TaskContext, error: TaskError) -> Option<TaskError> {
        Some(error)
    }
}

#[tokio::test]
async fn vetoed_tasks_complete_without_running() {
    let machine = test_machine();
    let vetoed = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    machine.set_listener(Some(Arc::new(Vetoing {
        vetoed: Arc::clone(&vetoed),
        completed: Arc::clone(&completed),
    })));

    let body_ran = Arc::new(AtomicUsize::new(0));
    let outcome = machine
        .execute_in_thread(false, "", false, counting_task("vetoed", &body_ran, 1, Duration::ZERO))
        .await
        .unwrap()
        .wait(Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(outcome, Ok(()));
    assert_eq!(body_ran.load(Ordering::SeqCst), 0);
    assert_eq!(vetoed.load(Ordering::SeqCst), 1);
    // after_task is reserved for bodies that actually ran.
    assert_eq!(completed.load(Ordering::SeqCst), 0);
}

struct Swallowing;

impl TaskEventListener for Swallowing {
    fn before_task(&self, _task: &TaskContext) -> bool {
        true
    }

    fn after_task(&self, _task: &TaskContext) {}

    fn on_exception(&self, _task: &TaskContext, _error: TaskError) -> Option<TaskError> {
        None
    }
}

#[tokio::test]
async fn swallowed_failures_complete_the_handle_successfully() {
    let machine = test_machine();
    machine.set_listener(Some(Arc::new(Swallowing)));

    let task = TaskFn::arc("failing", |_ctx: CancellationToken| async {
        Err(TaskError::failed("deliberate"))
    });
    let outcome = machine
        .execute_in_thread(false, "", false, task)
        .await
        .unwrap()
        .wait(Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(outcome, Ok(()));
}

#[tokio::test]
async fn surfaced_failures_reach_the_handle_and_the_group_wait() {
    let machine = test_machine();
    machine.create_thread_group().unwrap();

    let task = TaskFn::arc("failing", |_ctx: CancellationToken| async {
        Err(TaskError::failed("deliberate"))
    });
    machine
        .execute_in_thread(false, "", true, task)
        .await
        .unwrap();

    let result = machine
        .await_current_thread_group(Duration::from_secs(2))
        .await;
    match result {
        Err(TaskError::Failed { reason }) => assert!(reason.contains("deliberate")),
        other => panic!("expected a wrapped failure, got {other:?}"),
    }
}

#[tokio::test]
async fn panicking_bodies_fail_their_handles() {
    let machine = test_machine();

    let task = TaskFn::arc("panicking", |_ctx: CancellationToken| async {
        panic!("kaboom");
    });
    let outcome = machine
        .execute_in_thread(false, "", false, task)
        .await
        .unwrap()
        .wait(Duration::from_secs(2))
        .await
        .unwrap();

    match outcome {
        Err(TaskError::Failed { reason }) => assert!(reason.contains("kaboom")),
        other => panic!("expected a captured panic, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn saturation_runs_the_task_on_the_submitter() {
    let mut cfg = MachineConfig::default();
    cfg.pool = PoolConfig {
        queue_capacity: 1,
        core_workers: 1,
        max_workers: 1,
        idle_ttl: Duration::from_secs(5),
    };
    let machine = TaskMachine::new(cfg, Vec::new());
    let mut events = machine.subscribe();

    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    for index in 0..2 {
        let gate = Arc::clone(&gate);
        let task = TaskFn::arc(format!("blocker-{index}"), move |_ctx: CancellationToken| {
            let gate = Arc::clone(&gate);
            async move {
                let _permit = gate.acquire().await;
                Ok(())
            }
        });
        machine
            .execute_in_thread(true, "narrow", false, task)
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Worker busy, queue full: this one must run inline before returning.
    let inline = Arc::new(AtomicUsize::new(0));
    machine
        .execute_in_thread(true, "narrow", false, counting_task("inline", &inline, 1, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(inline.load(Ordering::SeqCst), 1);

    gate.add_permits(2);

    let mut saw_caller_ran = false;
    while let Ok(event) = events.try_recv() {
        if event.kind == EventKind::CallerRan {
            saw_caller_ran = true;
            assert_eq!(event.task.as_deref(), Some("inline"));
        }
    }
    assert!(saw_caller_ran, "no CallerRan event was published");
}

#[tokio::test]
async fn pool_lifecycle_is_observable_on_the_bus() {
    let machine = test_machine();
    let mut events = machine.subscribe();

    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        machine
            .execute_in_thread(true, "alpha", false, counting_task("observed", &ran, 1, Duration::ZERO))
            .await
            .unwrap();
    }

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.pool.as_deref() == Some("alpha") {
            kinds.push(event.kind);
        }
    }

    assert_eq!(kinds[0], EventKind::PoolCreating);
    assert_eq!(kinds[1], EventKind::PoolCreated);
    assert!(kinds.contains(&EventKind::PoolResolved));
}

#[tokio::test(flavor = "multi_thread")]
async fn forced_teardown_cancels_uncooperative_bodies() {
    let machine = test_machine();

    let observed_cancel = Arc::new(AtomicBool::new(false));
    let task = {
        let observed_cancel = Arc::clone(&observed_cancel);
        TaskFn::arc("stubborn", move |ctx: CancellationToken| {
            let observed_cancel = Arc::clone(&observed_cancel);
            async move {
                // Ignores the shutdown flag; only the token reaches it.
                ctx.cancelled().await;
                observed_cancel.store(true, Ordering::SeqCst);
                Err(TaskError::Canceled)
            }
        })
    };
    machine
        .execute_in_thread(true, "stubborn", false, task)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The body never drains on its own, so every pool budget is missed
    // and the machine falls back to forced teardown.
    machine.shutdown(Duration::from_millis(200)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(observed_cancel.load(Ordering::SeqCst));
}
