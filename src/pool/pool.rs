//! # Queue-fed worker pools.
//!
//! A [`Pool`] owns a job queue and a set of worker tasks that drain it in
//! FIFO order. Two shapes exist:
//!
//! - **Bounded** ([`Pool::bounded`]): bounded queue of capacity Q. Workers
//!   are added up to `core_workers` while demand exists (direct handoff of
//!   the triggering job), then the queue absorbs bursts, then the pool
//!   expands up to `max_workers`. When the queue is full at `max_workers`,
//!   the **submitter runs the job inline** — backpressure instead of
//!   rejection.
//! - **Cached unbounded** ([`Pool::cached`]): unbounded queue; a worker is
//!   spawned whenever no idle worker is available; idle workers are
//!   recycled.
//!
//! Every worker (core workers included) retires after `idle_ttl` without
//! work, so an idle pool never blocks process teardown.
//!
//! ## Lifecycle
//! ```text
//! submit()* ──► seal() ──► await_idle(budget) ──► force_down()  (budget missed)
//!                  │                │
//!                  │                └── true: queue drained, workers retired
//!                  └── refuses new submissions; workers drain what is queued
//! ```
//!
//! Workers are named `<kind>poolID-<P>-threadID-<T>`; the pool id is
//! process-wide, the thread id per-pool. Names show up in log lines only —
//! there is no registry of workers.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::PoolConfig;
use crate::error::MachineError;
use crate::ids::RollingId;

/// Process-wide pool-id source.
static POOL_IDS: RollingId = RollingId::new();

/// A fully wrapped unit of work: listener hooks, panic isolation, and
/// outcome reporting are already baked in, so workers (or the submitter,
/// under caller-runs) only await it.
pub(crate) type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The two pool shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolKind {
    /// Bounded queue, bounded workers, caller-runs saturation.
    Bounded,
    /// Unbounded queue, on-demand workers, idle recycling.
    Cached,
}

impl PoolKind {
    fn label(self) -> &'static str {
        match self {
            PoolKind::Bounded => "bounded",
            PoolKind::Cached => "cached",
        }
    }
}

/// How a submission was absorbed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    /// The job was queued or handed directly to a worker.
    Dispatched,
    /// The queue was full at `max_workers`; the submitter ran the job
    /// inline.
    CallerRan,
}

enum JobSender {
    Bounded(mpsc::Sender<Job>),
    Unbounded(mpsc::UnboundedSender<Job>),
}

enum JobReceiver {
    Bounded(mpsc::Receiver<Job>),
    Unbounded(mpsc::UnboundedReceiver<Job>),
}

impl JobReceiver {
    async fn recv(&mut self) -> Option<Job> {
        match self {
            JobReceiver::Bounded(rx) => rx.recv().await,
            JobReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<Job> {
        match self {
            JobReceiver::Bounded(rx) => rx.try_recv().ok(),
            JobReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// State shared between the pool front and its workers.
struct Shared {
    name: String,
    kind: PoolKind,
    queue: Mutex<JobReceiver>,
    workers: AtomicUsize,
    idle: AtomicUsize,
    idle_ttl: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
    thread_ids: RollingId,
}

/// Named worker pool.
pub struct Pool {
    shared: Arc<Shared>,
    sender: Mutex<Option<JobSender>>,
    core_workers: usize,
    max_workers: usize,
}

impl Pool {
    /// Creates a bounded pool sized by `cfg`.
    pub fn bounded(cfg: &PoolConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
        Arc::new(Self::build(
            PoolKind::Bounded,
            JobSender::Bounded(tx),
            JobReceiver::Bounded(rx),
            cfg.core_workers.max(1),
            cfg.max_workers.max(cfg.core_workers.max(1)),
            cfg.idle_ttl,
        ))
    }

    /// Creates a cached unbounded pool recycling idle workers after
    /// `idle_ttl`.
    pub fn cached(idle_ttl: Duration) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self::build(
            PoolKind::Cached,
            JobSender::Unbounded(tx),
            JobReceiver::Unbounded(rx),
            0,
            usize::MAX,
            idle_ttl,
        ))
    }

    fn build(
        kind: PoolKind,
        tx: JobSender,
        rx: JobReceiver,
        core_workers: usize,
        max_workers: usize,
        idle_ttl: Duration,
    ) -> Self {
        let pool_id = POOL_IDS.next();
        let name = format!("{}poolID-{}", kind.label(), pool_id);

        Self {
            shared: Arc::new(Shared {
                name,
                kind,
                queue: Mutex::new(rx),
                workers: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                idle_ttl,
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                thread_ids: RollingId::new(),
            }),
            sender: Mutex::new(Some(tx)),
            core_workers,
            max_workers,
        }
    }

    /// The pool's generated name, e.g. `boundedpoolID-3`.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The pool shape.
    pub fn kind(&self) -> PoolKind {
        self.shared.kind
    }

    /// Token parenting every job dispatched through this pool.
    ///
    /// Cancelled by [`force_down`](Pool::force_down); jobs derive child
    /// tokens from it so forced teardown reaches running bodies.
    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.shared.cancel
    }

    /// Current worker count (for tests and diagnostics).
    pub fn worker_count(&self) -> usize {
        self.shared.workers.load(Ordering::SeqCst)
    }

    /// Submits a job.
    ///
    /// Bounded shape: grows toward `core_workers` (direct handoff), then
    /// queues, then grows toward `max_workers`, and finally runs the job on
    /// the calling task (returning [`Submission::CallerRan`]).
    ///
    /// Cached shape: queues and spawns a worker unless an idle one is
    /// available.
    ///
    /// Fails with [`MachineError::ShutdownActive`] once the pool is sealed.
    pub(crate) async fn submit(&self, job: Job) -> Result<Submission, MachineError> {
        match self.shared.kind {
            PoolKind::Bounded => self.submit_bounded(job).await,
            PoolKind::Cached => self.submit_cached(job).await,
        }
    }

    async fn submit_bounded(&self, job: Job) -> Result<Submission, MachineError> {
        let tx = {
            let sender = self.sender.lock().await;
            match sender.as_ref() {
                Some(JobSender::Bounded(tx)) => tx.clone(),
                _ => return Err(MachineError::ShutdownActive),
            }
        };

        if self.try_reserve_worker(self.core_workers) {
            self.spawn_worker(Some(job));
            return Ok(Submission::Dispatched);
        }

        match tx.try_send(job) {
            Ok(()) => {
                // All workers may have retired since the queue was last
                // touched; make sure someone is around to drain it.
                if self.worker_count() == 0 && self.try_reserve_worker(self.core_workers.max(1)) {
                    self.spawn_worker(None);
                }
                Ok(Submission::Dispatched)
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                if self.try_reserve_worker(self.max_workers) {
                    self.spawn_worker(Some(job));
                    Ok(Submission::Dispatched)
                } else {
                    // Saturated: backpressure by running on the submitter.
                    job.await;
                    Ok(Submission::CallerRan)
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(MachineError::ShutdownActive),
        }
    }

    async fn submit_cached(&self, job: Job) -> Result<Submission, MachineError> {
        let sender = self.sender.lock().await;
        match sender.as_ref() {
            Some(JobSender::Unbounded(tx)) => {
                if tx.send(job).is_err() {
                    return Err(MachineError::ShutdownActive);
                }
            }
            _ => return Err(MachineError::ShutdownActive),
        }
        drop(sender);

        if self.shared.idle.load(Ordering::SeqCst) == 0 && self.try_reserve_worker(self.max_workers)
        {
            self.spawn_worker(None);
        }

        Ok(Submission::Dispatched)
    }

    /// Reserves a worker slot if the count is below `limit`.
    fn try_reserve_worker(&self, limit: usize) -> bool {
        let workers = &self.shared.workers;
        loop {
            let current = workers.load(Ordering::SeqCst);
            if current >= limit {
                return false;
            }
            if workers
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Spawns one worker; the slot must already be reserved.
    fn spawn_worker(&self, first: Option<Job>) {
        let shared = Arc::clone(&self.shared);
        let worker_name = format!(
            "{}-threadID-{}",
            shared.name,
            shared.thread_ids.next()
        );
        self.shared
            .tracker
            .spawn(worker_loop(shared, worker_name, first));
    }

    /// Graceful stop: refuse new submissions and let workers drain the
    /// queue.
    ///
    /// Idempotent. Does not cancel anything; combine with
    /// [`await_idle`](Pool::await_idle) and
    /// [`force_down`](Pool::force_down).
    pub async fn seal(&self) {
        self.sender.lock().await.take();
        self.shared.tracker.close();
    }

    /// Waits up to `budget` for every worker to finish.
    ///
    /// Only meaningful after [`seal`](Pool::seal). Returns `true` when the
    /// queue drained and all workers retired in time.
    pub async fn await_idle(&self, budget: Duration) -> bool {
        tokio::time::timeout(budget, self.shared.tracker.wait())
            .await
            .is_ok()
    }

    /// Forceful stop: cancel the pool token (reaching every running job)
    /// and abandon whatever is still queued.
    ///
    /// Abandoned jobs never produce an outcome; their handles report a
    /// failure.
    pub async fn force_down(&self) {
        self.sender.lock().await.take();
        self.shared.tracker.close();
        self.shared.cancel.cancel();

        let mut queue = self.shared.queue.lock().await;
        while let Some(job) = queue.try_recv() {
            drop(job);
        }
    }
}

/// One worker: drains the shared queue until idle for `idle_ttl`, the
/// queue closes, or the pool is forced down.
async fn worker_loop(shared: Arc<Shared>, worker_name: String, first: Option<Job>) {
    tracing::debug!(worker = %worker_name, "worker started");

    if let Some(job) = first {
        job.await;
    }

    loop {
        shared.idle.fetch_add(1, Ordering::SeqCst);
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => None,
            polled = tokio::time::timeout(shared.idle_ttl, async {
                shared.queue.lock().await.recv().await
            }) => match polled {
                Ok(job) => job,
                Err(_idle) => None,
            },
        };
        shared.idle.fetch_sub(1, Ordering::SeqCst);

        match next {
            Some(job) => job.await,
            None => break,
        }
    }

    shared.workers.fetch_sub(1, Ordering::SeqCst);

    // A job may have been queued in the instant this worker decided to
    // retire; drain it rather than strand it.
    if !shared.cancel.is_cancelled() {
        if let Ok(mut queue) = shared.queue.try_lock() {
            while let Some(job) = queue.try_recv() {
                job.await;
            }
        }
    }

    tracing::debug!(worker = %worker_name, "worker retired");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn job(counter: &Arc<AtomicUsize>) -> Job {
        let counter = Arc::clone(counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn tiny_pool() -> Arc<Pool> {
        Pool::bounded(&PoolConfig {
            queue_capacity: 2,
            core_workers: 1,
            max_workers: 2,
            idle_ttl: Duration::from_millis(200),
        })
    }

    #[tokio::test]
    async fn bounded_pool_runs_submitted_jobs() {
        let pool = tiny_pool();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            pool.submit(job(&counter)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn saturated_pool_runs_on_the_submitter() {
        let pool = tiny_pool();
        let gate = Arc::new(tokio::sync::Semaphore::new(0));

        // Two blocking jobs occupy both workers; two more fill the queue.
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            pool.submit(Box::pin(async move {
                let _permit = gate.acquire().await;
            }))
            .await
            .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        let ran_inline = Arc::new(AtomicUsize::new(0));
        let submission = pool.submit(job(&ran_inline)).await.unwrap();

        assert_eq!(submission, Submission::CallerRan);
        assert_eq!(ran_inline.load(Ordering::SeqCst), 1);

        gate.add_permits(4);
    }

    #[tokio::test]
    async fn sealed_pool_refuses_new_work_but_drains_the_queue() {
        let pool = tiny_pool();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            pool.submit(job(&counter)).await.unwrap();
        }
        pool.seal().await;

        let refused = pool.submit(job(&counter)).await;
        assert!(matches!(refused, Err(MachineError::ShutdownActive)));

        assert!(pool.await_idle(Duration::from_secs(2)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn idle_workers_retire() {
        let pool = tiny_pool();
        let counter = Arc::new(AtomicUsize::new(0));
        pool.submit(job(&counter)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(pool.worker_count(), 0);
    }

    #[tokio::test]
    async fn cached_pool_spawns_on_demand() {
        let pool = Pool::cached(Duration::from_millis(200));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            pool.submit(job(&counter)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
