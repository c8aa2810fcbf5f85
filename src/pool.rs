use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

enum JobOutcome<E> {
    Completed,
    Failed(E),
    Cancelled,
}

/// Terminal state of every job submitted since the last `wait`.
#[derive(Debug)]
pub struct PoolReport<E> {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Jobs that panicked. Also counted in `failed`.
    pub panicked: usize,
    /// First error returned by a job, in completion order.
    pub first_error: Option<E>,
}

impl<E> Default for PoolReport<E> {
    fn default() -> Self {
        Self {
            completed: 0,
            failed: 0,
            cancelled: 0,
            panicked: 0,
            first_error: None,
        }
    }
}

impl<E> PoolReport<E> {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    fn record(&mut self, joined: Result<JobOutcome<E>, JoinError>) {
        match joined {
            Ok(JobOutcome::Completed) => self.completed += 1,
            Ok(JobOutcome::Failed(e)) => {
                self.failed += 1;
                if self.first_error.is_none() {
                    self.first_error = Some(e);
                }
            }
            Ok(JobOutcome::Cancelled) => self.cancelled += 1,
            Err(e) if e.is_panic() => {
                tracing::error!(error = %e, "worker job panicked");
                self.failed += 1;
                self.panicked += 1;
            }
            Err(_) => self.cancelled += 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("worker pool cancelled, job rejected")]
pub struct PoolClosed;

/// Bounded-concurrency job runner. At most `max_workers` jobs exist at
/// once: `submit` waits for a free slot before spawning, so a caller
/// looping over submissions is held back with the workers. Jobs are never
/// retried here.
pub struct WorkerPool<E> {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<JobOutcome<E>>,
    cancel: CancellationToken,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    max_workers: usize,
    /// Outcomes collected while `submit` was waiting for a slot.
    collected: PoolReport<E>,
}

impl<E: Send + 'static> WorkerPool<E> {
    pub fn new(max_workers: usize, cancel: CancellationToken) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            tasks: JoinSet::new(),
            cancel,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            max_workers,
            collected: PoolReport::default(),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Spawned jobs not yet collected.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Jobs holding a slot right now.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of jobs that ever held a slot at the same time.
    pub fn peak_active(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Wait for a free slot, then spawn `job` into it. Finished jobs are
    /// collected while waiting. Fails once the pool is cancelled; the job is
    /// dropped without running.
    pub async fn submit<F, Fut>(&mut self, job: F) -> Result<(), PoolClosed>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let Self {
            semaphore,
            tasks,
            cancel,
            collected,
            ..
        } = self;

        let permit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PoolClosed),
                Some(joined) = tasks.join_next() => collected.record(joined),
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => break p,
                    Err(_) => return Err(PoolClosed),
                },
            }
        };

        let cancel = self.cancel.clone();
        let active = self.active.clone();
        let peak = self.peak.clone();

        self.tasks.spawn(async move {
            let _permit = permit;
            let _slot = SlotGuard::enter(active, &peak);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => JobOutcome::Cancelled,
                result = job() => match result {
                    Ok(()) => JobOutcome::Completed,
                    Err(e) => JobOutcome::Failed(e),
                },
            }
        });
        Ok(())
    }

    /// Resolve once every submitted job is terminal. The pool can be reused
    /// afterwards.
    pub async fn wait(&mut self) -> PoolReport<E> {
        let mut report = std::mem::take(&mut self.collected);
        while let Some(joined) = self.tasks.join_next().await {
            report.record(joined);
        }
        report
    }
}

/// Counts a job as active for as long as it holds a slot.
struct SlotGuard {
    active: Arc<AtomicUsize>,
}

impl SlotGuard {
    fn enter(active: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
