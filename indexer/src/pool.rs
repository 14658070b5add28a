use parking_lot::Mutex;
use sitesearch_crawler::RunFlag;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info};

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Active,
    /// Stopped by the user; jobs still running wind down on their own.
    Stopped,
    /// Every job finished without a stop request.
    Drained,
}

struct Shared {
    state: Mutex<PoolState>,
    pending: AtomicUsize,
    idle: Notify,
    run: RunFlag,
    cancel: RunFlag,
    permits: Arc<Semaphore>,
}

/// One indexing run: the per-site jobs plus the fetch permits and cancellation flag their crawls
/// share.
///
/// `run` is the service-wide busy flag; the pool owns its transition back to idle. A user stop flips
/// it at once together with the pool's own `cancel` flag; otherwise the last job to finish drains the
/// pool and releases it. Crawls only watch `cancel`, so a later run reusing `run` never revives them.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

/// Counts a job as finished when dropped, so a panicking job still drains the pool.
struct Finish(WorkerPool);

impl Drop for Finish {
    fn drop(&mut self) {
        self.0.finish_one();
    }
}

impl WorkerPool {
    pub fn new(run: RunFlag, parallelism: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState::Active),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                run,
                cancel: RunFlag::running(),
                permits: Arc::new(Semaphore::new(parallelism.max(1))),
            }),
        }
    }

    pub fn permits(&self) -> Arc<Semaphore> {
        self.shared.permits.clone()
    }

    /// Flag for this run's crawls; drops on stop or drain and is never raised again.
    pub fn cancellation(&self) -> RunFlag {
        self.shared.cancel.clone()
    }

    pub fn state(&self) -> PoolState {
        *self.shared.state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == PoolState::Stopped
    }

    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Spawns every job on `handle`. All jobs are counted before the first one starts, so an early
    /// finisher cannot drain the pool while the rest are still being submitted.
    pub fn submit_all(&self, handle: &Handle, jobs: Vec<Job>) -> usize {
        if self.state() != PoolState::Active {
            return 0;
        }
        let count = jobs.len();
        if count == 0 {
            self.drain();
            return 0;
        }
        self.shared.pending.fetch_add(count, Ordering::AcqRel);
        for job in jobs {
            let finish = Finish(self.clone());
            handle.spawn(async move {
                let _finish = finish;
                job.await;
            });
        }
        count
    }

    /// Active → Stopped. Returns false when the pool already stopped or drained.
    pub fn stop(&self) -> bool {
        let mut state = self.shared.state.lock();
        if *state != PoolState::Active {
            return false;
        }
        *state = PoolState::Stopped;
        self.shared.cancel.try_stop();
        self.shared.run.try_stop();
        info!(pending = self.pending(), "worker pool stopped");
        true
    }

    /// Waits until every submitted job has finished. Safe to call again after a previous call was
    /// dropped half way.
    pub async fn join(&self) {
        loop {
            let idle = self.shared.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }

    fn finish_one(&self) {
        let left = self.shared.pending.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!(left, "job finished");
        if left == 0 {
            self.drain();
            self.shared.idle.notify_waiters();
        }
    }

    fn drain(&self) {
        let mut state = self.shared.state.lock();
        if *state == PoolState::Active {
            *state = PoolState::Drained;
            self.shared.cancel.try_stop();
            self.shared.run.try_stop();
            info!("worker pool drained");
        }
    }
}
