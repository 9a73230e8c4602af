use std::future::Future;
use std::sync::Arc;
use log::{debug, error};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Result of asking the pool to start another job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Cancellation was requested; nothing was started
    Cancelled,
}

/// Fixed-capacity pool of job tasks.
///
/// Each task holds a semaphore permit for its whole life, so no more than
/// `capacity` jobs ever run at once. Admission waits for a free permit
/// instead of polling.
pub struct WorkerPool {
    capacity: usize,
    permits: Arc<Semaphore>,
    active: JoinSet<()>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            active: JoinSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs spawned and not yet reaped
    pub fn in_flight(&self) -> usize {
        self.active.len()
    }

    /// Wait for a free slot, then spawn the job built by `make`.
    ///
    /// `make` runs only once a slot is held, so anything it captures (such as
    /// a start timestamp) reflects the real start. Returns
    /// [`Admission::Cancelled`] without spawning if `cancel` fires first.
    pub async fn admit<F, Fut>(&mut self, cancel: &CancellationToken, make: F) -> Admission
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Admission::Cancelled;
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Admission::Cancelled,
            permit = Arc::clone(&self.permits).acquire_owned() => permit,
        };
        let permit = match permit {
            Ok(p) => p,
            Err(_) => return Admission::Cancelled,
        };

        self.reap();
        let job = make();
        self.active.spawn(async move {
            let _permit = permit;
            job.await;
        });
        Admission::Admitted
    }

    /// Collect already-finished tasks without waiting
    fn reap(&mut self) {
        while let Some(result) = self.active.try_join_next() {
            log_join(result);
        }
    }

    /// Wait for every outstanding job to finish
    pub async fn drain(&mut self) {
        if !self.active.is_empty() {
            debug!("Draining {} in-flight job(s)", self.active.len());
        }
        while let Some(result) = self.active.join_next().await {
            log_join(result);
        }
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!("Job task ended abnormally: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let mut pool = WorkerPool::new(3);
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let admitted = pool
                .admit(&cancel, move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            assert_eq!(admitted, Admission::Admitted);
        }
        pool.drain().await;

        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_zero_capacity_runs_one_at_a_time() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.capacity(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_pool_admits_nothing() {
        let mut pool = WorkerPool::new(2);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&started);

        let admitted = pool
            .admit(&cancel, move || async move {
                s.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        pool.drain().await;

        assert_eq!(admitted, Admission::Cancelled);
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_poison_pool() {
        let mut pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicUsize::new(0));

        pool.admit(&cancel, || async { panic!("encoder wrapper bug") }).await;
        let f = Arc::clone(&finished);
        pool.admit(&cancel, move || async move {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        pool.drain().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
