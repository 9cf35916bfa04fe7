//! A fixed set of workers draining a bounded job queue.
//!
//! Network handlers hand heavy work (signature and proof verification) to a [Pool] so the
//! transport's delivery loop is never blocked by it. When the queue is full the configured
//! [Backpressure] decides whether the producer waits (up to a timeout) or the job is dropped.

use futures::future::BoxFuture;
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use relay_utils::Backpressure;
use std::{future::Future, sync::Arc};
use thiserror::Error;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex,
};
use tracing::{debug, trace};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("queue full")]
    Full,
    #[error("timed out waiting for queue space")]
    Timeout,
    #[error("pool closed")]
    Closed,
}

/// Configuration for a [Pool].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Number of jobs executed concurrently.
    pub workers: usize,

    /// Number of jobs waiting for a worker.
    pub queue_size: usize,

    /// What [Pool::submit] does when the queue is full.
    pub backpressure: Backpressure,
}

#[derive(Clone, Default)]
struct Metrics {
    queued: Counter,
    dropped: Counter,
    timed_out: Counter,
}

impl Metrics {
    fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register("queued", "Jobs accepted into the queue", metrics.queued.clone());
        registry.register(
            "dropped",
            "Jobs dropped because the queue was full",
            metrics.dropped.clone(),
        );
        registry.register(
            "timed_out",
            "Jobs dropped after waiting for queue space",
            metrics.timed_out.clone(),
        );
        metrics
    }
}

/// Handle to a worker pool. Workers exit once every handle is dropped and the queue drains.
#[derive(Clone)]
pub struct Pool {
    sender: mpsc::Sender<BoxFuture<'static, ()>>,
    backpressure: Backpressure,
    metrics: Metrics,
}

impl Pool {
    /// Spawns the workers onto the current tokio runtime.
    pub fn new(cfg: Config, registry: &mut Registry) -> Self {
        let (sender, receiver) = mpsc::channel::<BoxFuture<'static, ()>>(cfg.queue_size.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        for worker in 0..cfg.workers.max(1) {
            let receiver = receiver.clone();
            tokio::spawn(async move {
                loop {
                    let job = receiver.lock().await.recv().await;
                    let Some(job) = job else {
                        break;
                    };
                    job.await;
                }
                trace!(worker, "worker exited");
            });
        }
        Self {
            sender,
            backpressure: cfg.backpressure,
            metrics: Metrics::init(registry),
        }
    }

    /// Queues `job` for execution.
    pub async fn submit(&self, job: impl Future<Output = ()> + Send + 'static) -> Result<(), Error> {
        let job: BoxFuture<'static, ()> = Box::pin(job);
        match self.backpressure {
            Backpressure::Drop => match self.sender.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("pool queue full, dropping job");
                    self.metrics.dropped.inc();
                    return Err(Error::Full);
                }
                Err(TrySendError::Closed(_)) => return Err(Error::Closed),
            },
            Backpressure::Block(timeout) => {
                match tokio::time::timeout(timeout, self.sender.send(job)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => return Err(Error::Closed),
                    Err(_) => {
                        debug!(?timeout, "pool queue full, gave up waiting");
                        self.metrics.timed_out.inc();
                        return Err(Error::Timeout);
                    }
                }
            }
        }
        self.metrics.queued.inc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::sync::{oneshot, Notify};

    fn config(workers: usize, queue_size: usize, backpressure: Backpressure) -> Config {
        Config {
            workers,
            queue_size,
            backpressure,
        }
    }

    #[tokio::test]
    async fn test_runs_jobs() {
        let pool = Pool::new(
            config(4, 16, Backpressure::Block(Duration::from_secs(1))),
            &mut Registry::default(),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_sender, done) = oneshot::channel();
        let done_sender = Arc::new(std::sync::Mutex::new(Some(done_sender)));
        for _ in 0..10 {
            let counter = counter.clone();
            let done_sender = done_sender.clone();
            pool.submit(async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 9 {
                    if let Some(sender) = done_sender.lock().unwrap().take() {
                        let _ = sender.send(());
                    }
                }
            })
            .await
            .unwrap();
        }
        done.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.metrics.queued.get(), 10);
    }

    #[tokio::test]
    async fn test_drop_when_full() {
        let pool = Pool::new(config(1, 1, Backpressure::Drop), &mut Registry::default());
        let gate = Arc::new(Notify::new());
        let (started_sender, started) = oneshot::channel();

        // Occupy the only worker.
        let blocker = gate.clone();
        pool.submit(async move {
            let _ = started_sender.send(());
            blocker.notified().await;
        })
        .await
        .unwrap();
        started.await.unwrap();

        // Fill the queue, then overflow it.
        pool.submit(async {}).await.unwrap();
        assert_eq!(pool.submit(async {}).await, Err(Error::Full));
        assert_eq!(pool.metrics.dropped.get(), 1);
        gate.notify_one();
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_times_out() {
        let pool = Pool::new(
            config(1, 1, Backpressure::Block(Duration::from_millis(50))),
            &mut Registry::default(),
        );
        let gate = Arc::new(Notify::new());
        let (started_sender, started) = oneshot::channel();
        let blocker = gate.clone();
        pool.submit(async move {
            let _ = started_sender.send(());
            blocker.notified().await;
        })
        .await
        .unwrap();
        started.await.unwrap();

        pool.submit(async {}).await.unwrap();
        assert_eq!(pool.submit(async {}).await, Err(Error::Timeout));
        assert_eq!(pool.metrics.timed_out.get(), 1);
        gate.notify_one();
    }
}
