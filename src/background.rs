//! Bounded background worker pool for fire-and-forget work.
//!
//! Telemetry writes (download events, last-accessed touches) go through
//! here: the queue is bounded and overflow drops the task rather than
//! blocking the serving path.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Fire-and-forget task pool with an overflow-drop policy.
pub struct TaskPool {
    tx: mpsc::Sender<Job>,
    dropped: AtomicU64,
}

impl TaskPool {
    /// Spawn `workers` consumers over a queue of `queue_size` pending jobs.
    pub fn new(workers: usize, queue_size: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Job>(queue_size.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for _ in 0..workers.max(1) {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
            });
        }

        Arc::new(Self {
            tx,
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue a job; drops it (and counts the drop) when the queue is full.
    pub fn try_submit(&self, job: impl Future<Output = ()> + Send + 'static) {
        if self.tx.try_send(Box::pin(job)).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped, "Background queue full, dropping task");
        }
    }

    /// Number of jobs dropped due to a full queue.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
