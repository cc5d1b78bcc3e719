//! Unit dispatch and the in-process worker pool.
//!
//! [`Dispatcher::dispatch`] registers a job's unit set with the completion
//! barrier and then enqueues one request per unit. Enqueueing never blocks.
//! The queue is behind the [`UnitQueue`] trait; [`WorkerPool`] is the
//! in-process implementation: an unbounded channel drained by a loop that
//! runs at most `max_parallel` units at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex, Semaphore};
use tracing::{debug, info, warn};

use super::barrier::CompletionBarrier;
use super::executor::UnitExecutor;
use super::types::PoolStats;

/// One unit execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRequest {
    pub job_id: String,
    pub unit_id: i64,
}

/// Errors that can occur while dispatching.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("job {0} has already been dispatched")]
    AlreadyDispatched(String),

    #[error("job {0} has no units to dispatch")]
    NoUnits(String),

    #[error("unit queue is closed")]
    QueueClosed,
}

/// Destination for unit execution requests.
pub trait UnitQueue: Send + Sync {
    /// Hand a request to the queue without waiting for it to run.
    fn enqueue(&self, request: UnitRequest) -> Result<(), DispatchError>;
}

/// Fans a job out into unit requests.
pub struct Dispatcher {
    barrier: Arc<CompletionBarrier>,
    queue: Arc<dyn UnitQueue>,
}

impl Dispatcher {
    pub fn new(barrier: Arc<CompletionBarrier>, queue: Arc<dyn UnitQueue>) -> Self {
        Self { barrier, queue }
    }

    /// Register `unit_ids` as the job's expected set and enqueue them.
    ///
    /// Must be called at most once per job; a second call fails with
    /// [`DispatchError::AlreadyDispatched`] and enqueues nothing.
    pub async fn dispatch(&self, job_id: &str, unit_ids: &[i64]) -> Result<usize, DispatchError> {
        self.barrier.register(job_id, unit_ids).await?;

        for &unit_id in unit_ids {
            let request = UnitRequest {
                job_id: job_id.to_string(),
                unit_id,
            };
            if let Err(e) = self.queue.enqueue(request) {
                // Nothing more will arrive for this job.
                self.barrier.forget(job_id).await;
                return Err(e);
            }
        }

        info!(job_id = %job_id, units = unit_ids.len(), "Job dispatched");
        Ok(unit_ids.len())
    }
}

/// In-process queue and bounded worker pool.
pub struct WorkerPool {
    max_parallel: usize,
    semaphore: Arc<Semaphore>,
    sender: mpsc::UnboundedSender<UnitRequest>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<UnitRequest>>>,
    stats: Arc<PoolStats>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerPool {
    pub(crate) fn new(max_parallel: usize, stats: Arc<PoolStats>) -> Self {
        let max_parallel = max_parallel.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            max_parallel,
            semaphore: Arc::new(Semaphore::new(max_parallel)),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            stats,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Start draining the queue. Requests enqueued while stopped are kept
    /// and picked up here.
    pub(crate) fn start(&self, executor: Arc<UnitExecutor>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Worker pool already running");
            return;
        }

        let receiver = Arc::clone(&self.receiver);
        let semaphore = Arc::clone(&self.semaphore);
        let stats = Arc::clone(&self.stats);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            // Held for the loop's lifetime so a restarted loop waits for
            // this one to exit.
            let mut rx = receiver.lock().await;
            info!("Worker pool started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Worker pool received shutdown signal");
                        break;
                    }
                    request = rx.recv() => {
                        let Some(request) = request else {
                            break;
                        };
                        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                            break;
                        };

                        stats.queued.fetch_sub(1, Ordering::Relaxed);
                        stats.active.fetch_add(1, Ordering::Relaxed);
                        debug!(job_id = %request.job_id, unit_id = request.unit_id, "Unit picked up");

                        let executor = Arc::clone(&executor);
                        let stats = Arc::clone(&stats);
                        tokio::spawn(async move {
                            executor.execute(&request.job_id, request.unit_id).await;
                            stats.active.fetch_sub(1, Ordering::Relaxed);
                            drop(permit);
                        });
                    }
                }
            }

            info!("Worker pool stopped");
        });
    }

    /// Stop taking new requests. Units already running finish normally.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Worker pool not running");
            return;
        }
        let _ = self.shutdown_tx.send(());
    }
}

impl UnitQueue for WorkerPool {
    fn enqueue(&self, request: UnitRequest) -> Result<(), DispatchError> {
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        self.sender.send(request).map_err(|_| {
            self.stats.queued.fetch_sub(1, Ordering::Relaxed);
            DispatchError::QueueClosed
        })
    }
}
