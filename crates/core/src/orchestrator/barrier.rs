//! Per-job completion barrier.
//!
//! The barrier is registered with the exact set of unit ids dispatched for a
//! job. Each unit reports once after its outcome is persisted; the report
//! that completes the set is the only one told to aggregate. Counting is by
//! unit id, so repeated or stray reports cannot complete a job early.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::metrics;

use super::dispatcher::DispatchError;

/// What a notification did to the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// Counted; other units are still outstanding.
    Counted { remaining: usize },
    /// Counted, and this was the last unit. The caller must aggregate.
    Fired,
    /// The unit had already been counted.
    Duplicate,
    /// The unit is not part of the job's registered set.
    Foreign,
    /// No barrier is registered for the job (never dispatched, or already
    /// aggregated).
    Unregistered,
}

impl BarrierOutcome {
    pub fn should_aggregate(&self) -> bool {
        matches!(self, BarrierOutcome::Fired)
    }
}

#[derive(Debug)]
struct JobBarrier {
    expected: HashSet<i64>,
    counted: HashSet<i64>,
    fired: bool,
}

/// In-memory barrier keyed by job id.
///
/// A single lock covers count-and-test, so among concurrent notifiers exactly
/// one observes completion.
#[derive(Debug, Default)]
pub struct CompletionBarrier {
    jobs: Mutex<HashMap<String, JobBarrier>>,
}

impl CompletionBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the units a job waits for. Fails if the job is already
    /// registered or the set is empty.
    pub async fn register(&self, job_id: &str, unit_ids: &[i64]) -> Result<(), DispatchError> {
        let expected: HashSet<i64> = unit_ids.iter().copied().collect();
        if expected.is_empty() {
            return Err(DispatchError::NoUnits(job_id.to_string()));
        }

        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(job_id) {
            return Err(DispatchError::AlreadyDispatched(job_id.to_string()));
        }

        debug!(job_id = %job_id, expected = expected.len(), "Barrier registered");
        jobs.insert(
            job_id.to_string(),
            JobBarrier {
                expected,
                counted: HashSet::new(),
                fired: false,
            },
        );
        Ok(())
    }

    /// Report that a unit reached a terminal status.
    pub async fn notify(&self, job_id: &str, unit_id: i64) -> BarrierOutcome {
        let outcome = {
            let mut jobs = self.jobs.lock().await;
            match jobs.get_mut(job_id) {
                None => BarrierOutcome::Unregistered,
                Some(barrier) => {
                    if !barrier.expected.contains(&unit_id) {
                        BarrierOutcome::Foreign
                    } else if !barrier.counted.insert(unit_id) {
                        BarrierOutcome::Duplicate
                    } else {
                        let remaining = barrier.expected.len() - barrier.counted.len();
                        if remaining == 0 && !barrier.fired {
                            barrier.fired = true;
                            BarrierOutcome::Fired
                        } else {
                            BarrierOutcome::Counted { remaining }
                        }
                    }
                }
            }
        };

        match outcome {
            BarrierOutcome::Duplicate | BarrierOutcome::Foreign | BarrierOutcome::Unregistered => {
                metrics::BARRIER_IGNORED.inc();
                warn!(job_id = %job_id, unit_id, ?outcome, "Ignoring completion notification");
            }
            BarrierOutcome::Fired => {
                debug!(job_id = %job_id, unit_id, "Barrier fired");
            }
            BarrierOutcome::Counted { remaining } => {
                debug!(job_id = %job_id, unit_id, remaining, "Unit counted");
            }
        }

        outcome
    }

    /// Drop a job's barrier once aggregation has run.
    pub async fn forget(&self, job_id: &str) {
        self.jobs.lock().await.remove(job_id);
    }

    pub async fn is_registered(&self, job_id: &str) -> bool {
        self.jobs.lock().await.contains_key(job_id)
    }

    /// `(counted, expected)` for a registered job.
    pub async fn progress(&self, job_id: &str) -> Option<(usize, usize)> {
        self.jobs
            .lock()
            .await
            .get(job_id)
            .map(|b| (b.counted.len(), b.expected.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fires_once_after_all_units() {
        let barrier = CompletionBarrier::new();
        barrier.register("job", &[1, 2, 3]).await.unwrap();

        assert_eq!(
            barrier.notify("job", 2).await,
            BarrierOutcome::Counted { remaining: 2 }
        );
        assert_eq!(
            barrier.notify("job", 1).await,
            BarrierOutcome::Counted { remaining: 1 }
        );
        assert_eq!(barrier.notify("job", 3).await, BarrierOutcome::Fired);
        assert_eq!(barrier.notify("job", 3).await, BarrierOutcome::Duplicate);
        assert_eq!(barrier.progress("job").await, Some((3, 3)));
    }

    #[tokio::test]
    async fn test_duplicate_does_not_advance() {
        let barrier = CompletionBarrier::new();
        barrier.register("job", &[1, 2]).await.unwrap();

        barrier.notify("job", 1).await;
        assert_eq!(barrier.notify("job", 1).await, BarrierOutcome::Duplicate);
        assert_eq!(barrier.progress("job").await, Some((1, 2)));
    }

    #[tokio::test]
    async fn test_foreign_and_unregistered_are_ignored() {
        let barrier = CompletionBarrier::new();
        barrier.register("job", &[1]).await.unwrap();

        assert_eq!(barrier.notify("job", 42).await, BarrierOutcome::Foreign);
        assert_eq!(barrier.notify("other", 1).await, BarrierOutcome::Unregistered);
        assert_eq!(barrier.progress("job").await, Some((0, 1)));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_empty_sets() {
        let barrier = CompletionBarrier::new();
        barrier.register("job", &[1]).await.unwrap();

        assert!(matches!(
            barrier.register("job", &[2]).await,
            Err(DispatchError::AlreadyDispatched(_))
        ));
        assert!(matches!(
            barrier.register("empty", &[]).await,
            Err(DispatchError::NoUnits(_))
        ));
    }

    #[tokio::test]
    async fn test_forget_then_notify_is_unregistered() {
        let barrier = CompletionBarrier::new();
        barrier.register("job", &[1]).await.unwrap();
        assert_eq!(barrier.notify("job", 1).await, BarrierOutcome::Fired);

        barrier.forget("job").await;
        assert!(!barrier.is_registered("job").await);
        assert_eq!(barrier.notify("job", 1).await, BarrierOutcome::Unregistered);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_notifications_fire_exactly_once() {
        let barrier = Arc::new(CompletionBarrier::new());
        let ids: Vec<i64> = (1..=200).collect();
        barrier.register("job", &ids).await.unwrap();

        let mut handles = Vec::new();
        for id in ids {
            // Every unit reports twice, concurrently.
            for _ in 0..2 {
                let barrier = Arc::clone(&barrier);
                handles.push(tokio::spawn(async move { barrier.notify("job", id).await }));
            }
        }

        let mut fired = 0;
        let mut duplicates = 0;
        for outcome in futures::future::join_all(handles).await {
            match outcome.unwrap() {
                BarrierOutcome::Fired => fired += 1,
                BarrierOutcome::Duplicate => duplicates += 1,
                _ => {}
            }
        }

        assert_eq!(fired, 1);
        assert_eq!(duplicates, 200);
    }
}
