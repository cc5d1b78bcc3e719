//! Batch orchestrator: fan-out/fan-in over the units of a job.
//!
//! - **Decomposer**: extracts the upload, classifies every entry and commits
//!   all units at once.
//! - **Dispatcher**: registers the barrier, then queues one request per
//!   pending unit for the worker pool.
//! - **Executor**: converts one unit, persists its outcome, then notifies
//!   the barrier.
//! - **Barrier**: fires exactly once when every dispatched unit reported.
//! - **Aggregator**: packages the outputs and finishes the job.

mod aggregator;
mod barrier;
mod config;
mod decomposer;
mod dispatcher;
mod executor;
mod runner;
mod types;

pub use aggregator::{AggregationReport, ResultAggregator};
pub use barrier::{BarrierOutcome, CompletionBarrier};
pub use config::OrchestratorConfig;
pub use decomposer::ArchiveDecomposer;
pub use dispatcher::{DispatchError, Dispatcher, UnitQueue, UnitRequest, WorkerPool};
pub use executor::{unit_outcome, UnitExecution, UnitExecutor};
pub use runner::BatchOrchestrator;
pub use types::{OrchestratorError, OrchestratorStatus, RecoveryReport};
