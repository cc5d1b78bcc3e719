//! Job and unit state store.
//!
//! A [`Job`] is one submitted batch; each archive entry becomes one [`Unit`].
//! Every status mutation goes through the [`JobStore`], whose conditional
//! updates keep both lifecycles monotonic.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{DecompositionCommit, JobFilter, JobStore, JobStoreError, NewUnit};
pub use types::{
    Job, JobSnapshot, JobStatus, UnknownStatus, Unit, UnitStatus, INVALID_DOCUMENT_MESSAGE,
    TIMEOUT_MESSAGE, UNRECORDED_OUTCOME_MESSAGE,
};
