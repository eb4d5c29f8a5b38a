//! # merchx Queue
//!
//! Background job queue for the merchx product-data toolkit.
//!
//! Jobs carry a priority, optional batch membership, and a retry budget.
//! A periodic worker (any external scheduler calling
//! [`QueueEngine::process_queue`]) picks up due jobs oldest-highest-
//! priority-first under a single-flight flag, executes them against the
//! orchestration manager, and retries failures with exponential backoff
//! before failing them terminally. Batch progress is derived from live
//! status counts, so partial success is always visible.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`engine`] | Processing engine and job executors |
//! | [`job`] | Job model and derived reports |
//! | [`store`] | Job table repository |

pub mod engine;
pub mod job;
pub mod store;

pub use engine::{JobExecutor, JobFailure, JobFuture, ManagerJobExecutor, QueueEngine};
pub use job::{
    priority, BatchStatus, Job, JobError, JobOptions, JobStatus, ProcessOutcome, ProcessReport,
    QueueStatistics, StatusCounts,
};
pub use store::{JobStore, MemoryJobStore};
