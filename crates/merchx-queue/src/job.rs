//! Queue job model and derived reports.

use merchx_core::ProviderId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Job priority constants (0–100).
pub mod priority {
    pub const LOW: u8 = 10;
    pub const NORMAL: u8 = 50;
    pub const HIGH: u8 = 90;
    pub const URGENT: u8 = 100;
}

/// Lifecycle state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are eligible for the retention sweep and never
    /// scheduled again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One durable job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub action: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_hint: Option<ProviderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub priority: u8,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_retries: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Options accepted when enqueuing a job.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub priority: Option<u8>,
    pub provider_hint: Option<ProviderId>,
    pub batch_id: Option<String>,
    /// A future time makes the job ineligible for pickup until then.
    pub scheduled_at: Option<OffsetDateTime>,
    pub max_retries: Option<u32>,
}

impl JobOptions {
    pub fn with_priority(priority: u8) -> Self {
        Self {
            priority: Some(priority),
            ..Self::default()
        }
    }
}

/// Per-status counts for a batch or the whole queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn absorb(&mut self, status: JobStatus) {
        self.total += 1;
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Derived batch progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub batch_id: String,
    #[serde(flatten)]
    pub counts: StatusCounts,
    /// Percentage of jobs in a decided state (completed or failed).
    pub progress: f64,
    pub is_complete: bool,
}

impl BatchStatus {
    pub fn from_counts(batch_id: String, counts: StatusCounts) -> Self {
        let progress = if counts.total == 0 {
            0.0
        } else {
            let decided = (counts.completed + counts.failed) as f64;
            ((decided / counts.total as f64) * 100.0 * 100.0).round() / 100.0
        };

        Self {
            batch_id,
            counts,
            progress,
            is_complete: counts.pending == 0 && counts.processing == 0,
        }
    }
}

/// Summary of one processing pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<JobError>,
}

/// One job failure inside a processing pass report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub job_id: u64,
    pub message: String,
}

/// Outcome of a `process_queue` invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Another worker holds the single-flight flag.
    AlreadyRunning,
    Completed(ProcessReport),
}

impl ProcessOutcome {
    pub fn report(&self) -> Option<&ProcessReport> {
        match self {
            Self::AlreadyRunning => None,
            Self::Completed(report) => Some(report),
        }
    }
}

/// Queue-wide statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub total_batches: usize,
    pub success_rate: f64,
}

impl QueueStatistics {
    pub fn from_counts(counts: StatusCounts, total_batches: usize) -> Self {
        let decided = counts.completed + counts.failed;
        let success_rate = if decided == 0 {
            0.0
        } else {
            ((counts.completed as f64 / decided as f64) * 100.0 * 100.0).round() / 100.0
        };

        Self {
            counts,
            total_batches,
            success_rate,
        }
    }
}
