//! Time-boxed batch processing of work items.

mod batch;
mod records;

pub use batch::{BatchScheduler, RunBudget};
pub use records::{JsonRecordStore, MemoryRecordStore, RecordStore, WorkItemFilter};

use crate::error::ErrorKind;
use crate::outcome::ApplicationOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lower bound of the medium tier.
pub const MEDIUM_TIER_THRESHOLD: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    High,
    Medium,
    #[default]
    Low,
}

impl PriorityTier {
    /// `>= high` is High, `[0.4, high)` is Medium, anything lower is Low.
    pub fn from_confidence(confidence: f64, high: f64) -> Self {
        if confidence >= high {
            PriorityTier::High
        } else if confidence >= MEDIUM_TIER_THRESHOLD {
            PriorityTier::Medium
        } else {
            PriorityTier::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    #[default]
    Pending,
    Applied,
    Failed,
    Skipped,
}

/// One automation target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub target_id: String,
    pub url: String,
    /// Upstream match confidence, drives the tier.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub priority_tier: PriorityTier,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: WorkStatus,
    /// Complexity from the last analysis; simpler targets go first within a tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<f64>,
}

impl WorkItem {
    pub fn new(target_id: impl Into<String>, url: impl Into<String>, confidence: f64) -> Self {
        Self {
            target_id: target_id.into(),
            url: url.into(),
            confidence,
            priority_tier: PriorityTier::from_confidence(confidence, 0.7),
            attempt_count: 0,
            last_attempt_at: None,
            status: WorkStatus::Pending,
            complexity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReason {
    pub target_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Aggregates of one run, reported even when the run aborts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_secs: f64,
    pub throughput_per_hour: f64,
    /// Targets handled by replaying a stored pattern.
    pub replayed: usize,
    /// Patterns created or re-learned.
    pub learned: usize,
    pub analyses: usize,
    pub errors: Vec<ErrorReason>,
    pub outcomes: Vec<ApplicationOutcome>,
    pub items: Vec<WorkItem>,
    pub aborted: bool,
}

impl BatchSummary {
    /// `successful / elapsed hours`, zero for an instant run.
    pub fn finish(&mut self, elapsed_secs: f64) {
        self.elapsed_secs = elapsed_secs;
        let hours = elapsed_secs / 3600.0;
        self.throughput_per_hour = if hours > 0.0 {
            self.successful as f64 / hours
        } else {
            0.0
        };
    }
}
