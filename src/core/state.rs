//! Execution state models

use crate::core::step::StepOutput;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status of a single step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Step has not been dispatched
    Pending,
    /// Step is currently running
    Running,
    /// Step completed successfully
    Complete,
    /// Step failed (all attempts exhausted)
    Failed,
    /// Step was skipped (condition, tolerated failure, or failed dependency)
    Skipped,
}

impl StepStatus {
    /// Check if the status can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Complete | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// Why a step ended up skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Its condition evaluated to false
    Condition,
    /// It failed but its error policy tolerates failures
    Tolerated,
    /// A dependency failed (directly or transitively)
    BlockedByFailure,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Condition => "condition",
            SkipReason::Tolerated => "tolerated",
            SkipReason::BlockedByFailure => "blocked",
        }
    }
}

/// Recorded outcome of one step
#[derive(Debug, Clone)]
pub struct StepResult {
    pub status: StepStatus,
    pub output: Option<StepOutput>,
    pub duration: Duration,
    /// Retries consumed (attempts - 1)
    pub retries: u32,
    pub error: Option<String>,
    pub skip_reason: Option<SkipReason>,
}

impl StepResult {
    pub fn running() -> Self {
        Self {
            status: StepStatus::Running,
            output: None,
            duration: Duration::ZERO,
            retries: 0,
            error: None,
            skip_reason: None,
        }
    }

    pub fn complete(output: StepOutput, duration: Duration, retries: u32) -> Self {
        Self {
            status: StepStatus::Complete,
            output: Some(output),
            duration,
            retries,
            error: None,
            skip_reason: None,
        }
    }

    pub fn failed(error: String, duration: Duration, retries: u32) -> Self {
        Self {
            status: StepStatus::Failed,
            output: None,
            duration,
            retries,
            error: Some(error),
            skip_reason: None,
        }
    }

    pub fn skipped(
        reason: SkipReason,
        error: Option<String>,
        duration: Duration,
        retries: u32,
    ) -> Self {
        Self {
            status: StepStatus::Skipped,
            output: None,
            duration,
            retries,
            error,
            skip_reason: Some(reason),
        }
    }

    /// Whether dependents of this step must not run
    pub fn blocks_dependents(&self) -> bool {
        self.status == StepStatus::Failed
            || self.skip_reason == Some(SkipReason::BlockedByFailure)
    }
}
