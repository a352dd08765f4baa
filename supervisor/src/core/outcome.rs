//! Outcome model shared by stages and tasks.
//!
//! Every stage yields a [`StageResult`]: a success payload or a [`StageError`].
//! Failures are plain keyed data, never unwinding panics, so callers handle
//! precondition failures, business failures, and captured faults the same way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Success payload produced by a stage.
pub type StageValue = Value;

/// Outcome of a stage or task.
pub type StageResult<T = StageValue> = Result<T, StageError>;

pub const PRECONDITIONS_NOT_MET: &str = "Preconditions not met";
pub const RETRY_NOT_IMPLEMENTED: &str = "Retry not implemented";
pub const SEQUENCE_NOT_IMPLEMENTED: &str = "stage sequence not implemented";

/// Failure payload produced by a stage or task.
///
/// Only `error` is always present. Captured faults additionally carry a
/// truncated backtrace and the capture time. Extra keys supplied by stage code
/// land in `details` and serialize alongside the fixed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{error}")]
pub struct StageError {
    /// Human-readable failure message.
    pub error: String,
    /// Name of the stage that produced the failure, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl StageError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            stage: None,
            backtrace: None,
            timestamp: None,
            details: Map::new(),
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// A stage declined to run because its preconditions were not met.
    pub fn preconditions_not_met(stage: &str) -> Self {
        Self::new(PRECONDITIONS_NOT_MET).with_stage(stage)
    }

    /// Default outcome of a retry hook that was never overridden.
    pub fn retry_not_implemented(stage: &str) -> Self {
        Self::new(RETRY_NOT_IMPLEMENTED).with_stage(stage)
    }

    /// A task definition that never supplied its stage sequence.
    pub fn sequence_not_implemented() -> Self {
        Self::new(SEQUENCE_NOT_IMPLEMENTED)
    }

    /// Normalize an unexpected fault into the common failure shape.
    pub fn fault(stage: &str, message: impl Into<String>, backtrace: Option<Vec<String>>) -> Self {
        Self {
            error: message.into(),
            stage: Some(stage.to_string()),
            backtrace,
            timestamp: Some(Utc::now()),
            details: Map::new(),
        }
    }

    /// True when this failure was captured from a fault rather than returned.
    pub fn is_fault(&self) -> bool {
        self.timestamp.is_some()
    }
}
