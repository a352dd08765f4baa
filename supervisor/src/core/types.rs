//! Summary payloads returned by successful task runs.
//!
//! These are stable contracts for callers and serialize deterministically.

use serde::{Deserialize, Serialize};

/// Success payload of a linear run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Names of the executed stages, in execution order.
    pub completed: Vec<String>,
    pub total_stages: usize,
}

/// Success payload of a conditional run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalSummary {
    /// Name of the last stage executed before the run ended; `None` when the
    /// sequence was empty.
    pub final_stage: Option<String>,
    /// Number of stage executions, counting revisits.
    pub executed_stages: usize,
}
