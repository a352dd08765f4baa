//! Execution-history accumulator scope.
//!
//! For the duration of one scoped call, a [`StateAccumulator`] installs a fresh
//! [`StageState`] in the environment. Task runs append each stage's name to
//! `history` before its work and write `metadata[name]` after it. The final
//! state is returned next to the task's result, including when the task failed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::context::EffectEnv;
use crate::core::outcome::StageResult;
use crate::core::task::{Task, TaskDefinition};
use crate::core::types::{ConditionalSummary, RunSummary};
use crate::effects::restore_on_unwind;

/// Per-stage bookkeeping recorded after the stage completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetadata {
    pub index: usize,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Accumulated history and metadata of one scoped call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    /// Stage names in execution order, one entry per execution.
    pub history: Vec<String>,
    /// Latest metadata per stage name; a recurring name overwrites its entry.
    pub metadata: BTreeMap<String, StageMetadata>,
}

impl StageState {
    pub fn record_started(&mut self, stage: &str) {
        self.history.push(stage.to_string());
    }

    pub fn record_finished(&mut self, stage: &str, index: usize, success: bool) {
        self.metadata.insert(
            stage.to_string(),
            StageMetadata {
                index,
                success,
                timestamp: Utc::now(),
            },
        );
    }
}

/// Snapshot returned by a scoped run: accumulated state plus the task result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopedRun<T> {
    pub history: Vec<String>,
    pub metadata: BTreeMap<String, StageMetadata>,
    pub result: StageResult<T>,
}

impl<T> ScopedRun<T> {
    pub fn new(state: StageState, result: StageResult<T>) -> Self {
        Self {
            history: state.history,
            metadata: state.metadata,
            result,
        }
    }
}

/// Scope that threads a fresh [`StageState`] through one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateAccumulator;

impl StateAccumulator {
    pub fn new() -> Self {
        Self
    }

    /// Run `body` with a fresh accumulator and return it with the body's value.
    ///
    /// An enclosing accumulator is set aside for the call and restored after.
    pub fn within<T>(
        &self,
        env: &mut EffectEnv,
        body: impl FnOnce(&mut EffectEnv) -> T,
    ) -> (StageState, T) {
        let outer = env.state.replace(StageState::default());
        let mut collected = None;
        let value = restore_on_unwind(env, body, |env| {
            collected = env.state.take();
            env.state = outer;
        });
        (collected.unwrap_or_default(), value)
    }

    /// Run a task-shaped body in a fresh environment and snapshot the result.
    pub fn scoped<T>(
        &self,
        body: impl FnOnce(&mut EffectEnv) -> StageResult<T>,
    ) -> ScopedRun<T> {
        let (state, result) = self.within(&mut EffectEnv::new(), body);
        ScopedRun::new(state, result)
    }

    pub fn run_scoped<D: TaskDefinition>(&self, task: &mut Task<D>) -> ScopedRun<RunSummary> {
        self.scoped(|env| task.run_in(env))
    }

    pub fn run_conditional_scoped<D: TaskDefinition>(
        &self,
        task: &mut Task<D>,
    ) -> ScopedRun<ConditionalSummary> {
        self.scoped(|env| task.run_conditional_in(env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recurring_names_append_history_and_overwrite_metadata() {
        let mut state = StageState::default();
        state.record_started("a");
        state.record_finished("a", 0, false);
        state.record_started("a");
        state.record_finished("a", 2, true);

        assert_eq!(state.history, vec!["a", "a"]);
        assert_eq!(state.metadata.len(), 1);
        assert_eq!(state.metadata["a"].index, 2);
        assert!(state.metadata["a"].success);
    }

    #[test]
    fn nested_scope_starts_fresh_and_restores_outer() {
        let accumulator = StateAccumulator::new();
        let mut env = EffectEnv::new();

        let (outer, inner) = accumulator.within(&mut env, |env| {
            env.state_mut().expect("outer state").record_started("outer");
            let (inner, ()) = accumulator.within(env, |env| {
                assert!(env.state().expect("inner state").history.is_empty());
                env.state_mut().expect("inner state").record_started("inner");
            });
            env.state_mut().expect("outer state").record_started("outer-again");
            inner
        });

        assert_eq!(inner.history, vec!["inner"]);
        assert_eq!(outer.history, vec!["outer", "outer-again"]);
        assert!(env.state().is_none());
    }
}
