//! Sequential task orchestration.
//!
//! A [`Task`] asks its [`TaskDefinition`] for an ordered list of
//! [`StageSpec`]s, instantiates one fresh [`Stage`] per spec, and executes them
//! in order. The first failing stage short-circuits the run and its failure
//! becomes the task's result. Conditional runs let the definition pick the next
//! index after each successful stage.
//!
//! When a state scope is active in the environment, every run records the
//! stage name before its work and the stage metadata after it.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::context::{EffectEnv, TaskData};
use crate::core::outcome::{StageError, StageResult, StageValue};
use crate::core::stage::{Stage, StageBehavior};
use crate::core::types::{ConditionalSummary, RunSummary};
use crate::io::config::SupervisorConfig;

type StageFactory = dyn Fn() -> Box<dyn StageBehavior>;

/// Recipe for one position in a task's stage sequence.
///
/// Each run instantiates a new stage from the spec, so objects from a previous
/// run are never reused.
#[derive(Clone)]
pub struct StageSpec {
    factory: Rc<StageFactory>,
    name: Option<String>,
}

impl StageSpec {
    pub fn factory<B, F>(factory: F) -> Self
    where
        B: StageBehavior + 'static,
        F: Fn() -> B + 'static,
    {
        Self {
            factory: Rc::new(move || Box::new(factory()) as Box<dyn StageBehavior>),
            name: None,
        }
    }

    /// Spec that clones `prototype` for every run.
    pub fn instance<B>(prototype: B) -> Self
    where
        B: StageBehavior + Clone + 'static,
    {
        Self::factory(move || prototype.clone())
    }

    /// Override the name of every stage built from this spec.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn instantiate(&self) -> Stage {
        let stage = Stage::from_boxed((self.factory)());
        match &self.name {
            Some(name) => stage.with_name(name.clone()),
            None => stage,
        }
    }
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Task extension interface.
pub trait TaskDefinition {
    /// The ordered stage sequence. There is no default sequence.
    fn stage_sequence(&self) -> StageResult<Vec<StageSpec>>;

    /// Index of the stage to run after `current_index` succeeded with `value`,
    /// or `None` to end a conditional run. Defaults to the next index.
    fn determine_next_stage(
        &self,
        _value: &StageValue,
        current_index: usize,
        stage_count: usize,
    ) -> Option<usize> {
        let next = current_index + 1;
        (next < stage_count).then_some(next)
    }
}

/// Definition backed by an explicit list built with [`Task::add_stage`].
///
/// A list that was never given any stage has no sequence at all, which is
/// distinct from an explicitly empty one.
#[derive(Debug, Clone, Default)]
pub struct StageList {
    stages: Option<Vec<StageSpec>>,
}

impl StageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: Vec<StageSpec>) -> Self {
        Self {
            stages: Some(specs),
        }
    }

    pub fn push(&mut self, spec: StageSpec) {
        self.stages.get_or_insert_with(Vec::new).push(spec);
    }
}

impl TaskDefinition for StageList {
    fn stage_sequence(&self) -> StageResult<Vec<StageSpec>> {
        self.stages
            .clone()
            .ok_or_else(StageError::sequence_not_implemented)
    }
}

/// Runner over a stage sequence, holding the state of its latest run.
#[derive(Debug)]
pub struct Task<D = StageList> {
    definition: D,
    config: SupervisorConfig,
    data: TaskData,
    current_index: usize,
    executed_stages: Vec<Stage>,
    results: Vec<StageResult>,
}

impl Task<StageList> {
    pub fn new() -> Self {
        Self::from_definition(StageList::new())
    }

    pub fn with_stages(specs: Vec<StageSpec>) -> Self {
        Self::from_definition(StageList::from_specs(specs))
    }

    pub fn add_stage(&mut self, spec: StageSpec) -> &mut Self {
        self.definition.push(spec);
        self
    }

    pub fn with_stage(mut self, spec: StageSpec) -> Self {
        self.add_stage(spec);
        self
    }
}

impl Default for Task<StageList> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: TaskDefinition> Task<D> {
    pub fn from_definition(definition: D) -> Self {
        Self {
            definition,
            config: SupervisorConfig::default(),
            data: TaskData::new(),
            current_index: 0,
            executed_stages: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn definition(&self) -> &D {
        &self.definition
    }

    pub fn definition_mut(&mut self) -> &mut D {
        &mut self.definition
    }

    /// Data shared by all stages of this task; stages read and write it
    /// through their context.
    pub fn data(&self) -> &TaskData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut TaskData {
        &mut self.data
    }

    pub fn set_data(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn stage_sequence(&self) -> StageResult<Vec<StageSpec>> {
        self.definition.stage_sequence()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn executed_stages(&self) -> &[Stage] {
        &self.executed_stages
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn run(&mut self) -> StageResult<RunSummary> {
        self.run_in(&mut EffectEnv::new())
    }

    /// Run every stage in order inside the scopes active in `env`.
    #[instrument(skip_all, fields(mode = "linear"))]
    pub fn run_in(&mut self, env: &mut EffectEnv) -> StageResult<RunSummary> {
        self.reset();
        let specs = self.definition.stage_sequence()?;
        info!(stages = specs.len(), "task run started");

        for (index, spec) in specs.iter().enumerate() {
            self.current_index = index;
            if let Err(err) = self.execute_spec(spec, index, env) {
                warn!(index, error = %err, "task stopped at failing stage");
                return Err(err);
            }
        }

        let completed: Vec<String> = self
            .executed_stages
            .iter()
            .map(|stage| stage.name().to_string())
            .collect();
        info!(completed = completed.len(), "task run completed");
        Ok(RunSummary {
            completed,
            total_stages: specs.len(),
        })
    }

    pub fn run_conditional(&mut self) -> StageResult<ConditionalSummary> {
        self.run_conditional_in(&mut EffectEnv::new())
    }

    /// Run stages starting at index 0, following
    /// [`TaskDefinition::determine_next_stage`] after each success.
    ///
    /// A next index outside the sequence ends the run like `None`.
    #[instrument(skip_all, fields(mode = "conditional"))]
    pub fn run_conditional_in(&mut self, env: &mut EffectEnv) -> StageResult<ConditionalSummary> {
        self.reset();
        let specs = self.definition.stage_sequence()?;
        let stage_count = specs.len();
        info!(stages = stage_count, "conditional task run started");

        let mut next = (stage_count > 0).then_some(0);
        while let Some(index) = next {
            if let Some(limit) = self.config.max_conditional_steps {
                if self.results.len() >= limit {
                    warn!(limit, "conditional run exceeded its step limit");
                    return Err(StageError::new(format!(
                        "conditional run exceeded {limit} stage executions"
                    ))
                    .with_detail("index", index));
                }
            }

            self.current_index = index;
            let value = match self.execute_spec(&specs[index], index, env) {
                Ok(value) => value,
                Err(err) => {
                    warn!(index, error = %err, "task stopped at failing stage");
                    return Err(err);
                }
            };

            next = self
                .definition
                .determine_next_stage(&value, index, stage_count)
                .filter(|candidate| {
                    let in_range = *candidate < stage_count;
                    if !in_range {
                        warn!(next = *candidate, stage_count, "next stage out of range; ending run");
                    }
                    in_range
                });
        }

        let final_stage = self
            .executed_stages
            .last()
            .map(|stage| stage.name().to_string());
        info!(executed = self.results.len(), ?final_stage, "conditional task run completed");
        Ok(ConditionalSummary {
            final_stage,
            executed_stages: self.results.len(),
        })
    }

    fn execute_spec(
        &mut self,
        spec: &StageSpec,
        index: usize,
        env: &mut EffectEnv,
    ) -> StageResult {
        let mut stage = spec
            .instantiate()
            .with_backtrace_frames(self.config.backtrace_frames);
        if let Some(state) = env.state_mut() {
            state.record_started(stage.name());
        }

        let outcome = stage.execute_in(index, &mut self.data, env).clone();

        if let Some(state) = env.state_mut() {
            state.record_finished(stage.name(), index, outcome.is_ok());
        }
        self.executed_stages.push(stage);
        self.results.push(outcome.clone());
        outcome
    }

    pub fn successful_results(&self) -> Vec<&StageResult> {
        self.results.iter().filter(|r| r.is_ok()).collect()
    }

    pub fn failed_results(&self) -> Vec<&StageResult> {
        self.results.iter().filter(|r| r.is_err()).collect()
    }

    pub fn all_successful(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(Result::is_ok)
    }

    pub fn any_failed(&self) -> bool {
        self.results.iter().any(Result::is_err)
    }

    /// Reset every executed stage and clear the run state. Idempotent.
    pub fn reset(&mut self) {
        for stage in &mut self.executed_stages {
            stage.reset();
        }
        self.executed_stages.clear();
        self.results.clear();
        self.current_index = 0;
    }
}
