//! Combined scope: state accumulation and dependency resolution around one
//! task invocation.

use crate::core::context::EffectEnv;
use crate::core::outcome::StageResult;
use crate::core::task::{Task, TaskDefinition};
use crate::core::types::{ConditionalSummary, RunSummary};
use crate::effects::resolve::DependencyResolver;
use crate::effects::state::{ScopedRun, StateAccumulator};

/// Which scope encloses the other. Both orders expose both contexts to stage
/// code; the order only matters for code that inspects the environment
/// between the two scope boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScopeOrder {
    #[default]
    StateOutermost,
    DependenciesOutermost,
}

#[derive(Debug, Clone, Default)]
pub struct TaskRunner {
    resolver: DependencyResolver,
    accumulator: StateAccumulator,
    order: ScopeOrder,
}

impl TaskRunner {
    pub fn new(resolver: DependencyResolver) -> Self {
        Self {
            resolver,
            accumulator: StateAccumulator::new(),
            order: ScopeOrder::default(),
        }
    }

    pub fn with_order(mut self, order: ScopeOrder) -> Self {
        self.order = order;
        self
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    /// Enter both scopes inside `env` and run `body`.
    pub fn within<T>(
        &self,
        env: &mut EffectEnv,
        body: impl FnOnce(&mut EffectEnv) -> StageResult<T>,
    ) -> ScopedRun<T> {
        let (state, result) = match self.order {
            ScopeOrder::StateOutermost => self
                .accumulator
                .within(env, |env| self.resolver.within(env, body)),
            ScopeOrder::DependenciesOutermost => self
                .resolver
                .within(env, |env| self.accumulator.within(env, body)),
        };
        ScopedRun::new(state, result)
    }

    pub fn scoped<T>(&self, body: impl FnOnce(&mut EffectEnv) -> StageResult<T>) -> ScopedRun<T> {
        self.within(&mut EffectEnv::new(), body)
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
