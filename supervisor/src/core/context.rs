//! Explicit effect environment threaded through stage execution.
//!
//! Instead of ambient global state, every task run carries an [`EffectEnv`] by
//! `&mut`. Scopes (see `crate::effects`) install their context into the
//! environment for the duration of one call and restore the enclosing context
//! when the call returns. Stage code reads the active contexts through the
//! [`StageContext`] it receives.

use std::any::Any;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::effects::resolve::{Capability, Dependencies, LogLevel, Logger, NullLogger};
use crate::effects::state::StageState;

/// Task-level data shared by every stage of a task.
pub type TaskData = Map<String, Value>;

/// The set of scope contexts active for the current call.
#[derive(Debug, Default)]
pub struct EffectEnv {
    pub(crate) state: Option<StageState>,
    pub(crate) dependencies: Option<Dependencies>,
}

impl EffectEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active accumulator, if a state scope encloses the call.
    pub fn state(&self) -> Option<&StageState> {
        self.state.as_ref()
    }

    pub fn state_mut(&mut self) -> Option<&mut StageState> {
        self.state.as_mut()
    }

    /// Active dependencies, if a resolver scope encloses the call.
    pub fn dependencies(&self) -> Option<&Dependencies> {
        self.dependencies.as_ref()
    }
}

static NULL_LOGGER: NullLogger = NullLogger;

/// View of the task and the active scopes handed to stage code.
pub struct StageContext<'a> {
    stage_name: &'a str,
    index: usize,
    capabilities: &'a [Capability],
    task_data: &'a mut TaskData,
    env: &'a mut EffectEnv,
}

impl<'a> StageContext<'a> {
    pub fn new(
        stage_name: &'a str,
        index: usize,
        capabilities: &'a [Capability],
        task_data: &'a mut TaskData,
        env: &'a mut EffectEnv,
    ) -> Self {
        Self {
            stage_name,
            index,
            capabilities,
            task_data,
            env,
        }
    }

    pub fn stage_name(&self) -> &str {
        self.stage_name
    }

    /// Position of the stage within the task's sequence.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn task_data(&self) -> &TaskData {
        &*self.task_data
    }

    pub fn task_data_mut(&mut self) -> &mut TaskData {
        &mut *self.task_data
    }

    pub fn state(&self) -> Option<&StageState> {
        self.env.state()
    }

    pub fn state_mut(&mut self) -> Option<&mut StageState> {
        self.env.state_mut()
    }

    /// The environment itself, for starting nested scopes from stage code.
    pub fn env(&mut self) -> &mut EffectEnv {
        &mut *self.env
    }

    pub fn declares(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    fn resolved(&self, capability: Capability) -> Option<&Dependencies> {
        if !self.declares(capability) {
            return None;
        }
        self.env.dependencies()
    }

    /// Resolve the logger. `None` unless declared by the stage and provided.
    pub fn logger(&self) -> Option<&dyn Logger> {
        self.resolved(Capability::Logger)?.logger()
    }

    /// Resolve the repository as a concrete type.
    pub fn repository<R: Any>(&self) -> Option<&R> {
        self.resolved(Capability::Repository)?.repository::<R>()
    }

    pub fn repository_handle(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.resolved(Capability::Repository)?
            .repository_handle()
            .cloned()
    }

    pub fn config(&self) -> Option<&Value> {
        self.resolved(Capability::Config)?.config()
    }

    /// Log through the resolved logger as `"[<stage name>] <message>"`.
    ///
    /// No-op when no logger resolves.
    pub fn log(&self, message: &str, level: LogLevel) {
        let logger = self.logger().unwrap_or(&NULL_LOGGER);
        let line = format!("[{}] {}", self.stage_name, message);
        match level {
            LogLevel::Debug => logger.debug(&line),
            LogLevel::Info => logger.info(&line),
            LogLevel::Warn => logger.warn(&line),
            LogLevel::Error => logger.error(&line),
        }
    }

    pub fn info(&self, message: &str) {
        self.log(message, LogLevel::Info);
    }
}
