//! Dependency resolution scope.
//!
//! A [`DependencyResolver`] makes a fixed set of capabilities (logger,
//! repository, configuration) resolvable by stage code for the duration of one
//! call. Stages opt in per capability through
//! [`StageBehavior::capabilities`](crate::core::stage::StageBehavior::capabilities);
//! anything not declared resolves to `None`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::core::context::EffectEnv;
use crate::core::outcome::StageResult;
use crate::core::task::{Task, TaskDefinition};
use crate::core::types::{ConditionalSummary, RunSummary};
use crate::effects::restore_on_unwind;

/// Named capability a stage may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Logger,
    Repository,
    Config,
}

impl Capability {
    pub const ALL: &'static [Capability] =
        &[Capability::Logger, Capability::Repository, Capability::Config];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Logger capability consumed by stages.
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Sentinel logger used when none is supplied. Every call is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn debug(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Logger that forwards stage messages as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        debug!(target: "supervisor::stage", "{message}");
    }

    fn info(&self, message: &str) {
        info!(target: "supervisor::stage", "{message}");
    }

    fn warn(&self, message: &str) {
        warn!(target: "supervisor::stage", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "supervisor::stage", "{message}");
    }
}

/// Capabilities visible inside a resolver scope.
///
/// Each slot is optional so that nested scopes can shadow only what they set.
#[derive(Clone, Default)]
pub struct Dependencies {
    logger: Option<Arc<dyn Logger>>,
    repository: Option<Arc<dyn Any + Send + Sync>>,
    config: Option<Value>,
}

impl Dependencies {
    pub fn logger(&self) -> Option<&dyn Logger> {
        self.logger.as_deref()
    }

    pub fn repository<R: Any>(&self) -> Option<&R> {
        self.repository.as_deref()?.downcast_ref::<R>()
    }

    pub fn repository_handle(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.repository.as_ref()
    }

    pub fn config(&self) -> Option<&Value> {
        self.config.as_ref()
    }

    /// Layer `inner` over `self`: inner values win, unset inner slots fall
    /// back to the outer ones.
    pub fn shadowed_by(&self, inner: &Dependencies) -> Dependencies {
        Dependencies {
            logger: inner.logger.clone().or_else(|| self.logger.clone()),
            repository: inner.repository.clone().or_else(|| self.repository.clone()),
            config: inner.config.clone().or_else(|| self.config.clone()),
        }
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("logger", &self.logger.is_some())
            .field("repository", &self.repository.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// Scope that provides [`Dependencies`] to every stage run inside it.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    dependencies: Dependencies,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyResolver {
    /// A resolver with no logger, no repository, and an empty configuration.
    pub fn new() -> Self {
        Self {
            dependencies: Dependencies {
                logger: None,
                repository: None,
                config: Some(json!({})),
            },
        }
    }

    /// A resolver that sets nothing, so every slot inherits from an enclosing
    /// resolver.
    pub fn inheriting() -> Self {
        Self {
            dependencies: Dependencies::default(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.dependencies.logger = Some(logger);
        self
    }

    pub fn with_repository<R: Any + Send + Sync>(mut self, repository: R) -> Self {
        self.dependencies.repository = Some(Arc::new(repository));
        self
    }

    pub fn with_repository_handle(mut self, repository: Arc<dyn Any + Send + Sync>) -> Self {
        self.dependencies.repository = Some(repository);
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.dependencies.config = Some(config);
        self
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    /// Run `body` with this resolver's dependencies active in `env`.
    ///
    /// Values shadow those of an enclosing resolver only until `body` returns.
    pub fn within<T>(&self, env: &mut EffectEnv, body: impl FnOnce(&mut EffectEnv) -> T) -> T {
        let outer = env.dependencies.take();
        let active = match &outer {
            Some(enclosing) => enclosing.shadowed_by(&self.dependencies),
            None => self.dependencies.clone(),
        };
        env.dependencies = Some(active);
        restore_on_unwind(env, body, |env| env.dependencies = outer)
    }

    pub fn run_scoped<D: TaskDefinition>(&self, task: &mut Task<D>) -> StageResult<RunSummary> {
        self.within(&mut EffectEnv::new(), |env| task.run_in(env))
    }

    pub fn run_conditional_scoped<D: TaskDefinition>(
        &self,
        task: &mut Task<D>,
    ) -> StageResult<ConditionalSummary> {
        self.within(&mut EffectEnv::new(), |env| task.run_conditional_in(env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingLogger;

    #[test]
    fn inner_values_shadow_and_unset_slots_inherit() {
        let outer = DependencyResolver::new()
            .with_repository(7_u32)
            .with_config(json!({"timeout": 30}));
        let inner = DependencyResolver::inheriting().with_config(json!({"timeout": 5}));

        let mut env = EffectEnv::new();
        outer.within(&mut env, |env| {
            inner.within(env, |env| {
                let deps = env.dependencies().expect("deps");
                assert_eq!(deps.config(), Some(&json!({"timeout": 5})));
                assert_eq!(deps.repository::<u32>(), Some(&7));
            });
            let deps = env.dependencies().expect("deps");
            assert_eq!(deps.config(), Some(&json!({"timeout": 30})));
        });
        assert!(env.dependencies().is_none());
    }

    #[test]
    fn repository_downcast_to_wrong_type_is_none() {
        let resolver = DependencyResolver::new().with_repository("repo".to_string());
        assert!(resolver.dependencies().repository::<u32>().is_none());
        assert_eq!(
            resolver.dependencies().repository::<String>().map(String::as_str),
            Some("repo")
        );
    }

    #[test]
    fn scope_is_restored_after_a_panicking_body() {
        let logger = Arc::new(RecordingLogger::default());
        let resolver = DependencyResolver::new().with_logger(logger);
        let mut env = EffectEnv::new();

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            resolver.within::<()>(&mut env, |_| panic!("inside scope"));
        }));

        assert!(caught.is_err());
        assert!(env.dependencies().is_none());
    }
}
