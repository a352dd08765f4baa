//! Sequential task supervisor.
//!
//! A task owns an ordered list of stages; each stage yields a success payload
//! or a failure, and the task stops at the first failure. The crate is split
//! into:
//!
//! - **[`core`]**: the stage state machine and task orchestration. Pure
//!   sequencing logic, no I/O.
//! - **[`effects`]**: scopes that expose accumulated history/metadata and
//!   injected capabilities (logger, repository, configuration) to stage code
//!   through an explicit environment instead of global state.
//! - **[`io`]**: configuration file handling.
//!
//! ```
//! use serde_json::json;
//! use supervisor::core::context::StageContext;
//! use supervisor::core::outcome::StageResult;
//! use supervisor::core::stage::StageBehavior;
//! use supervisor::core::task::{StageSpec, Task};
//!
//! #[derive(Clone)]
//! struct Greet;
//!
//! impl StageBehavior for Greet {
//!     fn perform_work(&mut self, _ctx: &mut StageContext<'_>) -> StageResult {
//!         Ok(json!("hello"))
//!     }
//! }
//!
//! let mut task = Task::new().with_stage(StageSpec::instance(Greet));
//! let summary = task.run().expect("run");
//! assert_eq!(summary.completed, vec!["greet"]);
//! ```

pub mod core;
pub mod effects;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use crate::core::context::{EffectEnv, StageContext, TaskData};
pub use crate::core::outcome::{StageError, StageResult, StageValue};
pub use crate::core::stage::{Stage, StageBehavior};
pub use crate::core::task::{StageList, StageSpec, Task, TaskDefinition};
pub use crate::core::types::{ConditionalSummary, RunSummary};
pub use crate::effects::resolve::{
    Capability, Dependencies, DependencyResolver, LogLevel, Logger, NullLogger, TracingLogger,
};
pub use crate::effects::runner::{ScopeOrder, TaskRunner};
pub use crate::effects::state::{ScopedRun, StageMetadata, StageState, StateAccumulator};
pub use crate::io::config::SupervisorConfig;
