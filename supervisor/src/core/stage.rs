//! A single unit of work and its execution state machine.
//!
//! [`StageBehavior`] is the extension interface implemented by stage authors.
//! [`Stage`] wraps a behavior with its name and last outcome and runs the
//! three-phase protocol: preconditions, work, failure recovery. Panics raised
//! by behavior code are captured and stored as failures.
//!
//! State machine: `NotRun --execute--> Ran(Ok | Err)`, `Ran --reset--> NotRun`.
//! Executing again re-runs the protocol and overwrites the stored outcome.

use std::fmt;

use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::core::context::{EffectEnv, StageContext, TaskData};
use crate::core::fault;
use crate::core::outcome::{StageError, StageResult, StageValue};
use crate::effects::resolve::Capability;

pub const DEFAULT_BACKTRACE_FRAMES: usize = 5;

/// Behavior of a stage. Every method has a default; override what you need.
pub trait StageBehavior {
    /// Stage name. Defaults to the implementing type's name, lowercased.
    fn name(&self) -> String {
        default_stage_name::<Self>()
    }

    /// Capabilities this stage resolves from an enclosing resolver scope.
    fn capabilities(&self) -> &[Capability] {
        &[]
    }

    fn preconditions_met(&self, _ctx: &StageContext<'_>) -> bool {
        true
    }

    fn validate_preconditions(&self, ctx: &StageContext<'_>) -> StageResult<()> {
        if self.preconditions_met(ctx) {
            Ok(())
        } else {
            Err(StageError::preconditions_not_met(ctx.stage_name()))
        }
    }

    fn perform_work(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        Ok(json!({"data": "completed", "stage": ctx.stage_name()}))
    }

    fn recoverable(&self, _error: &StageError) -> bool {
        false
    }

    /// Recovery attempt for recoverable failures. No retry policy by default.
    fn retry_with_backoff(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        Err(StageError::retry_not_implemented(ctx.stage_name()))
    }

    fn handle_failure(&mut self, error: StageError, ctx: &mut StageContext<'_>) -> StageResult {
        if self.recoverable(&error) {
            self.retry_with_backoff(ctx)
        } else {
            Err(error)
        }
    }
}

/// Lowercased last path segment of `T`'s type name, without generics.
pub fn default_stage_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_lowercase()
}

/// A behavior plus its execution state.
pub struct Stage {
    name: String,
    behavior: Box<dyn StageBehavior>,
    result: Option<StageResult>,
    backtrace_frames: usize,
}

impl Stage {
    pub fn new(behavior: impl StageBehavior + 'static) -> Self {
        Self::from_boxed(Box::new(behavior))
    }

    pub fn from_boxed(behavior: Box<dyn StageBehavior>) -> Self {
        Self {
            name: behavior.name(),
            behavior,
            result: None,
            backtrace_frames: DEFAULT_BACKTRACE_FRAMES,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of frames kept in the backtrace of a captured fault.
    pub fn with_backtrace_frames(mut self, frames: usize) -> Self {
        self.backtrace_frames = frames;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn result(&self) -> Option<&StageResult> {
        self.result.as_ref()
    }

    /// Execute outside any task or scope.
    pub fn execute(&mut self) -> &StageResult {
        self.execute_in(0, &mut TaskData::new(), &mut EffectEnv::new())
    }

    /// Execute as stage `index` of a task, with the task's data and the
    /// scopes active in `env`. Never panics on behalf of the behavior.
    #[instrument(skip_all, fields(stage = %self.name, index = index))]
    pub fn execute_in(
        &mut self,
        index: usize,
        task_data: &mut TaskData,
        env: &mut EffectEnv,
    ) -> &StageResult {
        debug!("stage started");
        let outcome = self.run_protocol(index, task_data, env);
        match &outcome {
            Ok(_) => debug!("stage succeeded"),
            Err(err) => warn!(error = %err, fault = err.is_fault(), "stage failed"),
        }
        self.result.insert(outcome)
    }

    fn run_protocol(
        &mut self,
        index: usize,
        task_data: &mut TaskData,
        env: &mut EffectEnv,
    ) -> StageResult {
        let capabilities = self.behavior.capabilities().to_vec();
        let frames = self.backtrace_frames;
        let name = self.name.as_str();
        let behavior = &mut self.behavior;

        let attempt = fault::catch(frames, || -> StageResult {
            let mut ctx = StageContext::new(name, index, &capabilities, task_data, env);
            behavior.validate_preconditions(&ctx)?;
            match behavior.perform_work(&mut ctx) {
                Ok(value) => Ok(value),
                Err(err) => behavior.handle_failure(err, &mut ctx),
            }
        });

        attempt.unwrap_or_else(|caught| {
            Err(StageError::fault(name, caught.message, Some(caught.backtrace)))
        })
    }

    pub fn performed(&self) -> bool {
        self.result.is_some()
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.result, Some(Ok(_)))
    }

    pub fn failed(&self) -> bool {
        matches!(self.result, Some(Err(_)))
    }

    pub fn value(&self) -> Option<&StageValue> {
        self.result.as_ref()?.as_ref().ok()
    }

    pub fn error(&self) -> Option<&StageError> {
        self.result.as_ref()?.as_ref().err()
    }

    /// Return to the not-run state. Idempotent.
    pub fn reset(&mut self) {
        self.result = None;
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("result", &self.result)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::core::outcome::{PRECONDITIONS_NOT_MET, RETRY_NOT_IMPLEMENTED};

    struct FetchData;

    impl StageBehavior for FetchData {}

    struct Gated {
        open: bool,
        work_calls: Rc<Cell<usize>>,
    }

    impl StageBehavior for Gated {
        fn name(&self) -> String {
            "gated".to_string()
        }

        fn preconditions_met(&self, _ctx: &StageContext<'_>) -> bool {
            self.open
        }

        fn perform_work(&mut self, _ctx: &mut StageContext<'_>) -> StageResult {
            self.work_calls.set(self.work_calls.get() + 1);
            Ok(json!("ran"))
        }
    }

    struct Flaky {
        recoverable: bool,
        retry: Option<StageResult>,
    }

    impl StageBehavior for Flaky {
        fn name(&self) -> String {
            "flaky".to_string()
        }

        fn perform_work(&mut self, _ctx: &mut StageContext<'_>) -> StageResult {
            Err(StageError::new("timeout").with_detail("attempt", 1))
        }

        fn recoverable(&self, _error: &StageError) -> bool {
            self.recoverable
        }

        fn retry_with_backoff(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
            match self.retry.take() {
                Some(outcome) => outcome,
                None => Err(StageError::retry_not_implemented(ctx.stage_name())),
            }
        }
    }

    struct Exploding;

    impl StageBehavior for Exploding {
        fn perform_work(&mut self, _ctx: &mut StageContext<'_>) -> StageResult {
            ignite()
        }
    }

    #[inline(never)]
    fn ignite() -> StageResult {
        panic!("disk on fire");
    }

    struct BrokenGate;

    impl StageBehavior for BrokenGate {
        fn preconditions_met(&self, _ctx: &StageContext<'_>) -> bool {
            panic!("gate sensor offline");
        }
    }

    struct BrokenRetry;

    impl StageBehavior for BrokenRetry {
        fn perform_work(&mut self, _ctx: &mut StageContext<'_>) -> StageResult {
            Err(StageError::new("timeout"))
        }

        fn recoverable(&self, _error: &StageError) -> bool {
            true
        }

        fn retry_with_backoff(&mut self, _ctx: &mut StageContext<'_>) -> StageResult {
            panic!("backoff clock missing");
        }
    }

    #[test]
    fn default_name_is_lowercased_type_name() {
        assert_eq!(Stage::new(FetchData).name(), "fetchdata");
        assert_eq!(Stage::new(FetchData).with_name("fetch").name(), "fetch");
    }

    #[test]
    fn not_run_stage_reports_nothing() {
        let stage = Stage::new(FetchData);
        assert!(!stage.performed());
        assert!(!stage.succeeded());
        assert!(!stage.failed());
        assert!(stage.value().is_none());
        assert!(stage.error().is_none());
    }

    #[test]
    fn default_work_returns_completed_payload() {
        let mut stage = Stage::new(FetchData);
        stage.execute();
        assert!(stage.performed());
        assert!(stage.succeeded());
        assert!(!stage.failed());
        assert_eq!(
            stage.value(),
            Some(&json!({"data": "completed", "stage": "fetchdata"}))
        );
        assert!(stage.error().is_none());
    }

    #[test]
    fn unmet_preconditions_skip_work() {
        let work_calls = Rc::new(Cell::new(0));
        let mut stage = Stage::new(Gated {
            open: false,
            work_calls: Rc::clone(&work_calls),
        });

        let outcome = stage.execute().clone();

        assert_eq!(outcome, Err(StageError::preconditions_not_met("gated")));
        assert_eq!(stage.error().map(|e| e.error.as_str()), Some(PRECONDITIONS_NOT_MET));
        assert_eq!(work_calls.get(), 0);
    }

    #[test]
    fn met_preconditions_run_work() {
        let work_calls = Rc::new(Cell::new(0));
        let mut stage = Stage::new(Gated {
            open: true,
            work_calls: Rc::clone(&work_calls),
        });
        assert_eq!(stage.execute(), &Ok(json!("ran")));
        assert_eq!(work_calls.get(), 1);
    }

    #[test]
    fn unrecoverable_failure_is_returned_unchanged() {
        let mut stage = Stage::new(Flaky {
            recoverable: false,
            retry: None,
        });
        let expected = StageError::new("timeout").with_detail("attempt", 1);
        assert_eq!(stage.execute(), &Err(expected));
    }

    #[test]
    fn recoverable_failure_without_retry_policy_fails_inertly() {
        let mut stage = Stage::new(Flaky {
            recoverable: true,
            retry: None,
        });
        let err = stage.execute().clone().expect_err("should fail");
        assert_eq!(err.error, RETRY_NOT_IMPLEMENTED);
        assert_eq!(err.stage.as_deref(), Some("flaky"));
    }

    #[test]
    fn recoverable_failure_uses_retry_outcome() {
        let mut stage = Stage::new(Flaky {
            recoverable: true,
            retry: Some(Ok(json!({"recovered": true}))),
        });
        assert_eq!(stage.execute(), &Ok(json!({"recovered": true})));
    }

    #[test]
    fn panic_is_captured_as_fault() {
        let mut stage = Stage::new(Exploding).with_backtrace_frames(3);
        let err = stage.execute().clone().expect_err("panic captured");

        assert_eq!(err.error, "disk on fire");
        assert_eq!(err.stage.as_deref(), Some("exploding"));
        assert!(err.is_fault());
        let frames = err.backtrace.expect("fault backtrace");
        assert!(!frames.is_empty() && frames.len() <= 3, "frames: {frames:?}");
        assert!(frames[0].contains("ignite"), "frames: {frames:?}");
        assert!(stage.failed());
    }

    #[test]
    fn panic_in_preconditions_is_captured_as_fault() {
        let mut stage = Stage::new(BrokenGate);
        let err = stage.execute().clone().expect_err("panic captured");

        assert!(err.is_fault());
        assert_eq!(err.stage.as_deref(), Some("brokengate"));
        assert_eq!(err.error, "gate sensor offline");
        assert!(err.backtrace.is_some_and(|frames| !frames.is_empty()));
    }

    #[test]
    fn panic_in_retry_is_captured_as_fault() {
        let mut stage = Stage::new(BrokenRetry);
        let err = stage.execute().clone().expect_err("panic captured");

        assert!(err.is_fault());
        assert_eq!(err.stage.as_deref(), Some("brokenretry"));
        assert_eq!(err.error, "backoff clock missing");
        assert!(err.backtrace.is_some_and(|frames| !frames.is_empty()));
    }

    #[test]
    fn reset_is_idempotent_and_safe_before_execution() {
        let mut stage = Stage::new(FetchData);
        stage.reset();
        assert!(!stage.performed());

        stage.execute();
        stage.reset();
        stage.reset();
        assert!(!stage.performed());
        assert!(stage.result().is_none());
    }

    #[test]
    fn execute_twice_reruns_work() {
        let work_calls = Rc::new(Cell::new(0));
        let mut stage = Stage::new(Gated {
            open: true,
            work_calls: Rc::clone(&work_calls),
        });
        stage.execute();
        stage.execute();
        assert_eq!(work_calls.get(), 2);
        assert!(stage.succeeded());
    }
}
