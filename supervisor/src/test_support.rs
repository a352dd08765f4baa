//! Test-only helpers: scripted stages and a recording logger.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Mutex;

use serde_json::Value;

use crate::core::context::StageContext;
use crate::core::outcome::{StageError, StageResult};
use crate::core::stage::StageBehavior;
use crate::core::task::StageSpec;
use crate::effects::resolve::{LogLevel, Logger};

/// Stage with a fixed name that returns a predetermined outcome from its work.
///
/// Clones share the work counter, so a spec built from one prototype reports
/// calls across every instance it produced.
#[derive(Debug, Clone)]
pub struct ScriptedStage {
    name: String,
    outcome: StageResult,
    work_calls: Rc<Cell<usize>>,
}

impl ScriptedStage {
    pub fn ok(name: &str, value: Value) -> Self {
        Self::with_outcome(name, Ok(value))
    }

    pub fn err(name: &str, error: StageError) -> Self {
        Self::with_outcome(name, Err(error))
    }

    pub fn with_outcome(name: &str, outcome: StageResult) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            work_calls: Rc::new(Cell::new(0)),
        }
    }

    /// Shared counter of `perform_work` calls.
    pub fn work_calls(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.work_calls)
    }
}

impl StageBehavior for ScriptedStage {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn perform_work(&mut self, _ctx: &mut StageContext<'_>) -> StageResult {
        self.work_calls.set(self.work_calls.get() + 1);
        self.outcome.clone()
    }
}

/// Spec for a stage that succeeds with `value`.
pub fn ok_stage(name: &str, value: Value) -> StageSpec {
    StageSpec::instance(ScriptedStage::ok(name, value))
}

/// Spec for a stage that fails with `message`, without naming itself in the
/// failure.
pub fn failing_stage(name: &str, message: &str) -> StageSpec {
    StageSpec::instance(ScriptedStage::err(name, StageError::new(message)))
}

/// Spec that counts how many stages it instantiated.
pub fn counted(stage: ScriptedStage, instantiated: &Rc<Cell<usize>>) -> StageSpec {
    let instantiated = Rc::clone(instantiated);
    StageSpec::factory(move || {
        instantiated.set(instantiated.get() + 1);
        stage.clone()
    })
}

/// Logger that records every call with its level.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingLogger {
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries.lock().expect("logger lock").clone()
    }

    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(recorded, _)| *recorded == level)
            .map(|(_, message)| message)
            .collect()
    }

    fn record(&self, level: LogLevel, message: &str) {
        self.entries
            .lock()
            .expect("logger lock")
            .push((level, message.to_string()));
    }
}

impl Logger for RecordingLogger {
    fn debug(&self, message: &str) {
        self.record(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.record(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.record(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.record(LogLevel::Error, message);
    }
}
