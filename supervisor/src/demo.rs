//! Demonstration pipelines run by the `supervisor` binary.

use std::sync::Mutex;

use serde_json::{Value, json};
use supervisor::{
    Capability, LogLevel, StageBehavior, StageContext, StageError, StageList, StageResult,
    StageSpec, StageValue, SupervisorConfig, Task, TaskDefinition,
};

#[derive(Debug, Clone)]
pub struct FetchData;

impl StageBehavior for FetchData {
    fn perform_work(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        let users = json!(["Alice", "Bob", "Charlie"]);
        ctx.task_data_mut().insert("users".to_string(), users.clone());
        Ok(json!({ "data": { "users": users } }))
    }
}

#[derive(Debug, Clone)]
pub struct ProcessData;

impl StageBehavior for ProcessData {
    fn preconditions_met(&self, ctx: &StageContext<'_>) -> bool {
        ctx.task_data().contains_key("users")
    }

    fn perform_work(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        let count = ctx
            .task_data()
            .get("users")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let processed = json!({ "processed": true, "count": count });
        ctx.task_data_mut()
            .insert("processed".to_string(), processed.clone());
        Ok(json!({ "data": processed }))
    }
}

#[derive(Debug, Clone)]
pub struct SaveData;

impl StageBehavior for SaveData {
    fn capabilities(&self) -> &[Capability] {
        &[Capability::Repository, Capability::Logger]
    }

    fn perform_work(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        let record = ctx.task_data().get("processed").cloned().unwrap_or(Value::Null);
        let id = match ctx.repository::<MemoryRepository>() {
            Some(repository) => repository.save(record),
            None => 123,
        };
        ctx.info(&format!("saved record {id}"));
        Ok(json!({ "data": { "saved": true, "id": id } }))
    }
}

#[derive(Debug, Clone)]
pub struct RiskyOperation;

impl StageBehavior for RiskyOperation {
    fn perform_work(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        Err(StageError::new("Connection timeout").with_stage(ctx.stage_name()))
    }
}

/// Stage whose work panics on an empty gauge reading.
#[derive(Debug, Clone)]
pub struct ReadGauge;

impl StageBehavior for ReadGauge {
    fn perform_work(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        let readings: Vec<u64> = ctx
            .task_data()
            .get("readings")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default();
        Ok(json!({ "data": { "latest": latest_reading(&readings) } }))
    }
}

#[inline(never)]
fn latest_reading(readings: &[u64]) -> u64 {
    match readings.last() {
        Some(latest) => *latest,
        None => panic!("gauge returned no readings"),
    }
}

/// Stage that logs through the resolved logger and echoes the resolved config.
#[derive(Debug, Clone)]
pub struct AnnouncedStage;

impl StageBehavior for AnnouncedStage {
    fn capabilities(&self) -> &[Capability] {
        Capability::ALL
    }

    fn perform_work(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        ctx.log("starting stage execution", LogLevel::Info);
        let config = ctx.config().cloned().unwrap_or(Value::Null);
        ctx.log("stage execution completed", LogLevel::Debug);
        Ok(json!({ "data": format!("logged {}", ctx.stage_name()), "config": config }))
    }
}

/// Stage whose payload tells the conditional pipeline whether review is needed.
#[derive(Debug, Clone)]
pub struct Triage;

impl StageBehavior for Triage {
    fn perform_work(&mut self, _ctx: &mut StageContext<'_>) -> StageResult {
        Ok(json!({ "needs_review": false }))
    }
}

/// In-memory repository resolved by [`SaveData`].
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: Mutex<Vec<Value>>,
}

impl MemoryRepository {
    fn save(&self, record: Value) -> usize {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(record);
        records.len()
    }
}

/// Conditional pipeline: triage → review → publish, skipping review when
/// triage reports it is not needed.
pub struct ReviewPipeline {
    stages: StageList,
}

impl ReviewPipeline {
    pub const REVIEW: usize = 1;

    pub fn new() -> Self {
        Self {
            stages: StageList::from_specs(vec![
                StageSpec::instance(Triage),
                StageSpec::instance(AnnouncedStage).with_name("review"),
                StageSpec::instance(AnnouncedStage).with_name("publish"),
            ]),
        }
    }
}

impl Default for ReviewPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskDefinition for ReviewPipeline {
    fn stage_sequence(&self) -> StageResult<Vec<StageSpec>> {
        self.stages.stage_sequence()
    }

    fn determine_next_stage(
        &self,
        value: &StageValue,
        current_index: usize,
        stage_count: usize,
    ) -> Option<usize> {
        let mut next = current_index + 1;
        if next == Self::REVIEW && value["needs_review"] == json!(false) {
            next += 1;
        }
        (next < stage_count).then_some(next)
    }
}

pub fn data_pipeline(config: &SupervisorConfig) -> Task {
    Task::new()
        .with_stage(StageSpec::instance(FetchData))
        .with_stage(StageSpec::instance(ProcessData))
        .with_stage(StageSpec::instance(SaveData))
        .with_config(config.clone())
}

pub fn failing_pipeline(config: &SupervisorConfig) -> Task {
    Task::new()
        .with_stage(StageSpec::instance(FetchData))
        .with_stage(StageSpec::instance(RiskyOperation))
        .with_stage(StageSpec::instance(SaveData))
        .with_config(config.clone())
}

pub fn announced_pipeline(config: &SupervisorConfig) -> Task {
    Task::new()
        .with_stage(StageSpec::instance(AnnouncedStage).with_name("stage1"))
        .with_stage(StageSpec::instance(AnnouncedStage).with_name("stage2"))
        .with_stage(StageSpec::instance(AnnouncedStage).with_name("stage3"))
        .with_stage(StageSpec::instance(SaveData))
        .with_config(config.clone())
}

pub fn faulty_pipeline(config: &SupervisorConfig) -> Task {
    Task::new()
        .with_stage(StageSpec::instance(FetchData))
        .with_stage(StageSpec::instance(ReadGauge))
        .with_stage(StageSpec::instance(SaveData))
        .with_config(config.clone())
}
