use super::context::PipelineState;
use super::core::{PipelineStage, PipelineStatus, StageDescriptor, StageResult, StageStatus};
use crate::error::{FailureKind, SragError, SragResult};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Pipeline executor that runs stages sequentially
///
/// The stage order is fixed when the pipeline is built. Each run starts from
/// an empty state; a stage's outputs are merged only after it succeeds and
/// its outputs match its declared contract. The first failure aborts the run.
///
/// # Example
/// ```ignore
/// let pipeline = Pipeline::builder("srag-report")
///     .add_stage(DownloadStage::new(config.clone())?)
///     .add_stage(PreprocessStage::new(config.clone()))
///     .build();
///
/// match pipeline.run().await {
///     Ok(run) => println!("{}", serde_json::to_string(&run.state)?),
///     Err(failure) => eprintln!("{}", failure),
/// }
/// ```
pub struct Pipeline {
    name: String,
    stages: Vec<Box<dyn PipelineStage>>,
}

/// A completed run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: PipelineStatus,
    pub state: PipelineState,
    pub stage_results: Vec<StageResult>,
    #[serde(skip)]
    pub total_duration: Duration,
}

/// An aborted run
#[derive(Debug, Error)]
#[error("Pipeline '{pipeline_name}' aborted at stage '{stage_name}' ({}): {error}", .error.kind())]
pub struct PipelineFailure {
    pub run_id: Uuid,
    pub pipeline_name: String,

    /// Name and position of the failing stage
    pub stage_name: String,
    pub position: usize,

    #[source]
    pub error: SragError,

    /// State as of the end of the last successful stage
    pub state: PipelineState,

    /// One entry per stage; stages after the failure stay pending
    pub stage_results: Vec<StageResult>,
    pub total_duration: Duration,
}

impl PipelineFailure {
    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus::Aborted
    }
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Get the pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Descriptors in execution order
    pub fn descriptors(&self) -> Vec<&StageDescriptor> {
        self.stages.iter().map(|s| s.descriptor()).collect()
    }

    /// Run every stage once, in order, starting from an empty state
    pub async fn run(&self) -> Result<PipelineRun, PipelineFailure> {
        let run_id = Uuid::new_v4();
        let total = self.stages.len();

        info!(
            run_id = %run_id,
            pipeline = %self.name,
            stages = total,
            "Starting pipeline"
        );

        let pipeline_start = Instant::now();
        let mut state = PipelineState::new();
        let mut stage_results: Vec<StageResult> = self
            .stages
            .iter()
            .enumerate()
            .map(|(index, stage)| StageResult::pending(stage.name(), index))
            .collect();

        for (index, stage) in self.stages.iter().enumerate() {
            let stage_name = stage.name().to_string();
            stage_results[index].status = StageStatus::Running;

            let span = info_span!("stage", run_id = %run_id, stage = %stage_name, index = index + 1, total);
            let stage_start = Instant::now();
            let outcome = Self::run_stage(stage.as_ref(), &state)
                .instrument(span)
                .await;
            let duration = stage_start.elapsed();

            match outcome {
                Ok(next_state) => {
                    let produced = stage.descriptor().outputs.clone();
                    info!(
                        run_id = %run_id,
                        stage = %stage_name,
                        elapsed_secs = duration.as_secs_f64(),
                        produced = ?produced.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                        "Stage {}/{} completed",
                        index + 1,
                        total
                    );
                    stage_results[index] =
                        StageResult::success(&stage_name, index, produced, duration);
                    state = next_state;
                }
                Err(err) => {
                    error!(
                        run_id = %run_id,
                        stage = %stage_name,
                        kind = %err.kind(),
                        error = %err,
                        "Stage {}/{} failed; aborting pipeline",
                        index + 1,
                        total
                    );
                    stage_results[index] = StageResult::failure(&stage_name, index, &err, duration);
                    return Err(PipelineFailure {
                        run_id,
                        pipeline_name: self.name.clone(),
                        stage_name,
                        position: index,
                        error: err,
                        state,
                        stage_results,
                        total_duration: pipeline_start.elapsed(),
                    });
                }
            }
        }

        let total_duration = pipeline_start.elapsed();
        info!(
            run_id = %run_id,
            pipeline = %self.name,
            elapsed_secs = total_duration.as_secs_f64(),
            artifacts = state.len(),
            "Pipeline completed successfully"
        );

        Ok(PipelineRun {
            run_id,
            pipeline_name: self.name.clone(),
            status: PipelineStatus::Completed,
            state,
            stage_results,
            total_duration,
        })
    }

    /// Run one stage against `state`, returning the merged successor state
    ///
    /// `state` itself is never modified.
    async fn run_stage(stage: &dyn PipelineStage, state: &PipelineState) -> SragResult<PipelineState> {
        let descriptor = stage.descriptor();

        std::panic::catch_unwind(AssertUnwindSafe(|| -> SragResult<()> {
            stage.pre_execute()?;
            descriptor.check_inputs(state)
        }))
        .map_err(|payload| SragError::Unexpected(panic_message(payload.as_ref())))??;

        info!("Executing stage");
        let output = AssertUnwindSafe(stage.execute(state))
            .catch_unwind()
            .await
            .map_err(|payload| SragError::Unexpected(panic_message(payload.as_ref())))??;

        descriptor.verify_output(&output)?;

        let mut next = state.clone();
        let mut entries = output.into_entries();
        // merge in declared order so every run writes keys identically
        entries.sort_by_key(|(key, _)| {
            descriptor
                .outputs
                .iter()
                .position(|k| k == key)
                .unwrap_or(usize::MAX)
        });
        for (key, path) in entries {
            next.insert(key, path).map_err(|e| SragError::ContractViolation {
                stage: descriptor.name.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(next)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Builder for constructing pipelines
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Box<dyn PipelineStage>>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Add a stage to the pipeline
    pub fn add_stage<S: PipelineStage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Add a boxed stage to the pipeline
    pub fn add_boxed_stage(mut self, stage: Box<dyn PipelineStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Pipeline {
        Pipeline {
            name: self.name,
            stages: self.stages,
        }
    }
}
