use crate::error::{FailureKind, SragError, SragResult};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::context::{ArtifactKey, PipelineState};

/// A single stage in the report pipeline
///
/// A stage reads the artifacts it declares as inputs, does its work (files,
/// network), and returns exactly the artifacts it declares as outputs. It
/// only ever sees the state read-only; the executor merges the output.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use srag_report_lib::error::SragResult;
/// use srag_report_lib::pipeline::{
///     ArtifactKey, PipelineStage, PipelineState, StageDescriptor, StageOutput,
/// };
///
/// struct NewsStub {
///     descriptor: StageDescriptor,
/// }
///
/// #[async_trait]
/// impl PipelineStage for NewsStub {
///     fn descriptor(&self) -> &StageDescriptor {
///         &self.descriptor
///     }
///
///     async fn execute(&self, state: &PipelineState) -> SragResult<StageOutput> {
///         self.descriptor.check_inputs(state)?;
///         Ok(StageOutput::new().with(ArtifactKey::NewsFile, "/tmp/news.json"))
///     }
/// }
/// ```
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Static description of this stage's name and key contract
    fn descriptor(&self) -> &StageDescriptor;

    /// Get stage name for logging and progress tracking
    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Called before execute() - verify the stage is configured
    ///
    /// Failures here are reported as configuration errors and no work is done.
    fn pre_execute(&self) -> SragResult<()> {
        Ok(())
    }

    /// Execute this stage against the accumulated state
    async fn execute(&self, state: &PipelineState) -> SragResult<StageOutput>;
}

/// Name and key contract of a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDescriptor {
    pub name: String,
    pub inputs: Vec<ArtifactKey>,
    pub outputs: Vec<ArtifactKey>,
}

impl StageDescriptor {
    pub fn new(
        name: impl Into<String>,
        inputs: impl Into<Vec<ArtifactKey>>,
        outputs: impl Into<Vec<ArtifactKey>>,
    ) -> Self {
        Self {
            name: name.into(),
            inputs: inputs.into(),
            outputs: outputs.into(),
        }
    }

    /// Fail with `MissingDependency` unless every declared input is present
    pub fn check_inputs(&self, state: &PipelineState) -> SragResult<()> {
        let missing = state.missing(&self.inputs);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SragError::MissingDependency {
                stage: self.name.clone(),
                keys: missing,
            })
        }
    }

    /// Look up one required input
    pub fn input<'a>(&self, state: &'a PipelineState, key: ArtifactKey) -> SragResult<&'a Path> {
        state.get(key).ok_or_else(|| SragError::MissingDependency {
            stage: self.name.clone(),
            keys: vec![key],
        })
    }

    /// Check that an output carries exactly the declared keys
    pub fn verify_output(&self, output: &StageOutput) -> SragResult<()> {
        let produced = output.keys();

        let mut seen = Vec::with_capacity(produced.len());
        for key in &produced {
            if seen.contains(key) {
                return Err(self.violation(format!("produced '{}' more than once", key)));
            }
            seen.push(*key);
        }

        let undeclared: Vec<_> = produced
            .iter()
            .filter(|k| !self.outputs.contains(k))
            .map(|k| k.as_str())
            .collect();
        if !undeclared.is_empty() {
            return Err(self.violation(format!(
                "produced undeclared key(s): {}",
                undeclared.join(", ")
            )));
        }

        let absent: Vec<_> = self
            .outputs
            .iter()
            .filter(|k| !produced.contains(k))
            .map(|k| k.as_str())
            .collect();
        if !absent.is_empty() {
            return Err(self.violation(format!(
                "did not produce declared key(s): {}",
                absent.join(", ")
            )));
        }

        Ok(())
    }

    fn violation(&self, reason: String) -> SragError {
        SragError::ContractViolation {
            stage: self.name.clone(),
            reason,
        }
    }
}

/// Artifacts returned by a successful stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    entries: Vec<(ArtifactKey, PathBuf)>,
}

impl StageOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an artifact (builder style)
    pub fn with(mut self, key: ArtifactKey, path: impl Into<PathBuf>) -> Self {
        self.entries.push((key, path.into()));
        self
    }

    pub fn get(&self, key: ArtifactKey) -> Option<&Path> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, p)| p.as_path())
    }

    pub fn keys(&self) -> Vec<ArtifactKey> {
        self.entries.iter().map(|(k, _)| *k).collect()
    }

    pub fn into_entries(self) -> Vec<(ArtifactKey, PathBuf)> {
        self.entries
    }
}

/// Lifecycle of one stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Completed,
    Aborted,
}

/// Result of a pipeline stage execution
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    /// Stage name
    pub stage_name: String,

    /// Position in the chain (0-based)
    pub position: usize,

    pub status: StageStatus,

    /// Failure classification if failed
    pub failure_kind: Option<FailureKind>,

    /// Error message if failed
    pub error: Option<String>,

    /// Keys added to the state
    pub produced: Vec<ArtifactKey>,

    /// Duration of execution
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl StageResult {
    /// Create a result for a stage that never started
    pub fn pending(stage_name: impl Into<String>, position: usize) -> Self {
        Self {
            stage_name: stage_name.into(),
            position,
            status: StageStatus::Pending,
            failure_kind: None,
            error: None,
            produced: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Create a successful stage result
    pub fn success(
        stage_name: impl Into<String>,
        position: usize,
        produced: Vec<ArtifactKey>,
        duration: Duration,
    ) -> Self {
        Self {
            status: StageStatus::Succeeded,
            produced,
            duration,
            ..Self::pending(stage_name, position)
        }
    }

    /// Create a failed stage result
    pub fn failure(
        stage_name: impl Into<String>,
        position: usize,
        error: &SragError,
        duration: Duration,
    ) -> Self {
        Self {
            status: StageStatus::Failed,
            failure_kind: Some(error.kind()),
            error: Some(error.to_string()),
            duration,
            ..Self::pending(stage_name, position)
        }
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_descriptor() -> StageDescriptor {
        StageDescriptor::new(
            "metrics",
            [ArtifactKey::ProcessedDataFile],
            [ArtifactKey::PeriodsFile, ArtifactKey::MetricsFile],
        )
    }

    #[test]
    fn test_check_inputs_missing() {
        let descriptor = metrics_descriptor();
        let state = PipelineState::new();

        let err = descriptor.check_inputs(&state).unwrap_err();
        match err {
            SragError::MissingDependency { stage, keys } => {
                assert_eq!(stage, "metrics");
                assert_eq!(keys, vec![ArtifactKey::ProcessedDataFile]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_check_inputs_present() {
        let descriptor = metrics_descriptor();
        let mut state = PipelineState::new();
        state
            .insert(ArtifactKey::ProcessedDataFile, PathBuf::from("/tmp/p.csv"))
            .unwrap();

        assert!(descriptor.check_inputs(&state).is_ok());
        assert_eq!(
            descriptor
                .input(&state, ArtifactKey::ProcessedDataFile)
                .unwrap(),
            Path::new("/tmp/p.csv")
        );
    }

    #[test]
    fn test_verify_output_exact() {
        let descriptor = metrics_descriptor();
        let output = StageOutput::new()
            .with(ArtifactKey::MetricsFile, "/m.json")
            .with(ArtifactKey::PeriodsFile, "/p.json");
        assert!(descriptor.verify_output(&output).is_ok());
    }

    #[test]
    fn test_verify_output_fewer() {
        let descriptor = metrics_descriptor();
        let output = StageOutput::new().with(ArtifactKey::MetricsFile, "/m.json");
        let err = descriptor.verify_output(&output).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ContractViolation);
        assert!(err.to_string().contains("periods_file_path"));
    }

    #[test]
    fn test_verify_output_extra() {
        let descriptor = metrics_descriptor();
        let output = StageOutput::new()
            .with(ArtifactKey::MetricsFile, "/m.json")
            .with(ArtifactKey::PeriodsFile, "/p.json")
            .with(ArtifactKey::NewsFile, "/n.json");
        let err = descriptor.verify_output(&output).unwrap_err();
        assert!(err.to_string().contains("undeclared"));
    }

    #[test]
    fn test_verify_output_duplicate() {
        let descriptor = metrics_descriptor();
        let output = StageOutput::new()
            .with(ArtifactKey::MetricsFile, "/m.json")
            .with(ArtifactKey::MetricsFile, "/m2.json");
        assert!(descriptor.verify_output(&output).is_err());
    }

    #[test]
    fn test_stage_result_success() {
        let result = StageResult::success(
            "download",
            0,
            vec![ArtifactKey::DownloadedFile],
            Duration::from_secs(1),
        );
        assert_eq!(result.status, StageStatus::Succeeded);
        assert!(result.error.is_none());
        assert_eq!(result.produced, vec![ArtifactKey::DownloadedFile]);
    }

    #[test]
    fn test_stage_result_failure() {
        let err = SragError::NoData("no file".to_string());
        let result = StageResult::failure("download", 0, &err, Duration::from_secs(1));
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.failure_kind, Some(FailureKind::NoData));
        assert_eq!(result.error, Some("No data: no file".to_string()));
        assert!(result.produced.is_empty());
    }

    #[test]
    fn test_stage_result_pending() {
        let result = StageResult::pending("news", 4);
        assert_eq!(result.status, StageStatus::Pending);
        assert_eq!(result.position, 4);
        assert_eq!(result.duration, Duration::ZERO);
    }
}
