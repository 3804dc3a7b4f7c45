use serde::Serialize;
use thiserror::Error;

use crate::pipeline::ArtifactKey;

/// Central error type for the SRAG report pipeline
#[derive(Error, Debug)]
pub enum SragError {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing required secret: environment variable {0} is not set")]
    MissingSecret(&'static str),

    // ============================================================================
    // Pipeline Contract Errors
    // ============================================================================
    #[error("Stage '{stage}' is missing required input(s): {}", format_keys(.keys))]
    MissingDependency {
        stage: String,
        keys: Vec<ArtifactKey>,
    },

    #[error("Stage '{stage}' violated its output contract: {reason}")]
    ContractViolation { stage: String, reason: String },

    #[error("Artifact '{0}' was already produced and cannot be rewritten")]
    ArtifactAlreadySet(ArtifactKey),

    // ============================================================================
    // Collaborator Errors
    // ============================================================================
    #[error("No data: {0}")]
    NoData(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Malformed input file {path}: {reason}")]
    MalformedInput { path: String, reason: String },

    #[error("Upstream service error: {0}")]
    UpstreamError(String),

    #[error("Rendering failed: {0}")]
    RenderFailed(String),

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

/// Coarse classification the orchestrator reports for a failed stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    MissingDependency,
    ContractViolation,
    NoData,
    Collaborator,
    Unexpected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "configuration",
            FailureKind::MissingDependency => "missing_dependency",
            FailureKind::ContractViolation => "contract_violation",
            FailureKind::NoData => "no_data",
            FailureKind::Collaborator => "collaborator",
            FailureKind::Unexpected => "unexpected",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SragError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SragError::ConfigError(_)
            | SragError::ConfigRead { .. }
            | SragError::MissingSecret(_)
            | SragError::Yaml(_) => FailureKind::Configuration,
            SragError::MissingDependency { .. } => FailureKind::MissingDependency,
            SragError::ContractViolation { .. } | SragError::ArtifactAlreadySet(_) => {
                FailureKind::ContractViolation
            }
            SragError::NoData(_) => FailureKind::NoData,
            SragError::Unexpected(_) => FailureKind::Unexpected,
            SragError::DownloadFailed(_)
            | SragError::MalformedInput { .. }
            | SragError::UpstreamError(_)
            | SragError::RenderFailed(_)
            | SragError::Io(_)
            | SragError::Json(_)
            | SragError::Csv(_)
            | SragError::Http(_)
            | SragError::Image(_)
            | SragError::Pdf(_) => FailureKind::Collaborator,
        }
    }
}

impl From<handlebars::RenderError> for SragError {
    fn from(err: handlebars::RenderError) -> Self {
        SragError::RenderFailed(err.to_string())
    }
}

impl From<handlebars::TemplateError> for SragError {
    fn from(err: handlebars::TemplateError) -> Self {
        SragError::RenderFailed(format!("Invalid template: {}", err))
    }
}

fn format_keys(keys: &[ArtifactKey]) -> String {
    keys.iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// Helper type alias for Results
pub type SragResult<T> = Result<T, SragError>;
