//! Pipeline pattern implementation for the SRAG report
//!
//! A fixed, ordered list of stages runs one after another. Each stage reads
//! the artifacts produced by earlier stages from a shared, append-only
//! [`PipelineState`] and returns the artifacts it is responsible for. The
//! executor checks every stage against its declared key contract and stops
//! at the first failure.
//!
//! # Example
//! ```ignore
//! use srag_report_lib::config::Config;
//! use srag_report_lib::pipeline::standard_pipeline;
//! use std::sync::Arc;
//!
//! let config = Arc::new(Config::load("conf/parameters.yaml")?);
//! let pipeline = standard_pipeline(config)?;
//! let run = pipeline.run().await?;
//! println!("{}", serde_json::to_string_pretty(&run.state)?);
//! ```

pub mod context;
pub mod core;
pub mod executor;
pub mod stages;

use std::sync::Arc;

use crate::config::Config;
use crate::error::SragResult;

// Re-export main types
pub use context::{ArtifactKey, PipelineState};
pub use core::{
    PipelineStage, PipelineStatus, StageDescriptor, StageOutput, StageResult, StageStatus,
};
pub use executor::{Pipeline, PipelineBuilder, PipelineFailure, PipelineRun};

/// The seven-stage SRAG report chain
///
/// The order is a static list: download, preprocess, metrics, visualize,
/// news, narrative report, final report.
pub fn standard_pipeline(config: Arc<Config>) -> SragResult<Pipeline> {
    use stages::*;

    Ok(Pipeline::builder("srag-report")
        .add_stage(DownloadStage::new(Arc::clone(&config))?)
        .add_stage(PreprocessStage::new(Arc::clone(&config)))
        .add_stage(MetricsStage::new(Arc::clone(&config)))
        .add_stage(VisualizeStage::new(Arc::clone(&config)))
        .add_stage(NewsStage::new(Arc::clone(&config))?)
        .add_stage(NarrativeReportStage::new(Arc::clone(&config))?)
        .add_stage(FinalReportStage::new(config))
        .build())
}
