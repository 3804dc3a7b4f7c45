//! Pipeline stages for the SRAG report
//!
//! This module contains the individual stages that make up the report pipeline:
//! 1. DownloadStage - Fetch the latest SRAG CSV export
//! 2. PreprocessStage - Clean and decode the raw file
//! 3. MetricsStage - Compute rates over the analysed periods
//! 4. VisualizeStage - Daily and monthly series with charts
//! 5. NewsStage - Collect recent news
//! 6. NarrativeReportStage - Written analysis from a language model
//! 7. FinalReportStage - HTML report (plus PDF copy)

pub mod download;
pub mod final_report;
pub mod metrics;
pub mod narrative;
pub mod news;
pub mod preprocess;
pub mod visualize;

// Re-export stages
pub use download::DownloadStage;
pub use final_report::FinalReportStage;
pub use metrics::MetricsStage;
pub use narrative::NarrativeReportStage;
pub use news::NewsStage;
pub use preprocess::PreprocessStage;
pub use visualize::VisualizeStage;
