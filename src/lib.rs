//! SRAG surveillance report pipeline
//!
//! Downloads the public SRAG case export, cleans it, computes indicators,
//! draws charts, collects news, asks a language model for a written analysis
//! and assembles everything into an HTML/PDF report. The stages run as a
//! fixed chain over an append-only artifact state; see [`pipeline`].

pub mod clients;
pub mod config;
pub mod error;
pub mod logger;
pub mod pipeline;
pub mod records;
pub mod render;
pub mod storage;

pub use config::Config;
pub use error::{FailureKind, SragError, SragResult};
pub use pipeline::{standard_pipeline, Pipeline, PipelineFailure, PipelineRun, PipelineState};
