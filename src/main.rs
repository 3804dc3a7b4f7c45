//! `srag-report` - run the SRAG report pipeline once

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use srag_report_lib::config::{Config, DEFAULT_CONFIG_PATH};
use srag_report_lib::{logger, standard_pipeline};
use tracing::{error, info};

/// Command-line arguments for srag-report
#[derive(Parser, Debug)]
#[command(name = "srag-report")]
#[command(about = "Build the SRAG surveillance report")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "SRAG_CONFIG")]
    config: PathBuf,

    /// Print the run outcome as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("srag-report: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = logger::init(&config.logging) {
        eprintln!("srag-report: {}", e);
        return ExitCode::from(2);
    }
    info!(config = %cli.config.display(), "Configuration loaded");

    let pipeline = match standard_pipeline(Arc::new(config)) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %e, "Failed to build pipeline");
            return ExitCode::from(2);
        }
    };

    match pipeline.run().await {
        Ok(run) => {
            if cli.json {
                match serde_json::to_string_pretty(&run) {
                    Ok(out) => println!("{}", out),
                    Err(e) => error!(error = %e, "Failed to serialize run"),
                }
            } else if let Some(report) = run
                .state
                .get(srag_report_lib::pipeline::ArtifactKey::FinalReportFile)
            {
                println!("Final report available at: {}", report.display());
            }
            ExitCode::SUCCESS
        }
        Err(failure) => {
            error!(
                run_id = %failure.run_id,
                stage = %failure.stage_name,
                kind = %failure.kind(),
                "{}",
                failure
            );
            if cli.json {
                let summary = json!({
                    "run_id": failure.run_id,
                    "pipeline_name": failure.pipeline_name,
                    "status": failure.status(),
                    "failed_stage": failure.stage_name,
                    "failure_kind": failure.kind(),
                    "error": failure.error.to_string(),
                    "state": failure.state,
                    "stage_results": failure.stage_results,
                });
                match serde_json::to_string_pretty(&summary) {
                    Ok(out) => println!("{}", out),
                    Err(e) => error!(error = %e, "Failed to serialize failure"),
                }
            } else {
                eprintln!("{}", failure);
            }
            ExitCode::FAILURE
        }
    }
}
