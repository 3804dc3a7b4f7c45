use crate::config::Config;
use crate::error::{SragError, SragResult};
use crate::pipeline::{ArtifactKey, PipelineStage, PipelineState, StageDescriptor, StageOutput};
use crate::records::{read_processed, CaseRecord};
use crate::render::{save_chart, ChartKind};
use crate::storage::{now_timestamp, write_json, write_metadata};
use async_trait::async_trait;
use chrono::{Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const LAST_30_DAYS_JSON: &str = "last_30_days.json";
pub const LAST_30_DAYS_PLOT: &str = "last_30_days.png";
pub const LAST_12_MONTHS_JSON: &str = "last_12_months.json";
pub const LAST_12_MONTHS_PLOT: &str = "last_12_months.png";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    #[serde(rename = "DATA_NOTIFICACAO")]
    pub day: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyCount {
    /// `YYYY-MM`
    #[serde(rename = "DATA_NOTIFICACAO")]
    pub month: String,
    pub count: u64,
}

/// Cases per day from 30 days before the newest notification onwards
///
/// Days without cases are absent.
pub fn daily_counts(records: &[CaseRecord]) -> Vec<DailyCount> {
    let Some(newest) = records.iter().map(|r| r.notified_on).max() else {
        return Vec::new();
    };
    let start = newest - Duration::days(30);

    let mut per_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for record in records.iter().filter(|r| r.notified_on >= start) {
        *per_day.entry(record.notified_on).or_default() += 1;
    }

    per_day
        .into_iter()
        .map(|(day, count)| DailyCount { day, count })
        .collect()
}

/// Cases per calendar month within the 12 months up to the newest notification
pub fn monthly_counts(records: &[CaseRecord]) -> Vec<MonthlyCount> {
    let Some(newest) = records.iter().map(|r| r.notified_on).max() else {
        return Vec::new();
    };
    let start = newest.checked_sub_months(Months::new(12)).unwrap_or(NaiveDate::MIN);

    let mut per_month: BTreeMap<String, u64> = BTreeMap::new();
    for record in records
        .iter()
        .filter(|r| r.notified_on >= start && r.notified_on <= newest)
    {
        *per_month
            .entry(record.notified_on.format("%Y-%m").to_string())
            .or_default() += 1;
    }

    per_month
        .into_iter()
        .map(|(month, count)| MonthlyCount { month, count })
        .collect()
}

/// Artifact paths written by one visualization run
struct Rendered {
    daily_json: PathBuf,
    daily_plot: PathBuf,
    monthly_json: PathBuf,
    monthly_plot: PathBuf,
}

fn render_all(records: &[CaseRecord], output_dir: &Path) -> SragResult<Rendered> {
    let daily = daily_counts(records);
    let monthly = monthly_counts(records);
    if daily.is_empty() {
        warn!("No cases to plot; charts will be empty");
    }

    let rendered = Rendered {
        daily_json: output_dir.join(LAST_30_DAYS_JSON),
        daily_plot: output_dir.join(LAST_30_DAYS_PLOT),
        monthly_json: output_dir.join(LAST_12_MONTHS_JSON),
        monthly_plot: output_dir.join(LAST_12_MONTHS_PLOT),
    };

    write_json(&rendered.daily_json, &daily)?;
    let values: Vec<u64> = daily.iter().map(|d| d.count).collect();
    save_chart(&rendered.daily_plot, ChartKind::Line, &values)?;

    write_json(&rendered.monthly_json, &monthly)?;
    let values: Vec<u64> = monthly.iter().map(|m| m.count).collect();
    save_chart(&rendered.monthly_plot, ChartKind::Bar, &values)?;

    Ok(rendered)
}

/// Stage that produces the case-count series and their charts
///
/// Both windows are anchored on the newest notification date in the data,
/// not on the wall clock.
///
/// # Context Requirements
/// - Input: `processed_data_file_path` - Processed case CSV
///
/// # Context Outputs
/// - `last_30_days_json_file_path` - Daily counts
/// - `last_30_days_plot_file_path` - Daily line chart (PNG)
/// - `last_12_months_json_file_path` - Monthly counts
/// - `last_12_months_plot_file_path` - Monthly bar chart (PNG)
pub struct VisualizeStage {
    config: Arc<Config>,
    descriptor: StageDescriptor,
}

impl VisualizeStage {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            descriptor: StageDescriptor::new(
                "visualize",
                vec![ArtifactKey::ProcessedDataFile],
                vec![
                    ArtifactKey::Last30DaysJson,
                    ArtifactKey::Last30DaysPlot,
                    ArtifactKey::Last12MonthsJson,
                    ArtifactKey::Last12MonthsPlot,
                ],
            ),
        }
    }
}

#[async_trait]
impl PipelineStage for VisualizeStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn execute(&self, state: &PipelineState) -> SragResult<StageOutput> {
        self.descriptor.check_inputs(state)?;
        let data_path = self
            .descriptor
            .input(state, ArtifactKey::ProcessedDataFile)?
            .to_path_buf();

        let output_dir = self.config.visualizations.output_dir.clone();

        let render_dir = output_dir.clone();
        let rendered = tokio::task::spawn_blocking(move || -> SragResult<Rendered> {
            let records = read_processed(&data_path)?;
            info!(records = records.len(), "Building visualizations");
            render_all(&records, &render_dir)
        })
        .await
        .map_err(|e| SragError::Unexpected(format!("visualization task failed: {}", e)))??;

        write_metadata(&output_dir, now_timestamp(), &[])?;

        Ok(StageOutput::new()
            .with(ArtifactKey::Last30DaysJson, rendered.daily_json)
            .with(ArtifactKey::Last30DaysPlot, rendered.daily_plot)
            .with(ArtifactKey::Last12MonthsJson, rendered.monthly_json)
            .with(ArtifactKey::Last12MonthsPlot, rendered.monthly_plot))
    }
}
