use crate::config::Config;
use crate::error::{SragError, SragResult};
use crate::pipeline::{ArtifactKey, PipelineStage, PipelineState, StageDescriptor, StageOutput};
use crate::records::{read_processed, Answered, CaseRecord, CURED, DEATH, NO, YES};
use crate::storage::{write_json, write_metadata};
use async_trait::async_trait;
use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;
use tracing::info;

pub const PERIODS_FILE_NAME: &str = "periods.json";
pub const METRICS_FILE_NAME: &str = "metrics.json";

/// Closed interval `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    #[serde(serialize_with = "as_day")]
    pub start: NaiveDateTime,
    #[serde(serialize_with = "as_day")]
    pub end: NaiveDateTime,
}

fn as_day<S: Serializer>(dt: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&dt.format("%Y-%m-%d"))
}

impl Period {
    /// Cases are notified on whole days, compared at midnight
    pub fn contains(&self, day: NaiveDate) -> bool {
        let at = day.and_time(NaiveTime::MIN);
        self.start <= at && at <= self.end
    }
}

/// Windows the metrics are computed over, all relative to one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Periods {
    pub current_month: Period,
    pub last_month: Period,
    pub last_7_days: Period,
    pub previous_7_days: Period,
    pub last_30_days: Period,
    pub previous_30_days: Period,
}

impl Periods {
    pub fn relative_to(now: NaiveDateTime) -> Self {
        let trailing = |days: i64| {
            let current = Period {
                start: now - Duration::days(days),
                end: now,
            };
            let previous_end = current.start - Duration::days(1);
            let previous = Period {
                start: previous_end - Duration::days(days),
                end: previous_end,
            };
            (current, previous)
        };
        let (last_30_days, previous_30_days) = trailing(30);
        let (last_7_days, previous_7_days) = trailing(7);

        let month_start = first_of_month(now.date()).and_time(NaiveTime::MIN);
        let last_month_end = month_start - Duration::days(1);
        let last_month_start = first_of_month(last_month_end.date()).and_time(NaiveTime::MIN);

        Self {
            current_month: Period {
                start: month_start,
                end: now,
            },
            last_month: Period {
                start: last_month_start,
                end: last_month_end,
            },
            last_7_days,
            previous_7_days,
            last_30_days,
            previous_30_days,
        }
    }
}

fn first_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

/// `None` when the previous window had no cases but the current one has
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncreaseRates {
    pub last_30_days_vs_previous: Option<f64>,
    pub last_7_days_vs_previous: Option<f64>,
    pub current_month_vs_previous: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRates {
    pub last_30_days: f64,
    pub last_7_days: f64,
    pub current_month: f64,
}

/// Contents of `metrics.json`; every value is a percentage with 2 decimals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub increase_rate: IncreaseRates,
    pub mortality_rate: WindowRates,
    pub uti_occupancy_rate: WindowRates,
    pub vaccination_rate_flu: WindowRates,
    pub vaccination_rate_covid: WindowRates,
}

pub fn compute_metrics(records: &[CaseRecord], periods: &Periods) -> Metrics {
    let count = |period: &Period| records.iter().filter(|r| period.contains(r.notified_on)).count();
    let increase = |current: &Period, previous: &Period| {
        increase_rate(count(current), count(previous)).map(round2)
    };

    let windows = |rate: &dyn Fn(&Period) -> f64| WindowRates {
        last_30_days: round2(rate(&periods.last_30_days)),
        last_7_days: round2(rate(&periods.last_7_days)),
        current_month: round2(rate(&periods.current_month)),
    };

    Metrics {
        increase_rate: IncreaseRates {
            last_30_days_vs_previous: increase(&periods.last_30_days, &periods.previous_30_days),
            last_7_days_vs_previous: increase(&periods.last_7_days, &periods.previous_7_days),
            current_month_vs_previous: increase(&periods.current_month, &periods.last_month),
        },
        mortality_rate: windows(&|p: &Period| mortality_rate(records, p)),
        uti_occupancy_rate: windows(&|p: &Period| answered_yes_rate(records, p, Answered::Icu)),
        vaccination_rate_flu: windows(&|p: &Period| answered_yes_rate(records, p, Answered::FluVaccine)),
        vaccination_rate_covid: windows(&|p: &Period| answered_yes_rate(records, p, Answered::CovidVaccine)),
    }
}

/// Percentage change from `previous` to `current`
///
/// Growth from zero is undefined and yields `None`; zero to zero is 0.
pub fn increase_rate(current: usize, previous: usize) -> Option<f64> {
    if previous == 0 {
        return if current > 0 { None } else { Some(0.0) };
    }
    Some((current as f64 - previous as f64) / previous as f64 * 100.0)
}

/// Deaths over cases with a known outcome
pub fn mortality_rate(records: &[CaseRecord], period: &Period) -> f64 {
    percentage(
        records
            .iter()
            .filter(|r| period.contains(r.notified_on))
            .map(|r| r.outcome.as_str()),
        DEATH,
        CURED,
    )
}

/// SIM over SIM + NAO for one answer column
pub fn answered_yes_rate(records: &[CaseRecord], period: &Period, column: Answered) -> f64 {
    percentage(
        records
            .iter()
            .filter(|r| period.contains(r.notified_on))
            .map(|r| r.answer(column)),
        YES,
        NO,
    )
}

fn percentage<'a>(values: impl Iterator<Item = &'a str>, hit: &str, miss: &str) -> f64 {
    let (hits, total) = values.fold((0usize, 0usize), |(hits, total), v| {
        if v == hit {
            (hits + 1, total + 1)
        } else if v == miss {
            (hits, total + 1)
        } else {
            (hits, total)
        }
    });
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Stage that computes the epidemiological indicators
///
/// # Context Requirements
/// - Input: `processed_data_file_path` - Processed case CSV
///
/// # Context Outputs
/// - `periods_file_path` - `periods.json` with the analysed windows
/// - `metrics_file_path` - `metrics.json` with the rates
pub struct MetricsStage {
    config: Arc<Config>,
    descriptor: StageDescriptor,
    now: Option<NaiveDateTime>,
}

impl MetricsStage {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            descriptor: StageDescriptor::new(
                "metrics",
                vec![ArtifactKey::ProcessedDataFile],
                vec![ArtifactKey::PeriodsFile, ArtifactKey::MetricsFile],
            ),
            now: None,
        }
    }

    /// Compute windows relative to `now` instead of the wall clock
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }
}

#[async_trait]
impl PipelineStage for MetricsStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn execute(&self, state: &PipelineState) -> SragResult<StageOutput> {
        self.descriptor.check_inputs(state)?;
        let data_path = self
            .descriptor
            .input(state, ArtifactKey::ProcessedDataFile)?
            .to_path_buf();

        let now = self.now.unwrap_or_else(|| Local::now().naive_local());
        let periods = Periods::relative_to(now);

        let source = data_path.clone();
        let metrics = tokio::task::spawn_blocking(move || -> SragResult<Metrics> {
            let records = read_processed(&source)?;
            info!(records = records.len(), "Computing metrics");
            Ok(compute_metrics(&records, &periods))
        })
        .await
        .map_err(|e| SragError::Unexpected(format!("metrics task failed: {}", e)))??;

        let output_dir = &self.config.metrics_calculator.output_dir;
        write_metadata(
            output_dir,
            now,
            &[("data_source", data_path.display().to_string())],
        )?;

        let periods_path = output_dir.join(PERIODS_FILE_NAME);
        write_json(&periods_path, &periods)?;
        let metrics_path = output_dir.join(METRICS_FILE_NAME);
        write_json(&metrics_path, &metrics)?;

        info!(
            mortality_30d = metrics.mortality_rate.last_30_days,
            increase_30d = ?metrics.increase_rate.last_30_days_vs_previous,
            "Metrics saved"
        );

        Ok(StageOutput::new()
            .with(ArtifactKey::PeriodsFile, periods_path)
            .with(ArtifactKey::MetricsFile, metrics_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{write_processed, IGNORED};
    use crate::storage::read_json;
    use serde_json::Value;
    use tempfile::TempDir;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn case(y: i32, m: u32, d: u32, outcome: &str, icu: &str) -> CaseRecord {
        CaseRecord {
            notified_on: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            icu: icu.to_string(),
            flu_vaccine: YES.to_string(),
            covid_vaccine: NO.to_string(),
            outcome: outcome.to_string(),
        }
    }

    #[test]
    fn test_periods_relative_to_now() {
        let periods = Periods::relative_to(at(2024, 3, 15, 10));
        let json = serde_json::to_value(periods).unwrap();

        assert_eq!(json["last_30_days"]["start"], "2024-02-14");
        assert_eq!(json["last_30_days"]["end"], "2024-03-15");
        assert_eq!(json["previous_30_days"]["start"], "2024-01-14");
        assert_eq!(json["previous_30_days"]["end"], "2024-02-13");
        assert_eq!(json["last_7_days"]["start"], "2024-03-08");
        assert_eq!(json["previous_7_days"]["end"], "2024-03-07");
        assert_eq!(json["current_month"]["start"], "2024-03-01");
        assert_eq!(json["last_month"]["start"], "2024-02-01");
        assert_eq!(json["last_month"]["end"], "2024-02-29");
    }

    #[test]
    fn test_period_boundaries_follow_time_of_day() {
        let periods = Periods::relative_to(at(2024, 3, 15, 10));
        // start is 2024-02-14 10:00, so that day's cases fall outside
        assert!(!periods.last_30_days.contains(NaiveDate::from_ymd_opt(2024, 2, 14).unwrap()));
        assert!(periods.last_30_days.contains(NaiveDate::from_ymd_opt(2024, 2, 15).unwrap()));
        assert!(periods.last_month.contains(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));
    }

    #[test]
    fn test_increase_rate() {
        assert_eq!(increase_rate(15, 10), Some(50.0));
        assert_eq!(increase_rate(5, 10), Some(-50.0));
        assert_eq!(increase_rate(3, 0), None);
        assert_eq!(increase_rate(0, 0), Some(0.0));
    }

    #[test]
    fn test_compute_metrics() {
        let periods = Periods::relative_to(at(2024, 3, 15, 10));
        let records = vec![
            case(2024, 3, 14, DEATH, YES),
            case(2024, 3, 13, CURED, NO),
            case(2024, 3, 12, CURED, NO),
            case(2024, 3, 11, IGNORED, IGNORED),
            // previous 30 days
            case(2024, 2, 1, CURED, YES),
            case(2024, 2, 2, CURED, YES),
            case(2024, 2, 3, CURED, YES),
        ];

        let metrics = compute_metrics(&records, &periods);

        // 4 vs 3 cases
        assert_eq!(metrics.increase_rate.last_30_days_vs_previous, Some(33.33));
        // 4 this month vs 3 last month
        assert_eq!(metrics.increase_rate.current_month_vs_previous, Some(33.33));
        // nothing in the 7 days before last week
        assert_eq!(metrics.increase_rate.last_7_days_vs_previous, None);

        // 1 death out of 3 known outcomes
        assert_eq!(metrics.mortality_rate.last_7_days, 33.33);
        assert_eq!(metrics.uti_occupancy_rate.last_7_days, 33.33);
        assert_eq!(metrics.vaccination_rate_flu.last_7_days, 100.0);
        assert_eq!(metrics.vaccination_rate_covid.last_7_days, 0.0);
    }

    #[test]
    fn test_compute_metrics_without_cases_is_all_zero() {
        let periods = Periods::relative_to(at(2024, 3, 15, 10));
        let metrics = compute_metrics(&[], &periods);

        assert_eq!(metrics.increase_rate.last_30_days_vs_previous, Some(0.0));
        assert_eq!(metrics.mortality_rate.current_month, 0.0);
        assert_eq!(metrics.vaccination_rate_covid.last_30_days, 0.0);
    }

    #[tokio::test]
    async fn test_stage_writes_artifacts() {
        let dir = TempDir::new().unwrap();
        let processed = dir.path().join("processed.csv");
        write_processed(&processed, &[case(2024, 3, 14, DEATH, YES)]).unwrap();

        let mut config = Config::default();
        config.metrics_calculator.output_dir = dir.path().join("metrics");
        let stage = MetricsStage::new(Arc::new(config)).with_now(at(2024, 3, 15, 10));

        let mut state = PipelineState::new();
        state.insert(ArtifactKey::ProcessedDataFile, processed.clone()).unwrap();

        let output = stage.execute(&state).await.unwrap();

        let metrics: Value = read_json(output.get(ArtifactKey::MetricsFile).unwrap()).unwrap();
        assert_eq!(metrics["mortality_rate"]["last_30_days"], 100.0);
        assert!(metrics["increase_rate"]["last_30_days_vs_previous"].is_null());

        let periods: Value = read_json(output.get(ArtifactKey::PeriodsFile).unwrap()).unwrap();
        assert_eq!(periods["current_month"]["end"], "2024-03-15");

        let metadata: Value = read_json(&dir.path().join("metrics/metadata.json")).unwrap();
        assert_eq!(metadata["update_date"], "2024-03-15 10:00:00");
        assert_eq!(metadata["data_source"], processed.display().to_string());
    }

    #[tokio::test]
    async fn test_stage_without_processed_data_is_missing_dependency() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.metrics_calculator.output_dir = dir.path().join("metrics");
        let stage = MetricsStage::new(Arc::new(config));

        let mut state = PipelineState::new();
        state
            .insert(ArtifactKey::DownloadedFile, dir.path().join("raw.csv"))
            .unwrap();

        let err = stage.execute(&state).await.unwrap_err();
        match err {
            SragError::MissingDependency { stage, keys } => {
                assert_eq!(stage, "metrics");
                assert_eq!(keys, vec![ArtifactKey::ProcessedDataFile]);
            }
            other => panic!("expected MissingDependency, got {:?}", other),
        }
        // nothing was computed
        assert!(!dir.path().join("metrics").exists());
    }
}
