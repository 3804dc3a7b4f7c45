use crate::config::Config;
use crate::error::{SragError, SragResult};
use crate::pipeline::{ArtifactKey, PipelineStage, PipelineState, StageDescriptor, StageOutput};
use crate::records::{write_processed, CaseRecord, CURED, DEATH, IGNORED, NO, YES};
use crate::storage::{now_timestamp, write_metadata};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const DATE_COLUMN: &str = "DT_NOTIFIC";
const ICU_COLUMN: &str = "UTI";
const FLU_VACCINE_COLUMN: &str = "VACINA";
const COVID_VACCINE_COLUMN: &str = "VACINA_COV";
const OUTCOME_COLUMN: &str = "EVOLUCAO";

/// Counters reported after cleaning
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleaningSummary {
    pub rows_read: usize,
    pub missing_date: usize,
    pub unparseable_date: usize,
}

/// Stage that cleans the raw SRAG export into the processed case file
///
/// Keeps the configured columns, drops rows without a notification date and
/// decodes the numeric answer codes into labels.
///
/// # Context Requirements
/// - Input: `downloaded_file_path` - Raw `;`-separated CSV
///
/// # Context Outputs
/// - `processed_data_file_path` - CSV with `DATA_NOTIFICACAO,UTI,VACINA,VACINA_COV,EVOLUCAO`
pub struct PreprocessStage {
    config: Arc<Config>,
    descriptor: StageDescriptor,
}

impl PreprocessStage {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            descriptor: StageDescriptor::new(
                "preprocess",
                vec![ArtifactKey::DownloadedFile],
                vec![ArtifactKey::ProcessedDataFile],
            ),
        }
    }
}

#[async_trait]
impl PipelineStage for PreprocessStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn execute(&self, state: &PipelineState) -> SragResult<StageOutput> {
        self.descriptor.check_inputs(state)?;
        let raw_path = self
            .descriptor
            .input(state, ArtifactKey::DownloadedFile)?
            .to_path_buf();

        let settings = &self.config.preprocessing;
        let output_path = settings.output_folder.join(&settings.output_filename);
        let columns = settings.columns_to_keep.clone();

        info!(path = %raw_path.display(), columns = ?columns, "Reading raw SRAG file");

        let write_to = output_path.clone();
        let summary = tokio::task::spawn_blocking(move || -> SragResult<CleaningSummary> {
            let (records, summary) = clean_raw_file(&raw_path, &columns)?;
            if records.is_empty() {
                return Err(SragError::NoData(format!(
                    "no usable rows in {} ({} read)",
                    raw_path.display(),
                    summary.rows_read
                )));
            }
            write_processed(&write_to, &records)?;
            Ok(summary)
        })
        .await
        .map_err(|e| SragError::Unexpected(format!("preprocessing task failed: {}", e)))??;

        if summary.unparseable_date > 0 {
            warn!(
                rows = summary.unparseable_date,
                "Dropped rows with an unparseable notification date"
            );
        }
        info!(
            rows_read = summary.rows_read,
            missing_date = summary.missing_date,
            path = %output_path.display(),
            "Processed data saved"
        );

        write_metadata(&settings.output_folder, now_timestamp(), &[])?;

        Ok(StageOutput::new().with(ArtifactKey::ProcessedDataFile, output_path))
    }
}

/// Read the raw export and turn it into case records
///
/// Every name in `columns` must be present in the header. Answer columns
/// that are not listed are filled with `IGNORADO`.
pub fn clean_raw_file(
    path: &Path,
    columns: &[String],
) -> SragResult<(Vec<CaseRecord>, CleaningSummary)> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_path(path)?;

    let header: HashMap<String, usize> = reader
        .byte_headers()?
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let name = String::from_utf8_lossy(name);
            (name.trim().trim_start_matches('\u{feff}').to_string(), i)
        })
        .collect();

    let missing: Vec<&str> = columns
        .iter()
        .filter(|c| !header.contains_key(c.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(SragError::MalformedInput {
            path: path.display().to_string(),
            reason: format!("missing column(s): {}", missing.join(", ")),
        });
    }

    let kept = |name: &str| -> Option<usize> {
        if columns.iter().any(|c| c == name) {
            header.get(name).copied()
        } else {
            warn!(column = name, "Column not kept; values default to IGNORADO");
            None
        }
    };
    let date_idx = kept(DATE_COLUMN).ok_or_else(|| SragError::MalformedInput {
        path: path.display().to_string(),
        reason: format!("{} must be kept", DATE_COLUMN),
    })?;
    let icu_idx = kept(ICU_COLUMN);
    let flu_idx = kept(FLU_VACCINE_COLUMN);
    let covid_idx = kept(COVID_VACCINE_COLUMN);
    let outcome_idx = kept(OUTCOME_COLUMN);

    let mut records = Vec::new();
    let mut summary = CleaningSummary::default();

    for row in reader.byte_records() {
        let row = row?;
        summary.rows_read += 1;

        let field = |idx: Option<usize>| -> String {
            idx.and_then(|i| row.get(i))
                .map(|v| String::from_utf8_lossy(v).trim().to_string())
                .unwrap_or_default()
        };

        let raw_date = field(Some(date_idx));
        if raw_date.is_empty() {
            summary.missing_date += 1;
            continue;
        }
        let Some(notified_on) = parse_notification_date(&raw_date) else {
            summary.unparseable_date += 1;
            continue;
        };

        records.push(CaseRecord {
            notified_on,
            icu: decode_answer(&field(icu_idx)),
            flu_vaccine: decode_answer(&field(flu_idx)),
            covid_vaccine: decode_answer(&field(covid_idx)),
            outcome: decode_outcome(&field(outcome_idx)),
        });
    }

    Ok((records, summary))
}

/// Accepts `dd/mm/yyyy` and ISO dates, with or without a time part
pub fn parse_notification_date(raw: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: [&str; 2] = ["%d/%m/%Y", "%Y-%m-%d"];
    const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M:%S"];

    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
                .map(|dt| dt.date())
        })
}

/// Numeric answer code; blank counts as 9 ("ignored")
fn code(raw: &str) -> Option<i64> {
    if raw.is_empty() {
        return Some(9);
    }
    let value: f64 = raw.parse().ok()?;
    (value.fract() == 0.0).then_some(value as i64)
}

/// 1 → SIM, 2 → NAO, 9/blank → IGNORADO; anything else is kept as is
pub fn decode_answer(raw: &str) -> String {
    match code(raw) {
        Some(1) => YES.to_string(),
        Some(2) => NO.to_string(),
        Some(9) => IGNORED.to_string(),
        _ => raw.to_string(),
    }
}

/// 1 → CURA, 2 or 3 → OBITO, 9/blank → IGNORADO; anything else is kept as is
pub fn decode_outcome(raw: &str) -> String {
    match code(raw) {
        Some(1) => CURED.to_string(),
        // death from other causes counts as a death
        Some(2) | Some(3) => DEATH.to_string(),
        Some(9) => IGNORED.to_string(),
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::read_processed;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const RAW: &str = "\
DT_NOTIFIC;SG_UF;UTI;VACINA;VACINA_COV;EVOLUCAO
05/03/2024;SP;1;2;;1
2024-03-06;RJ;2;1;1;3
;MG;1;1;1;1
31/02/2024;BA;1;1;1;1
07/03/2024;PR;;9;5;
";

    fn default_columns() -> Vec<String> {
        Config::default().preprocessing.columns_to_keep
    }

    fn write_raw(dir: &TempDir, content: &[u8]) -> PathBuf {
        let path = dir.path().join("raw.csv");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_clean_raw_file() {
        let dir = TempDir::new().unwrap();
        let path = write_raw(&dir, RAW.as_bytes());

        let (records, summary) = clean_raw_file(&path, &default_columns()).unwrap();

        assert_eq!(summary.rows_read, 5);
        assert_eq!(summary.missing_date, 1);
        assert_eq!(summary.unparseable_date, 1);
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].notified_on, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(records[0].icu, "SIM");
        assert_eq!(records[0].flu_vaccine, "NAO");
        assert_eq!(records[0].covid_vaccine, "IGNORADO");
        assert_eq!(records[0].outcome, "CURA");

        // 3 folds into death
        assert_eq!(records[1].outcome, "OBITO");

        // unknown codes pass through, blanks become IGNORADO
        assert_eq!(records[2].icu, "IGNORADO");
        assert_eq!(records[2].covid_vaccine, "5");
        assert_eq!(records[2].outcome, "IGNORADO");
    }

    #[test]
    fn test_missing_column_is_malformed_input() {
        let dir = TempDir::new().unwrap();
        let path = write_raw(&dir, b"DT_NOTIFIC;UTI\n05/03/2024;1\n");

        let err = clean_raw_file(&path, &default_columns()).unwrap_err();
        match err {
            SragError::MalformedInput { reason, .. } => {
                assert!(reason.contains("VACINA"));
                assert!(reason.contains("EVOLUCAO"));
            }
            other => panic!("expected MalformedInput, got {:?}", other),
        }
    }

    #[test]
    fn test_latin1_bytes_do_not_break_reading() {
        let dir = TempDir::new().unwrap();
        let mut raw = b"DT_NOTIFIC;ID_MUNICIP;UTI;VACINA;VACINA_COV;EVOLUCAO\n".to_vec();
        raw.extend_from_slice(b"05/03/2024;S\xc3O PAULO;1;1;1;2\n");
        let path = write_raw(&dir, &raw);

        let (records, _) = clean_raw_file(&path, &default_columns()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, "OBITO");
    }

    #[test]
    fn test_decode_codes_with_decimal_point() {
        assert_eq!(decode_answer("1.0"), "SIM");
        assert_eq!(decode_answer("2"), "NAO");
        assert_eq!(decode_answer(""), "IGNORADO");
        assert_eq!(decode_outcome("3.0"), "OBITO");
        assert_eq!(decode_outcome("abc"), "abc");
    }

    #[test]
    fn test_parse_notification_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 5);
        assert_eq!(parse_notification_date("05/01/2024"), expected);
        assert_eq!(parse_notification_date("2024-01-05"), expected);
        assert_eq!(parse_notification_date("2024-01-05 00:00:00"), expected);
        assert_eq!(parse_notification_date("January 5"), None);
    }

    #[tokio::test]
    async fn test_stage_writes_processed_file_and_metadata() {
        let dir = TempDir::new().unwrap();
        let raw = write_raw(&dir, RAW.as_bytes());

        let mut config = Config::default();
        config.preprocessing.output_folder = dir.path().join("processed");
        let stage = PreprocessStage::new(Arc::new(config));

        let mut state = PipelineState::new();
        state.insert(ArtifactKey::DownloadedFile, raw).unwrap();

        let output = stage.execute(&state).await.unwrap();
        let processed = output.get(ArtifactKey::ProcessedDataFile).unwrap();

        assert_eq!(read_processed(processed).unwrap().len(), 3);
        assert!(dir.path().join("processed/metadata.json").exists());
    }

    #[tokio::test]
    async fn test_stage_with_only_dateless_rows_is_no_data() {
        let dir = TempDir::new().unwrap();
        let raw = write_raw(&dir, b"DT_NOTIFIC;UTI;VACINA;VACINA_COV;EVOLUCAO\n;1;1;1;1\n");

        let mut config = Config::default();
        config.preprocessing.output_folder = dir.path().join("processed");
        let stage = PreprocessStage::new(Arc::new(config));

        let mut state = PipelineState::new();
        state.insert(ArtifactKey::DownloadedFile, raw).unwrap();

        let err = stage.execute(&state).await.unwrap_err();
        assert!(matches!(err, SragError::NoData(_)));
        assert!(!dir.path().join("processed/srag_processed.csv").exists());
    }

    #[tokio::test]
    async fn test_stage_without_raw_file_key_is_missing_dependency() {
        let stage = PreprocessStage::new(Arc::new(Config::default()));
        let err = stage.execute(&PipelineState::new()).await.unwrap_err();
        assert!(matches!(err, SragError::MissingDependency { .. }));
    }
}
