use crate::error::{SragError, SragResult};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Names of every artifact a pipeline run can produce
///
/// The vocabulary is closed: each key is written by exactly one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKey {
    DownloadedFile,
    MetadataFile,
    ProcessedDataFile,
    PeriodsFile,
    MetricsFile,
    Last30DaysJson,
    Last30DaysPlot,
    Last12MonthsJson,
    Last12MonthsPlot,
    NewsFile,
    ReportFile,
    FinalReportFile,
}

impl ArtifactKey {
    /// Every key, in the order the standard chain produces them
    pub const ALL: [ArtifactKey; 12] = [
        ArtifactKey::DownloadedFile,
        ArtifactKey::MetadataFile,
        ArtifactKey::ProcessedDataFile,
        ArtifactKey::PeriodsFile,
        ArtifactKey::MetricsFile,
        ArtifactKey::Last30DaysJson,
        ArtifactKey::Last30DaysPlot,
        ArtifactKey::Last12MonthsJson,
        ArtifactKey::Last12MonthsPlot,
        ArtifactKey::NewsFile,
        ArtifactKey::ReportFile,
        ArtifactKey::FinalReportFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKey::DownloadedFile => "downloaded_file_path",
            ArtifactKey::MetadataFile => "metadata_file_path",
            ArtifactKey::ProcessedDataFile => "processed_data_file_path",
            ArtifactKey::PeriodsFile => "periods_file_path",
            ArtifactKey::MetricsFile => "metrics_file_path",
            ArtifactKey::Last30DaysJson => "last_30_days_json_file_path",
            ArtifactKey::Last30DaysPlot => "last_30_days_plot_file_path",
            ArtifactKey::Last12MonthsJson => "last_12_months_json_file_path",
            ArtifactKey::Last12MonthsPlot => "last_12_months_plot_file_path",
            ArtifactKey::NewsFile => "news_file_path",
            ArtifactKey::ReportFile => "report_file_path",
            ArtifactKey::FinalReportFile => "final_report_file_path",
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKey {
    type Err = SragError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArtifactKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| SragError::ConfigError(format!("Unknown artifact key: {}", s)))
    }
}

impl Serialize for ArtifactKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Accumulated state of a single pipeline run
///
/// Each artifact has its own typed slot. Slots start empty and are filled
/// once; a filled slot can never be rewritten or cleared.
///
/// # Example
/// ```
/// use srag_report_lib::pipeline::{ArtifactKey, PipelineState};
/// use std::path::PathBuf;
///
/// let mut state = PipelineState::new();
/// state.insert(ArtifactKey::NewsFile, PathBuf::from("/tmp/news.json")).unwrap();
///
/// assert!(state.has(ArtifactKey::NewsFile));
/// assert!(state.insert(ArtifactKey::NewsFile, PathBuf::from("/tmp/other.json")).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineState {
    downloaded_file: Option<PathBuf>,
    metadata_file: Option<PathBuf>,
    processed_data_file: Option<PathBuf>,
    periods_file: Option<PathBuf>,
    metrics_file: Option<PathBuf>,
    last_30_days_json: Option<PathBuf>,
    last_30_days_plot: Option<PathBuf>,
    last_12_months_json: Option<PathBuf>,
    last_12_months_plot: Option<PathBuf>,
    news_file: Option<PathBuf>,
    report_file: Option<PathBuf>,
    final_report_file: Option<PathBuf>,

    /// Keys in the order they were written
    written: Vec<ArtifactKey>,
}

impl PipelineState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: ArtifactKey) -> &Option<PathBuf> {
        match key {
            ArtifactKey::DownloadedFile => &self.downloaded_file,
            ArtifactKey::MetadataFile => &self.metadata_file,
            ArtifactKey::ProcessedDataFile => &self.processed_data_file,
            ArtifactKey::PeriodsFile => &self.periods_file,
            ArtifactKey::MetricsFile => &self.metrics_file,
            ArtifactKey::Last30DaysJson => &self.last_30_days_json,
            ArtifactKey::Last30DaysPlot => &self.last_30_days_plot,
            ArtifactKey::Last12MonthsJson => &self.last_12_months_json,
            ArtifactKey::Last12MonthsPlot => &self.last_12_months_plot,
            ArtifactKey::NewsFile => &self.news_file,
            ArtifactKey::ReportFile => &self.report_file,
            ArtifactKey::FinalReportFile => &self.final_report_file,
        }
    }

    fn slot_mut(&mut self, key: ArtifactKey) -> &mut Option<PathBuf> {
        match key {
            ArtifactKey::DownloadedFile => &mut self.downloaded_file,
            ArtifactKey::MetadataFile => &mut self.metadata_file,
            ArtifactKey::ProcessedDataFile => &mut self.processed_data_file,
            ArtifactKey::PeriodsFile => &mut self.periods_file,
            ArtifactKey::MetricsFile => &mut self.metrics_file,
            ArtifactKey::Last30DaysJson => &mut self.last_30_days_json,
            ArtifactKey::Last30DaysPlot => &mut self.last_30_days_plot,
            ArtifactKey::Last12MonthsJson => &mut self.last_12_months_json,
            ArtifactKey::Last12MonthsPlot => &mut self.last_12_months_plot,
            ArtifactKey::NewsFile => &mut self.news_file,
            ArtifactKey::ReportFile => &mut self.report_file,
            ArtifactKey::FinalReportFile => &mut self.final_report_file,
        }
    }

    /// Get an artifact path
    pub fn get(&self, key: ArtifactKey) -> Option<&Path> {
        self.slot(key).as_deref()
    }

    /// Check if an artifact has been produced
    pub fn has(&self, key: ArtifactKey) -> bool {
        self.slot(key).is_some()
    }

    /// Record a newly produced artifact
    ///
    /// Fails if the slot is already filled.
    pub fn insert(&mut self, key: ArtifactKey, path: PathBuf) -> SragResult<()> {
        let slot = self.slot_mut(key);
        if slot.is_some() {
            return Err(SragError::ArtifactAlreadySet(key));
        }
        *slot = Some(path);
        self.written.push(key);
        Ok(())
    }

    /// Subset of `keys` not yet present, preserving the given order
    pub fn missing(&self, keys: &[ArtifactKey]) -> Vec<ArtifactKey> {
        keys.iter().copied().filter(|k| !self.has(*k)).collect()
    }

    /// Keys present, in the order they were written
    pub fn keys(&self) -> &[ArtifactKey] {
        &self.written
    }

    /// Present entries in write order
    pub fn entries(&self) -> impl Iterator<Item = (ArtifactKey, &Path)> + '_ {
        self.written
            .iter()
            .filter_map(move |k| self.get(*k).map(|p| (*k, p)))
    }

    pub fn len(&self) -> usize {
        self.written.len()
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }

    /// True when every artifact in the vocabulary is present
    pub fn is_complete(&self) -> bool {
        ArtifactKey::ALL.iter().all(|k| self.has(*k))
    }
}

impl Serialize for PipelineState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, path) in self.entries() {
            map.serialize_entry(key.as_str(), &path.to_string_lossy())?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_creation() {
        let state = PipelineState::new();
        assert!(state.is_empty());
        assert!(!state.is_complete());
        assert_eq!(state.missing(&ArtifactKey::ALL).len(), 12);
    }

    #[test]
    fn test_insert_and_get() {
        let mut state = PipelineState::new();
        state
            .insert(ArtifactKey::DownloadedFile, PathBuf::from("/tmp/a.csv"))
            .unwrap();

        assert!(state.has(ArtifactKey::DownloadedFile));
        assert_eq!(
            state.get(ArtifactKey::DownloadedFile),
            Some(Path::new("/tmp/a.csv"))
        );
        assert!(state.get(ArtifactKey::MetadataFile).is_none());
    }

    #[test]
    fn test_insert_never_overwrites() {
        let mut state = PipelineState::new();
        state
            .insert(ArtifactKey::NewsFile, PathBuf::from("/tmp/news.json"))
            .unwrap();

        let result = state.insert(ArtifactKey::NewsFile, PathBuf::from("/tmp/other.json"));
        assert!(matches!(
            result,
            Err(SragError::ArtifactAlreadySet(ArtifactKey::NewsFile))
        ));
        assert_eq!(
            state.get(ArtifactKey::NewsFile),
            Some(Path::new("/tmp/news.json"))
        );
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_keys_keep_write_order() {
        let mut state = PipelineState::new();
        state
            .insert(ArtifactKey::NewsFile, PathBuf::from("n"))
            .unwrap();
        state
            .insert(ArtifactKey::DownloadedFile, PathBuf::from("d"))
            .unwrap();

        assert_eq!(
            state.keys(),
            &[ArtifactKey::NewsFile, ArtifactKey::DownloadedFile]
        );
    }

    #[test]
    fn test_missing_keys() {
        let mut state = PipelineState::new();
        state
            .insert(ArtifactKey::MetricsFile, PathBuf::from("m"))
            .unwrap();

        let missing = state.missing(&[
            ArtifactKey::MetricsFile,
            ArtifactKey::NewsFile,
            ArtifactKey::ReportFile,
        ]);
        assert_eq!(missing, vec![ArtifactKey::NewsFile, ArtifactKey::ReportFile]);
    }

    #[test]
    fn test_key_names_round_trip() {
        for key in ArtifactKey::ALL {
            assert_eq!(key.as_str().parse::<ArtifactKey>().unwrap(), key);
        }
        assert!("bogus_path".parse::<ArtifactKey>().is_err());
    }

    #[test]
    fn test_serialize_in_write_order() {
        let mut state = PipelineState::new();
        state
            .insert(ArtifactKey::ProcessedDataFile, PathBuf::from("/p.csv"))
            .unwrap();
        state
            .insert(ArtifactKey::DownloadedFile, PathBuf::from("/d.csv"))
            .unwrap();

        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(
            json,
            r#"{"processed_data_file_path":"/p.csv","downloaded_file_path":"/d.csv"}"#
        );
    }

    #[test]
    fn test_complete_state() {
        let mut state = PipelineState::new();
        for key in ArtifactKey::ALL {
            state
                .insert(key, PathBuf::from(format!("/tmp/{}", key)))
                .unwrap();
        }
        assert!(state.is_complete());
        assert_eq!(state.len(), 12);
    }
}
