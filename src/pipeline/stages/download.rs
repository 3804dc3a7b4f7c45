use crate::config::Config;
use crate::error::{SragError, SragResult};
use crate::pipeline::{ArtifactKey, PipelineStage, PipelineState, StageDescriptor, StageOutput};
use crate::storage::{ensure_parent, now_timestamp, write_metadata};
use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tracing::{info, warn};

/// One dated file the open-data bucket may hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub date: NaiveDate,
    pub filename: String,
    pub url: String,
}

/// Stage that fetches the most recent SRAG CSV export
///
/// Tries today's file first and walks back one day at a time, up to
/// `days_to_try` candidates. The first HTTP 200 wins.
///
/// # Context Requirements
/// - none
///
/// # Context Outputs
/// - `downloaded_file_path` - Raw `;`-separated CSV
/// - `metadata_file_path` - `metadata.json` with `update_date` and `date_last_file`
pub struct DownloadStage {
    config: Arc<Config>,
    descriptor: StageDescriptor,
    client: Client,
    reference_date: Option<NaiveDate>,
}

impl DownloadStage {
    pub fn new(config: Arc<Config>) -> SragResult<Self> {
        let client = Client::builder()
            .timeout(config.downloader.timeout())
            .build()?;

        Ok(Self {
            config,
            descriptor: StageDescriptor::new(
                "download",
                Vec::new(),
                vec![ArtifactKey::DownloadedFile, ArtifactKey::MetadataFile],
            ),
            client,
            reference_date: None,
        })
    }

    /// Count candidates back from `date` instead of today
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    /// Candidate files from `today` backwards, newest first
    pub fn candidates(&self, today: NaiveDate) -> Vec<Candidate> {
        (0..self.config.downloader.days_to_try)
            .map(|offset| {
                let date = today - Duration::days(i64::from(offset));
                let filename = format!(
                    "INFLUD{}-{}.csv",
                    date.format("%y"),
                    date.format("%d-%m-%Y")
                );
                let url = self
                    .config
                    .downloader
                    .base_url
                    .replace("{year}", &date.format("%Y").to_string())
                    .replace("{filename}", &filename);
                Candidate {
                    date,
                    filename,
                    url,
                }
            })
            .collect()
    }

    /// Fetch one candidate; `None` means try the day before
    async fn fetch(&self, candidate: &Candidate) -> Option<Vec<u8>> {
        let response = match self.client.get(&candidate.url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "Connection error while fetching candidate");
                return None;
            }
        };

        if response.status() != StatusCode::OK {
            warn!(
                filename = %candidate.filename,
                status = %response.status(),
                "Candidate not available, trying previous day"
            );
            return None;
        }

        match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "Failed to read response body");
                None
            }
        }
    }
}

#[async_trait]
impl PipelineStage for DownloadStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn execute(&self, state: &PipelineState) -> SragResult<StageOutput> {
        self.descriptor.check_inputs(state)?;

        let output = &self.config.file_output;
        let save_path = output.destination_folder.join(&output.destination_filename);
        let today = self
            .reference_date
            .unwrap_or_else(|| Local::now().date_naive());

        let candidates = self.candidates(today);
        info!(
            days = candidates.len(),
            from = %today.format("%d/%m/%Y"),
            "Looking for the latest SRAG file"
        );

        let mut attempted = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            info!(date = %candidate.date.format("%d/%m/%Y"), url = %candidate.url, "Trying candidate");

            if let Some(bytes) = self.fetch(candidate).await {
                ensure_parent(&save_path)?;
                tokio::fs::write(&save_path, &bytes).await?;
                info!(
                    path = %save_path.display(),
                    bytes = bytes.len(),
                    "Download complete"
                );

                let metadata_path = write_metadata(
                    &output.destination_folder,
                    now_timestamp(),
                    &[(
                        "date_last_file",
                        candidate.date.format("%d-%m-%Y").to_string(),
                    )],
                )?;

                return Ok(StageOutput::new()
                    .with(ArtifactKey::DownloadedFile, save_path)
                    .with(ArtifactKey::MetadataFile, metadata_path));
            }
            attempted.push(candidate.filename.clone());
        }

        Err(SragError::NoData(format!(
            "no SRAG file found in the last {} day(s); tried {}",
            attempted.len(),
            attempted.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::read_json;
    use serde_json::Value;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server_uri: &str, dir: &TempDir, days: u32) -> Arc<Config> {
        let mut config = Config::default();
        config.downloader.base_url = format!("{}/SRAG/{{year}}/{{filename}}", server_uri);
        config.downloader.days_to_try = days;
        config.file_output.destination_folder = dir.path().join("raw");
        Arc::new(config)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_candidates_walk_back_across_year() {
        let dir = TempDir::new().unwrap();
        let stage = DownloadStage::new(config_for("http://bucket", &dir, 3)).unwrap();

        let candidates = stage.candidates(date(2025, 1, 1));

        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].filename, "INFLUD25-01-01-2025.csv");
        assert_eq!(
            candidates[0].url,
            "http://bucket/SRAG/2025/INFLUD25-01-01-2025.csv"
        );
        assert_eq!(candidates[1].filename, "INFLUD24-31-12-2024.csv");
        assert_eq!(candidates[2].url, "http://bucket/SRAG/2024/INFLUD24-30-12-2024.csv");
    }

    #[tokio::test]
    async fn test_falls_back_to_previous_day() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/SRAG/2024/INFLUD24-16-05-2024.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("DT_NOTIFIC;UTI\n"))
            .mount(&server)
            .await;
        // everything else 404s

        let dir = TempDir::new().unwrap();
        let stage = DownloadStage::new(config_for(&server.uri(), &dir, 5))
            .unwrap()
            .with_reference_date(date(2024, 5, 17));

        let output = stage.execute(&PipelineState::new()).await.unwrap();

        let raw = output.get(ArtifactKey::DownloadedFile).unwrap();
        assert_eq!(std::fs::read_to_string(raw).unwrap(), "DT_NOTIFIC;UTI\n");

        let metadata: Value = read_json(output.get(ArtifactKey::MetadataFile).unwrap()).unwrap();
        assert_eq!(metadata["date_last_file"], "16-05-2024");
        assert!(metadata["update_date"].is_string());
    }

    #[tokio::test]
    async fn test_no_candidate_available_is_no_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let stage = DownloadStage::new(config_for(&server.uri(), &dir, 2))
            .unwrap()
            .with_reference_date(date(2024, 5, 17));

        let err = stage.execute(&PipelineState::new()).await.unwrap_err();
        assert!(matches!(err, SragError::NoData(_)));
        assert!(err.to_string().contains("INFLUD24-16-05-2024.csv"));
        assert!(!dir.path().join("raw/srag_raw.csv").exists());
    }
}
