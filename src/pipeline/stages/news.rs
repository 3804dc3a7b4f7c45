use crate::clients::{NewsClient, NewsQuery};
use crate::config::{Config, SERPER_API_KEY_ENV};
use crate::error::{SragError, SragResult};
use crate::pipeline::{ArtifactKey, PipelineStage, PipelineState, StageDescriptor, StageOutput};
use crate::storage::{now_timestamp, write_json, write_metadata};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Stage that collects recent news about SRAG
///
/// Needs `SERPER_API_KEY`; without it the stage fails before any request.
///
/// # Context Requirements
/// - none
///
/// # Context Outputs
/// - `news_file_path` - JSON list of `{titulo, conteudo, data, fonte}`
pub struct NewsStage {
    config: Arc<Config>,
    descriptor: StageDescriptor,
    client: Option<NewsClient>,
}

impl NewsStage {
    pub fn new(config: Arc<Config>) -> SragResult<Self> {
        let client = match config.secrets.serper_api_key.as_deref() {
            Some(key) => Some(NewsClient::new(
                config.news.endpoint.clone(),
                key,
                Duration::from_secs(config.news.timeout_secs),
            )?),
            None => None,
        };

        Ok(Self {
            config,
            descriptor: StageDescriptor::new("news", Vec::new(), vec![ArtifactKey::NewsFile]),
            client,
        })
    }
}

#[async_trait]
impl PipelineStage for NewsStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn pre_execute(&self) -> SragResult<()> {
        self.config.secrets.serper_api_key().map(|_| ())
    }

    async fn execute(&self, state: &PipelineState) -> SragResult<StageOutput> {
        self.descriptor.check_inputs(state)?;
        let client = self
            .client
            .as_ref()
            .ok_or(SragError::MissingSecret(SERPER_API_KEY_ENV))?;

        let settings = &self.config.news;
        let query = NewsQuery::from_config(settings);
        info!(terms = %query.q, period = %query.tbs, "Collecting news");

        let articles = client.search(&query).await?;
        if articles.is_empty() {
            return Err(SragError::NoData(format!(
                "news search for '{}' returned no results",
                query.q
            )));
        }

        let news_path = settings.output_dir.join(&settings.output_filename);
        write_json(&news_path, &articles)?;
        write_metadata(&settings.output_dir, now_timestamp(), &[])?;
        info!(articles = articles.len(), path = %news_path.display(), "News saved");

        Ok(StageOutput::new().with(ArtifactKey::NewsFile, news_path))
    }
}
