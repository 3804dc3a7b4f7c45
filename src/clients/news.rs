//! News search client (Serper-compatible API)

use crate::config::NewsConfig;
use crate::error::{SragError, SragResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const MISSING: &str = "N/A";

/// Request body sent to the search endpoint
#[derive(Debug, Clone, Serialize)]
pub struct NewsQuery {
    pub q: String,
    pub gl: String,
    pub hl: String,
    pub num: u32,
    pub tbs: String,
}

impl NewsQuery {
    pub fn from_config(config: &NewsConfig) -> Self {
        let params = &config.search_parameters;
        Self {
            q: config.search_terms.clone(),
            gl: params.country_code.clone(),
            hl: params.language_code.clone(),
            num: params.num_results,
            tbs: params.time_period.clone(),
        }
    }
}

/// One article as stored in the news artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub titulo: String,
    pub conteudo: String,
    pub data: String,
    pub fonte: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    news: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    title: Option<String>,
    snippet: Option<String>,
    date: Option<String>,
    source: Option<String>,
}

impl From<SearchItem> for NewsArticle {
    fn from(item: SearchItem) -> Self {
        let or_missing = |v: Option<String>| v.unwrap_or_else(|| MISSING.to_string());
        Self {
            titulo: or_missing(item.title),
            conteudo: or_missing(item.snippet),
            data: or_missing(item.date),
            fonte: or_missing(item.source),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewsClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl NewsClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> SragResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }

    /// Run one search; an empty list means the service found nothing
    pub async fn search(&self, query: &NewsQuery) -> SragResult<Vec<NewsArticle>> {
        debug!(endpoint = %self.endpoint, q = %query.q, num = query.num, "Searching news");

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SragError::UpstreamError(format!(
                "news search returned {}: {}",
                status,
                truncate(&body, 200)
            )));
        }

        let parsed: SearchResponse = response.json().await?;
        Ok(parsed.news.into_iter().map(NewsArticle::from).collect())
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
