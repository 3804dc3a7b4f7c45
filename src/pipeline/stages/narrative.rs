use crate::clients::{ChatClient, ChatMessage, ChatRequest};
use crate::config::{Config, OPENAI_API_KEY_ENV};
use crate::error::{SragError, SragResult};
use crate::pipeline::{ArtifactKey, PipelineStage, PipelineState, StageDescriptor, StageOutput};
use crate::storage::{now_timestamp, read_json, write_metadata, write_text};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const METRICS_PLACEHOLDER: &str = "json_metricas";
pub const MONTHS_PLACEHOLDER: &str = "json_grafico_meses";
pub const DAYS_PLACEHOLDER: &str = "json_grafico_dias";
pub const NEWS_PLACEHOLDER: &str = "json_noticias";

pub const DEFAULT_PROMPT: &str = "\
Elabore um relatório analítico, em português e em Markdown, sobre a situação \
atual da Síndrome Respiratória Aguda Grave (SRAG) no Brasil.

Use apenas os dados abaixo.

## Métricas (percentuais)
json_metricas

## Casos mensais nos últimos 12 meses
json_grafico_meses

## Casos diários nos últimos 30 dias
json_grafico_dias

## Notícias recentes
json_noticias

O relatório deve:
1. Interpretar a taxa de aumento de casos, a taxa de mortalidade, a taxa de \
ocupação de UTI e as taxas de vacinação (gripe e COVID-19).
2. Descrever a tendência dos gráficos diário e mensal.
3. Relacionar os números com o contexto trazido pelas notícias, citando as fontes.
4. Terminar com uma conclusão curta e objetiva.
";

/// Pretty-printed JSON inputs substituted into the prompt
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub metrics: String,
    pub last_12_months: String,
    pub last_30_days: String,
    pub news: String,
}

impl PromptInputs {
    fn load(metrics: &Path, last_30_days: &Path, last_12_months: &Path, news: &Path) -> SragResult<Self> {
        let pretty = |path: &Path| -> SragResult<String> {
            let value: Value = read_json(path)?;
            Ok(serde_json::to_string_pretty(&value)?)
        };
        Ok(Self {
            metrics: pretty(metrics)?,
            last_12_months: pretty(last_12_months)?,
            last_30_days: pretty(last_30_days)?,
            news: pretty(news)?,
        })
    }
}

/// Substitute every placeholder in `template` in a single left-to-right pass
///
/// Substituted text is never scanned again.
pub fn build_prompt(template: &str, inputs: &PromptInputs) -> String {
    let substitutions = [
        (METRICS_PLACEHOLDER, inputs.metrics.as_str()),
        (MONTHS_PLACEHOLDER, inputs.last_12_months.as_str()),
        (DAYS_PLACEHOLDER, inputs.last_30_days.as_str()),
        (NEWS_PLACEHOLDER, inputs.news.as_str()),
    ];

    let mut prompt = String::with_capacity(template.len());
    let mut rest = template;
    while let Some((at, placeholder, value)) = substitutions
        .iter()
        .filter_map(|(placeholder, value)| rest.find(*placeholder).map(|at| (at, *placeholder, *value)))
        .min_by_key(|(at, _, _)| *at)
    {
        prompt.push_str(&rest[..at]);
        prompt.push_str(value);
        rest = &rest[at + placeholder.len()..];
    }
    prompt.push_str(rest);
    prompt
}

/// Stage that asks a language model for the written analysis
///
/// Needs `OPENAI_API_KEY`; without it the stage fails before any request.
///
/// # Context Requirements
/// - Input: `metrics_file_path`
/// - Input: `last_30_days_json_file_path`
/// - Input: `last_12_months_json_file_path`
/// - Input: `news_file_path`
///
/// # Context Outputs
/// - `report_file_path` - Markdown report text
pub struct NarrativeReportStage {
    config: Arc<Config>,
    descriptor: StageDescriptor,
    client: Option<ChatClient>,
}

impl NarrativeReportStage {
    pub fn new(config: Arc<Config>) -> SragResult<Self> {
        let settings = &config.report_generator;
        let client = match config.secrets.openai_api_key.as_deref() {
            Some(key) => Some(ChatClient::new(
                settings.endpoint.clone(),
                key,
                Duration::from_secs(settings.timeout_secs),
            )?),
            None => None,
        };

        Ok(Self {
            descriptor: StageDescriptor::new(
                "narrative-report",
                vec![
                    ArtifactKey::MetricsFile,
                    ArtifactKey::Last30DaysJson,
                    ArtifactKey::Last12MonthsJson,
                    ArtifactKey::NewsFile,
                ],
                vec![ArtifactKey::ReportFile],
            ),
            config,
            client,
        })
    }

    fn template(&self) -> SragResult<String> {
        match &self.config.report_generator.prompt_file {
            Some(path) => {
                let template = std::fs::read_to_string(path).map_err(|e| {
                    SragError::ConfigError(format!(
                        "Cannot read prompt file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                if template.trim().is_empty() {
                    return Err(SragError::ConfigError(format!(
                        "Prompt file {} is empty",
                        path.display()
                    )));
                }
                Ok(template)
            }
            None => Ok(DEFAULT_PROMPT.to_string()),
        }
    }
}

#[async_trait]
impl PipelineStage for NarrativeReportStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn pre_execute(&self) -> SragResult<()> {
        self.config.secrets.openai_api_key()?;
        self.template().map(|_| ())
    }

    async fn execute(&self, state: &PipelineState) -> SragResult<StageOutput> {
        self.descriptor.check_inputs(state)?;
        let client = self
            .client
            .as_ref()
            .ok_or(SragError::MissingSecret(OPENAI_API_KEY_ENV))?;

        let inputs = PromptInputs::load(
            self.descriptor.input(state, ArtifactKey::MetricsFile)?,
            self.descriptor.input(state, ArtifactKey::Last30DaysJson)?,
            self.descriptor.input(state, ArtifactKey::Last12MonthsJson)?,
            self.descriptor.input(state, ArtifactKey::NewsFile)?,
        )?;
        let prompt = build_prompt(&self.template()?, &inputs);

        let settings = &self.config.report_generator;
        let request = ChatRequest {
            model: settings.model.clone(),
            messages: vec![
                ChatMessage::system(settings.system_prompt.clone()),
                ChatMessage::user(prompt),
            ],
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        };
        info!(model = %request.model, "Requesting narrative report");

        let report = client.complete(&request).await?;

        let report_path = settings.output_dir.join(&settings.output_filename);
        write_text(&report_path, &report)?;
        write_metadata(&settings.output_dir, now_timestamp(), &[])?;

        Ok(StageOutput::new().with(ArtifactKey::ReportFile, report_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secrets;
    use crate::storage::write_json;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn inputs() -> PromptInputs {
        PromptInputs {
            metrics: "{M}".to_string(),
            last_12_months: "[MONTHS]".to_string(),
            last_30_days: "[DAYS]".to_string(),
            news: "[NEWS]".to_string(),
        }
    }

    #[test]
    fn test_build_prompt_places_each_series() {
        let prompt = build_prompt("a json_metricas b json_grafico_meses c json_grafico_dias d json_noticias", &inputs());
        assert_eq!(prompt, "a {M} b [MONTHS] c [DAYS] d [NEWS]");
    }

    #[test]
    fn test_build_prompt_leaves_substituted_text_alone() {
        let inputs = PromptInputs {
            metrics: "{\"note\": \"json_noticias\"}".to_string(),
            ..inputs()
        };
        let prompt = build_prompt("json_metricas | json_noticias | json_metricas", &inputs);
        assert_eq!(prompt, "{\"note\": \"json_noticias\"} | [NEWS] | {\"note\": \"json_noticias\"}");
    }

    #[test]
    fn test_default_prompt_has_all_placeholders() {
        for placeholder in [METRICS_PLACEHOLDER, MONTHS_PLACEHOLDER, DAYS_PLACEHOLDER, NEWS_PLACEHOLDER] {
            assert!(DEFAULT_PROMPT.contains(placeholder), "{} missing", placeholder);
        }
    }

    fn state_with_inputs(dir: &TempDir) -> PipelineState {
        let metrics = dir.path().join("metrics.json");
        let days = dir.path().join("days.json");
        let months = dir.path().join("months.json");
        let news = dir.path().join("news.json");
        write_json(&metrics, &json!({"mortality_rate": {"last_30_days": 12.5}})).unwrap();
        write_json(&days, &json!([{"DATA_NOTIFICACAO": "2024-05-20", "count": 7}])).unwrap();
        write_json(&months, &json!([{"DATA_NOTIFICACAO": "2024-05", "count": 99}])).unwrap();
        write_json(&news, &json!([{"titulo": "t", "conteudo": "c", "data": "d", "fonte": "f"}])).unwrap();

        let mut state = PipelineState::new();
        state.insert(ArtifactKey::MetricsFile, metrics).unwrap();
        state.insert(ArtifactKey::Last30DaysJson, days).unwrap();
        state.insert(ArtifactKey::Last12MonthsJson, months).unwrap();
        state.insert(ArtifactKey::NewsFile, news).unwrap();
        state
    }

    fn config_for(endpoint: String, dir: &TempDir, key: Option<&str>) -> Arc<Config> {
        let mut config = Config::default().with_secrets(Secrets {
            serper_api_key: None,
            openai_api_key: key.map(str::to_string),
        });
        config.report_generator.endpoint = endpoint;
        config.report_generator.output_dir = dir.path().join("report");
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_stage_sends_both_series_and_saves_report() {
        let server = MockServer::start().await;
        // 2024-05-20 only appears in the daily series
        Mock::given(method("POST"))
            .and(body_string_contains("2024-05-20"))
            .and(body_string_contains("12.5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "# Relatório\n\nCasos estáveis."}}]
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let stage = NarrativeReportStage::new(config_for(server.uri(), &dir, Some("sk"))).unwrap();
        stage.pre_execute().unwrap();

        let output = stage.execute(&state_with_inputs(&dir)).await.unwrap();

        let report = std::fs::read_to_string(output.get(ArtifactKey::ReportFile).unwrap()).unwrap();
        assert!(report.starts_with("# Relatório"));
        assert!(dir.path().join("report/metadata.json").exists());
    }

    #[test]
    fn test_missing_key_fails_pre_execute() {
        let dir = TempDir::new().unwrap();
        let stage = NarrativeReportStage::new(config_for("http://unused".to_string(), &dir, None)).unwrap();
        assert!(matches!(
            stage.pre_execute().unwrap_err(),
            SragError::MissingSecret(OPENAI_API_KEY_ENV)
        ));
    }

    #[test]
    fn test_unreadable_prompt_file_fails_pre_execute() {
        let dir = TempDir::new().unwrap();
        let mut config = (*config_for("http://unused".to_string(), &dir, Some("sk"))).clone();
        config.report_generator.prompt_file = Some(dir.path().join("missing.txt"));
        let stage = NarrativeReportStage::new(Arc::new(config)).unwrap();

        assert!(matches!(stage.pre_execute().unwrap_err(), SragError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_stage_with_malformed_input_fails() {
        let dir = TempDir::new().unwrap();
        let state = state_with_inputs(&dir);
        std::fs::write(dir.path().join("news.json"), "not json").unwrap();

        let stage = NarrativeReportStage::new(config_for("http://unused".to_string(), &dir, Some("sk"))).unwrap();
        let err = stage.execute(&state).await.unwrap_err();
        assert!(matches!(err, SragError::MalformedInput { .. }));
    }
}
