//! Pipeline configuration
//!
//! Loaded once at startup from a YAML file (`conf/parameters.yaml` by
//! default) and handed to every stage. Every section and field has a
//! default, so a partial file only needs to name what it changes. API keys
//! are read from the environment, never from the file.

use crate::error::{SragError, SragResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "conf/parameters.yaml";

pub const SERPER_API_KEY_ENV: &str = "SERPER_API_KEY";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,

    #[serde(rename = "downloader_config")]
    pub downloader: DownloaderConfig,

    pub file_output: FileOutputConfig,

    pub preprocessing: PreprocessingConfig,

    pub metrics_calculator: OutputDirConfig,

    #[serde(rename = "visualizations_tool")]
    pub visualizations: OutputDirConfig,

    #[serde(rename = "news_config")]
    pub news: NewsConfig,

    #[serde(rename = "report_generator_config")]
    pub report_generator: ReportGeneratorConfig,

    #[serde(rename = "final_report_config")]
    pub final_report: FinalReportConfig,

    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub file_name: String,
    /// Default filter; `RUST_LOG` takes precedence
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            file_name: "logs.log".to_string(),
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// URL template with `{year}` and `{filename}` placeholders
    pub base_url: String,
    /// Number of candidate dates, counting back from today
    pub days_to_try: u32,
    pub timeout_secs: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://s3.sa-east-1.amazonaws.com/ckan.saude.gov.br/SRAG/{year}/{filename}"
                .to_string(),
            days_to_try: 7,
            timeout_secs: 30,
        }
    }
}

impl DownloaderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOutputConfig {
    pub destination_folder: PathBuf,
    pub destination_filename: String,
}

impl Default for FileOutputConfig {
    fn default() -> Self {
        Self {
            destination_folder: PathBuf::from("data/raw"),
            destination_filename: "srag_raw.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub output_folder: PathBuf,
    pub output_filename: String,
    pub columns_to_keep: Vec<String>,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            output_folder: PathBuf::from("data/processed"),
            output_filename: "srag_processed.csv".to_string(),
            columns_to_keep: ["DT_NOTIFIC", "UTI", "VACINA", "VACINA_COV", "EVOLUCAO"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// Output directory section; `output_dir` is required when the section is present
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDirConfig {
    pub output_dir: PathBuf,
}

impl Default for OutputDirConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/metrics"),
        }
    }
}

impl OutputDirConfig {
    fn visualizations() -> Self {
        Self {
            output_dir: PathBuf::from("data/visualizations"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub endpoint: String,
    pub output_dir: PathBuf,
    pub output_filename: String,
    pub search_terms: String,
    pub search_parameters: SearchParameters,
    pub timeout_secs: u64,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://google.serper.dev/news".to_string(),
            output_dir: PathBuf::from("data/news"),
            output_filename: "news.json".to_string(),
            search_terms: "SRAG síndrome respiratória aguda grave casos".to_string(),
            search_parameters: SearchParameters::default(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParameters {
    #[serde(rename = "type")]
    pub search_type: String,
    /// Serper `tbs` value, e.g. `qdr:m` for the past month
    pub time_period: String,
    pub country_code: String,
    pub language_code: String,
    pub num_results: u32,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            search_type: "news".to_string(),
            time_period: "qdr:m".to_string(),
            country_code: "br".to_string(),
            language_code: "pt-br".to_string(),
            num_results: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportGeneratorConfig {
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Prompt template; the built-in template is used when unset
    pub prompt_file: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub output_filename: String,
    pub timeout_secs: u64,
}

impl Default for ReportGeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            system_prompt: "Você é um analista de saúde pública especializado em vigilância \
                            epidemiológica de SRAG no Brasil."
                .to_string(),
            temperature: 0.3,
            max_tokens: 2000,
            prompt_file: None,
            output_dir: PathBuf::from("data/report"),
            output_filename: "report.md".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalReportConfig {
    pub paths: FinalReportPaths,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalReportPaths {
    /// Handlebars template; the built-in template is used when unset
    pub template_html: Option<PathBuf>,
    pub output_html: PathBuf,
    pub output_pdf: PathBuf,
}

impl Default for FinalReportPaths {
    fn default() -> Self {
        Self {
            template_html: None,
            output_html: PathBuf::from("data/final_report/report.html"),
            output_pdf: PathBuf::from("data/final_report/report.pdf"),
        }
    }
}

/// API keys resolved from the environment
#[derive(Clone, Default)]
pub struct Secrets {
    pub serper_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            serper_api_key: read(SERPER_API_KEY_ENV),
            openai_api_key: read(OPENAI_API_KEY_ENV),
        }
    }

    pub fn serper_api_key(&self) -> SragResult<&str> {
        self.serper_api_key
            .as_deref()
            .ok_or(SragError::MissingSecret(SERPER_API_KEY_ENV))
    }

    pub fn openai_api_key(&self) -> SragResult<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or(SragError::MissingSecret(OPENAI_API_KEY_ENV))
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("serper_api_key", &mask(&self.serper_api_key))
            .field("openai_api_key", &mask(&self.openai_api_key))
            .finish()
    }
}

impl Config {
    /// Load configuration from a YAML file and resolve secrets from the environment
    pub fn load<P: AsRef<Path>>(path: P) -> SragResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SragError::ConfigRead {
            path: path.display().to_string(),
            source: e,
        })?;

        let mut config = Self::from_yaml_str(&content)?;
        config.secrets = Secrets::from_env();
        Ok(config)
    }

    /// Parse and validate configuration; secrets are left unset
    pub fn from_yaml_str(content: &str) -> SragResult<Self> {
        let config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_secrets(mut self, secrets: Secrets) -> Self {
        self.secrets = secrets;
        self
    }

    fn validate(&self) -> SragResult<()> {
        if self.downloader.days_to_try == 0 {
            return Err(SragError::ConfigError(
                "downloader_config.days_to_try must be at least 1".to_string(),
            ));
        }
        if !self.downloader.base_url.contains("{filename}") {
            return Err(SragError::ConfigError(
                "downloader_config.base_url must contain a {filename} placeholder".to_string(),
            ));
        }
        if self.file_output.destination_filename.trim().is_empty() {
            return Err(SragError::ConfigError(
                "file_output.destination_filename must not be empty".to_string(),
            ));
        }
        if !self
            .preprocessing
            .columns_to_keep
            .iter()
            .any(|c| c == "DT_NOTIFIC")
        {
            return Err(SragError::ConfigError(
                "preprocessing.columns_to_keep must include DT_NOTIFIC".to_string(),
            ));
        }
        if self.news.search_terms.trim().is_empty() {
            return Err(SragError::ConfigError(
                "news_config.search_terms must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.report_generator.temperature) {
            return Err(SragError::ConfigError(format!(
                "report_generator_config.temperature must be within 0..=2, got {}",
                self.report_generator.temperature
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            downloader: DownloaderConfig::default(),
            file_output: FileOutputConfig::default(),
            preprocessing: PreprocessingConfig::default(),
            metrics_calculator: OutputDirConfig::default(),
            visualizations: OutputDirConfig::visualizations(),
            news: NewsConfig::default(),
            report_generator: ReportGeneratorConfig::default(),
            final_report: FinalReportConfig::default(),
            secrets: Secrets::default(),
        }
    }
}
