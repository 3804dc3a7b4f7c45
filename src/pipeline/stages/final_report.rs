use crate::config::Config;
use crate::error::{SragError, SragResult};
use crate::pipeline::{ArtifactKey, PipelineStage, PipelineState, StageDescriptor, StageOutput};
use crate::render::{write_report_pdf, PdfChart, ReportRenderer};
use crate::storage::{read_json, write_text};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const TITLE: &str = "Relatório de Monitoramento de SRAG";

const DAILY_CHART_CAPTION: &str = "Casos diários nos últimos 30 dias";
const MONTHLY_CHART_CAPTION: &str = "Casos mensais nos últimos 12 meses";

const TABLE_WIDTH: usize = 84;

fn table_row(indicator: &str, window: &str, value: &str) -> String {
    format!("{:<30} {:<42} {:>10}", indicator, window, value)
}

const CATEGORY_TITLES: [(&str, &str); 5] = [
    ("increase_rate", "Taxa de aumento de casos"),
    ("mortality_rate", "Taxa de mortalidade"),
    ("uti_occupancy_rate", "Taxa de ocupação de UTI"),
    ("vaccination_rate_flu", "Taxa de vacinação (gripe)"),
    ("vaccination_rate_covid", "Taxa de vacinação (COVID-19)"),
];

const WINDOW_LABELS: [(&str, &str); 6] = [
    ("last_30_days_vs_previous", "Últimos 30 dias vs. 30 dias anteriores"),
    ("last_7_days_vs_previous", "Últimos 7 dias vs. 7 dias anteriores"),
    ("current_month_vs_previous", "Mês atual vs. mês anterior"),
    ("last_30_days", "Últimos 30 dias"),
    ("last_7_days", "Últimos 7 dias"),
    ("current_month", "Mês atual"),
];

const PERIOD_LABELS: [(&str, &str); 6] = [
    ("current_month", "Mês atual"),
    ("last_month", "Mês anterior"),
    ("last_7_days", "Últimos 7 dias"),
    ("previous_7_days", "7 dias anteriores"),
    ("last_30_days", "Últimos 30 dias"),
    ("previous_30_days", "30 dias anteriores"),
];

#[derive(Debug, Clone, Serialize)]
pub struct MetricCard {
    pub title: String,
    pub values: Vec<MetricValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricValue {
    pub label: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodRow {
    pub label: String,
    pub start: String,
    pub end: String,
}

/// Everything the report templates are rendered from
#[derive(Debug, Clone)]
pub struct ReportView {
    pub metadata: Value,
    pub metrics: Value,
    pub periods: Value,
    pub metric_cards: Vec<MetricCard>,
    pub period_rows: Vec<PeriodRow>,
    pub last_30_days_plot: String,
    pub last_12_months_plot: String,
    pub report_paragraphs: Vec<String>,
}

fn label_for<'a>(table: &[(&'a str, &'a str)], key: &'a str) -> &'a str {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, label)| *label)
        .unwrap_or(key)
}

/// Known keys first, in table order; unknown keys after, alphabetically
fn ordered<'a>(object: &'a Map<String, Value>, table: &[(&str, &str)]) -> Vec<(&'a String, &'a Value)> {
    let rank = |key: &str| table.iter().position(|(k, _)| *k == key).unwrap_or(table.len());
    let mut entries: Vec<_> = object.iter().collect();
    entries.sort_by(|a, b| rank(a.0).cmp(&rank(b.0)).then_with(|| a.0.cmp(b.0)));
    entries
}

fn as_object<'a>(value: &'a Value, path: &Path) -> SragResult<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| SragError::MalformedInput {
        path: path.display().to_string(),
        reason: "expected a JSON object".to_string(),
    })
}

pub fn metric_cards(metrics: &Map<String, Value>) -> Vec<MetricCard> {
    ordered(metrics, &CATEGORY_TITLES)
        .into_iter()
        .filter_map(|(category, values)| {
            let values = values.as_object()?;
            Some(MetricCard {
                title: label_for(&CATEGORY_TITLES, category).to_string(),
                values: ordered(values, &WINDOW_LABELS)
                    .into_iter()
                    .map(|(key, value)| MetricValue {
                        label: label_for(&WINDOW_LABELS, key).to_string(),
                        value: value.clone(),
                    })
                    .collect(),
            })
        })
        .collect()
}

pub fn period_rows(periods: &Map<String, Value>) -> Vec<PeriodRow> {
    let text = |v: Option<&Value>| match v {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    ordered(periods, &PERIOD_LABELS)
        .into_iter()
        .map(|(period, bounds)| PeriodRow {
            label: label_for(&PERIOD_LABELS, period).to_string(),
            start: text(bounds.get("start")),
            end: text(bounds.get("end")),
        })
        .collect()
}

/// Markdown text as plain paragraphs: heading marks and emphasis are dropped
pub fn paragraphs(markdown: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&str>| {
        if !current.is_empty() {
            out.push(current.join(" ").replace("**", "").replace("__", ""));
            current.clear();
        }
    };

    for line in markdown.lines() {
        let line = line.trim();
        if line.is_empty() {
            flush(&mut current);
        } else if line.starts_with('#') {
            flush(&mut current);
            current.push(line.trim_start_matches('#').trim());
            flush(&mut current);
        } else {
            current.push(line);
        }
    }
    flush(&mut current);
    out
}

impl ReportView {
    pub fn to_json(&self) -> Value {
        json!({
            "title": TITLE,
            "metadata": self.metadata,
            "metrics": self.metrics,
            "periods": self.periods,
            "metric_cards": self.metric_cards,
            "period_rows": self.period_rows,
            "charts": {
                "last_30_days": self.last_30_days_plot,
                "last_12_months": self.last_12_months_plot,
            },
            "report_paragraphs": self.report_paragraphs,
        })
    }

    /// Charts for the PDF chart page, in report order
    pub fn pdf_charts(&self) -> [PdfChart<'_>; 2] {
        [
            PdfChart {
                caption: DAILY_CHART_CAPTION,
                path: Path::new(&self.last_30_days_plot),
            },
            PdfChart {
                caption: MONTHLY_CHART_CAPTION,
                path: Path::new(&self.last_12_months_plot),
            },
        ]
    }

    /// Text rendition used for the PDF pages; metrics are laid out as a table
    pub fn text_lines(&self) -> Vec<String> {
        let field = |key: &str| {
            self.metadata
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        };

        let mut lines = vec![
            format!("Atualizado em: {}", field("update_date")),
            format!("Arquivo de dados: {}", field("date_last_file")),
            String::new(),
            "MÉTRICAS".to_string(),
            table_row("Indicador", "Período", "Valor"),
            "-".repeat(TABLE_WIDTH),
        ];
        for card in &self.metric_cards {
            for (index, value) in card.values.iter().enumerate() {
                let shown = match value.value.as_f64() {
                    Some(v) => format!("{:.2}%", v),
                    None => "N/A".to_string(),
                };
                let title = if index == 0 { card.title.as_str() } else { "" };
                lines.push(table_row(title, &value.label, &shown));
            }
        }

        lines.push(String::new());
        lines.push("PERÍODOS ANALISADOS".to_string());
        for row in &self.period_rows {
            lines.push(format!("  {}: {} a {}", row.label, row.start, row.end));
        }

        lines.push(String::new());
        lines.push("ANÁLISE".to_string());
        for paragraph in &self.report_paragraphs {
            lines.push(paragraph.clone());
            lines.push(String::new());
        }
        lines
    }
}

/// Stage that assembles the final HTML report (plus a PDF copy)
///
/// # Context Requirements
/// - Input: `metadata_file_path` - Download metadata
/// - Input: `periods_file_path`
/// - Input: `metrics_file_path`
/// - Input: `report_file_path` - Narrative text
/// - Input: `last_30_days_plot_file_path`
/// - Input: `last_12_months_plot_file_path`
///
/// # Context Outputs
/// - `final_report_file_path` - Rendered HTML report
pub struct FinalReportStage {
    config: Arc<Config>,
    descriptor: StageDescriptor,
}

impl FinalReportStage {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            descriptor: StageDescriptor::new(
                "final-report",
                vec![
                    ArtifactKey::MetadataFile,
                    ArtifactKey::PeriodsFile,
                    ArtifactKey::MetricsFile,
                    ArtifactKey::ReportFile,
                    ArtifactKey::Last30DaysPlot,
                    ArtifactKey::Last12MonthsPlot,
                ],
                vec![ArtifactKey::FinalReportFile],
            ),
        }
    }

    fn load_view(&self, state: &PipelineState) -> SragResult<ReportView> {
        let input = |key| self.descriptor.input(state, key);

        let metadata: Value = read_json(input(ArtifactKey::MetadataFile)?)?;

        let metrics_path = input(ArtifactKey::MetricsFile)?;
        let metrics: Value = read_json(metrics_path)?;
        let metric_cards = metric_cards(as_object(&metrics, metrics_path)?);

        let periods_path = input(ArtifactKey::PeriodsFile)?;
        let periods: Value = read_json(periods_path)?;
        let period_rows = period_rows(as_object(&periods, periods_path)?);

        let report_text = std::fs::read_to_string(input(ArtifactKey::ReportFile)?)?;

        Ok(ReportView {
            metadata,
            metrics,
            periods,
            metric_cards,
            period_rows,
            last_30_days_plot: input(ArtifactKey::Last30DaysPlot)?.display().to_string(),
            last_12_months_plot: input(ArtifactKey::Last12MonthsPlot)?.display().to_string(),
            report_paragraphs: paragraphs(&report_text),
        })
    }
}

#[async_trait]
impl PipelineStage for FinalReportStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn pre_execute(&self) -> SragResult<()> {
        match &self.config.final_report.paths.template_html {
            Some(path) if !path.is_file() => Err(SragError::ConfigError(format!(
                "HTML template {} does not exist",
                path.display()
            ))),
            _ => Ok(()),
        }
    }

    async fn execute(&self, state: &PipelineState) -> SragResult<StageOutput> {
        self.descriptor.check_inputs(state)?;
        let paths = &self.config.final_report.paths;

        let view = self.load_view(state)?;
        let renderer = ReportRenderer::new(paths.template_html.as_deref())?;
        let html = renderer.render(&view.to_json())?;
        write_text(&paths.output_html, &html)?;

        write_report_pdf(&paths.output_pdf, TITLE, &view.text_lines(), &view.pdf_charts())?;
        info!(
            html = %paths.output_html.display(),
            pdf = %paths.output_pdf.display(),
            "Final report generated"
        );

        Ok(StageOutput::new().with(ArtifactKey::FinalReportFile, paths.output_html.clone()))
    }
}
