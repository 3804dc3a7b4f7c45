//! HTML report rendering with Handlebars
//!
//! The template receives the report view as JSON. Besides the prepared
//! sections (`metric_cards`, `period_rows`, `charts`, `report_paragraphs`)
//! the raw `metadata`, `metrics` and `periods` objects are passed through, so
//! a custom template can address single values such as
//! `{{metrics.mortality_rate.last_30_days}}`.

use crate::error::SragResult;
use handlebars::{handlebars_helper, Handlebars};
use serde_json::Value;
use std::path::Path;

const TEMPLATE_NAME: &str = "report";

pub const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
<meta charset="utf-8">
<title>{{title}}</title>
<style>
  body { font-family: Arial, Helvetica, sans-serif; margin: 2em auto; max-width: 1000px; color: #222; }
  header { border-bottom: 2px solid #1f77b4; margin-bottom: 1.5em; }
  .cards { display: flex; flex-wrap: wrap; gap: 1em; }
  .card { border: 1px solid #ddd; border-radius: 6px; padding: 0.8em 1em; min-width: 220px; }
  .card h3 { margin: 0 0 0.5em 0; font-size: 1em; }
  table { border-collapse: collapse; }
  td, th { border: 1px solid #ddd; padding: 0.3em 0.8em; }
  figure { margin: 1em 0; }
  figure img { max-width: 100%; }
</style>
</head>
<body>
<header>
  <h1>{{title}}</h1>
  <p>Atualizado em: {{metadata.update_date}} | Arquivo de dados: {{metadata.date_last_file}}</p>
</header>

<section id="metrics">
  <h2>Métricas</h2>
  <div class="cards">
  {{#each metric_cards}}
    <div class="card">
      <h3>{{title}}</h3>
      <ul>
      {{#each values}}
        <li>{{label}}: <strong>{{rate value}}</strong></li>
      {{/each}}
      </ul>
    </div>
  {{/each}}
  </div>
</section>

<section id="periods">
  <h2>Períodos analisados</h2>
  <table>
    <tr><th>Período</th><th>Início</th><th>Fim</th></tr>
    {{#each period_rows}}
    <tr><td>{{label}}</td><td>{{start}}</td><td>{{end}}</td></tr>
    {{/each}}
  </table>
</section>

<section id="graphs">
  <h2>Gráficos</h2>
  <figure>
    <img src="{{charts.last_30_days}}" alt="Casos diários nos últimos 30 dias">
    <figcaption>Casos diários nos últimos 30 dias</figcaption>
  </figure>
  <figure>
    <img src="{{charts.last_12_months}}" alt="Casos mensais nos últimos 12 meses">
    <figcaption>Casos mensais nos últimos 12 meses</figcaption>
  </figure>
</section>

<section id="report-text">
  <h2>Análise</h2>
  {{#each report_paragraphs}}
  <p>{{this}}</p>
  {{/each}}
</section>
</body>
</html>
"#;

// Two decimals plus percent sign; null renders as N/A
handlebars_helper!(rate: |value: Json| match value.as_f64() {
    Some(v) => format!("{:.2}%", v),
    None => "N/A".to_string(),
});

/// Compiled report template
pub struct ReportRenderer<'a> {
    handlebars: Handlebars<'a>,
}

impl<'a> ReportRenderer<'a> {
    /// Compile the template at `template_path`, or the built-in one
    pub fn new(template_path: Option<&Path>) -> SragResult<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_helper("rate", Box::new(rate));

        match template_path {
            Some(path) => {
                let source = std::fs::read_to_string(path)?;
                handlebars.register_template_string(TEMPLATE_NAME, source)?;
            }
            None => handlebars.register_template_string(TEMPLATE_NAME, DEFAULT_TEMPLATE)?,
        }

        Ok(Self { handlebars })
    }

    pub fn render(&self, view: &Value) -> SragResult<String> {
        Ok(self.handlebars.render(TEMPLATE_NAME, view)?)
    }
}
