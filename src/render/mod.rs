//! Output renderers: PNG charts, the HTML report and its PDF rendition

pub mod chart;
pub mod html;
pub mod pdf;

pub use chart::{save_chart, ChartKind};
pub use html::ReportRenderer;
pub use pdf::{write_report_pdf, PdfChart};
