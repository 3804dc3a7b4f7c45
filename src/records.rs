//! Processed SRAG case records
//!
//! The preprocess stage writes these rows; metrics and visualize read them.

use crate::error::{SragError, SragResult};
use crate::storage::ensure_parent;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const YES: &str = "SIM";
pub const NO: &str = "NAO";
pub const IGNORED: &str = "IGNORADO";
pub const CURED: &str = "CURA";
pub const DEATH: &str = "OBITO";

/// One notified case after cleaning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    #[serde(rename = "DATA_NOTIFICACAO")]
    pub notified_on: NaiveDate,

    /// ICU admission: SIM / NAO / IGNORADO
    #[serde(rename = "UTI")]
    pub icu: String,

    #[serde(rename = "VACINA")]
    pub flu_vaccine: String,

    #[serde(rename = "VACINA_COV")]
    pub covid_vaccine: String,

    /// Case outcome: CURA / OBITO / IGNORADO
    #[serde(rename = "EVOLUCAO")]
    pub outcome: String,
}

/// Yes/no columns that rates can be computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answered {
    Icu,
    FluVaccine,
    CovidVaccine,
}

impl CaseRecord {
    pub fn answer(&self, column: Answered) -> &str {
        match column {
            Answered::Icu => &self.icu,
            Answered::FluVaccine => &self.flu_vaccine,
            Answered::CovidVaccine => &self.covid_vaccine,
        }
    }
}

pub fn write_processed(path: &Path, records: &[CaseRecord]) -> SragResult<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_processed(path: &Path) -> SragResult<Vec<CaseRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    reader
        .deserialize()
        .collect::<Result<Vec<CaseRecord>, csv::Error>>()
        .map_err(|e| SragError::MalformedInput {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}
