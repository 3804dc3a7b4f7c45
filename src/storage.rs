//! Artifact file helpers shared by the stages

use crate::error::{SragError, SragResult};
use chrono::{Local, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Timestamp format used in every metadata file
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Create the parent directory of `path` if needed
pub fn ensure_parent(path: &Path) -> SragResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Write `value` as pretty-printed JSON, creating parent directories
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> SragResult<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    info!(path = %path.display(), "Saved JSON artifact");
    Ok(())
}

/// Read and deserialize a JSON artifact
pub fn read_json<T: DeserializeOwned>(path: &Path) -> SragResult<T> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| SragError::MalformedInput {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Write a text artifact, creating parent directories
pub fn write_text(path: &Path, content: &str) -> SragResult<()> {
    ensure_parent(path)?;
    fs::write(path, content)?;
    info!(path = %path.display(), bytes = content.len(), "Saved text artifact");
    Ok(())
}

pub fn now_timestamp() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Write `<dir>/metadata.json` with `update_date` plus any extra fields
pub fn write_metadata(
    dir: &Path,
    update_date: NaiveDateTime,
    extra: &[(&str, String)],
) -> SragResult<PathBuf> {
    let mut metadata = Map::new();
    metadata.insert(
        "update_date".to_string(),
        Value::String(update_date.format(TIMESTAMP_FORMAT).to_string()),
    );
    for (key, value) in extra {
        metadata.insert((*key).to_string(), Value::String(value.clone()));
    }

    let path = dir.join(METADATA_FILE_NAME);
    write_json(&path, &Value::Object(metadata))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[test]
    fn test_write_metadata() {
        let dir = TempDir::new().unwrap();
        let at = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();

        let path = write_metadata(
            &dir.path().join("nested"),
            at,
            &[("date_last_file", "16-05-2024".to_string())],
        )
        .unwrap();

        let value: Value = read_json(&path).unwrap();
        assert_eq!(value["update_date"], "2024-05-17 08:30:00");
        assert_eq!(value["date_last_file"], "16-05-2024");
    }

    #[test]
    fn test_read_json_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        write_text(&path, "{not json").unwrap();

        let err = read_json::<Value>(&path).unwrap_err();
        assert!(matches!(err, SragError::MalformedInput { .. }));
    }

    #[test]
    fn test_read_json_missing_file() {
        let err = read_json::<Value>(Path::new("/nonexistent/file.json")).unwrap_err();
        assert!(matches!(err, SragError::Io(_)));
    }
}
