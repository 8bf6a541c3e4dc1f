//! Loaders for usage.row.v1 input
//!
//! Parses JSON arrays and NDJSON streams into [`RawUsageRow`]s. A row that parses
//! as an object but carries bad values is kept, so the normalizer can skip and
//! count it. Input that is not rows at all fails the whole load.

use crate::error::{EngineError, MalformedRecordError};
use crate::schema::raw_row::RawUsageRow;
use std::path::Path;

/// Adapter for reading raw usage rows
pub struct UsageRowAdapter;

impl UsageRowAdapter {
    /// Parse a JSON string containing an array of rows
    pub fn parse_array(json: &str) -> Result<Vec<RawUsageRow>, EngineError> {
        let rows: Vec<RawUsageRow> = serde_json::from_str(json)?;
        Ok(rows)
    }

    /// Parse NDJSON (newline-delimited JSON) containing rows
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawUsageRow>, EngineError> {
        let mut rows = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawUsageRow>(trimmed) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    return Err(EngineError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(rows)
    }

    /// Read a JSON array file. Unreadable files are data access errors.
    pub fn read_array_file(path: &Path) -> Result<Vec<RawUsageRow>, EngineError> {
        let json = read_input(path)?;
        Self::parse_array(&json)
    }

    /// Read an NDJSON file. Unreadable files are data access errors.
    pub fn read_ndjson_file(path: &Path) -> Result<Vec<RawUsageRow>, EngineError> {
        let ndjson = read_input(path)?;
        Self::parse_ndjson(&ndjson)
    }

    /// Validate a batch of rows, returning only the failures
    pub fn validate_rows(rows: &[RawUsageRow]) -> Vec<ValidationResult> {
        rows.iter()
            .enumerate()
            .map(|(idx, row)| ValidationResult {
                index: idx,
                app: row.app_str().map(str::to_string),
                result: row.validate().err(),
            })
            .filter(|r| r.result.is_some())
            .collect()
    }
}

fn read_input(path: &Path) -> Result<String, EngineError> {
    std::fs::read_to_string(path).map_err(|e| EngineError::data_access(path.display().to_string(), e))
}

/// Result of row validation
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub app: Option<String>,
    pub result: Option<MalformedRecordError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_array() {
        let rows = UsageRowAdapter::parse_array(
            r#"[
                { "start": 100, "end": 110, "app": "com.apple.Safari", "stream": "/app/usage" },
                { "start": 110, "end": null, "app": "com.apple.mail", "stream": "/app/usage" }
            ]"#,
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].end, None);
    }

    #[test]
    fn test_parse_ndjson_skips_blank_lines() {
        let ndjson = "{\"start\": 1, \"end\": 2, \"app\": \"Mail\"}\n\n{\"start\": 2, \"end\": 3, \"app\": \"Notes\"}\n";
        let rows = UsageRowAdapter::parse_ndjson(ndjson).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_parse_ndjson_reports_line_number() {
        let ndjson = "{\"start\": 1, \"end\": 2, \"app\": \"Mail\"}\nnot json\n";
        let err = UsageRowAdapter::parse_ndjson(ndjson).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_bad_values_are_kept_for_the_normalizer() {
        let rows = UsageRowAdapter::parse_array(
            r#"[
                { "start": "garbage", "end": 2, "app": "Mail" },
                { "start": 1, "end": 2, "app": "" },
                { "start": 1, "end": 2, "app": "Notes" }
            ]"#,
        )
        .unwrap();
        assert_eq!(rows.len(), 3);

        let failures = UsageRowAdapter::validate_rows(&rows);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].index, 0);
        assert_eq!(failures[1].index, 1);
        assert_eq!(failures[1].result, Some(MalformedRecordError::EmptyIdentifier));
    }

    #[test]
    fn test_non_string_app_does_not_fail_the_load() {
        let rows = UsageRowAdapter::parse_array(
            r#"[{"start":1,"end":2,"app":42},{"start":2,"end":3,"app":"Mail"}]"#,
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].app_str(), Some("Mail"));

        let failures = UsageRowAdapter::validate_rows(&rows);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 0);
        assert_eq!(failures[0].app, None);

        let ndjson = "{\"start\": 1, \"end\": 2, \"app\": {\"id\": 1}}\n{\"start\": 2, \"end\": 3, \"app\": \"Notes\", \"stream\": 7}\n";
        let rows = UsageRowAdapter::parse_ndjson(ndjson).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(UsageRowAdapter::validate_rows(&rows).len(), 2);
    }

    #[test]
    fn test_missing_file_is_data_access_error() {
        let err = UsageRowAdapter::read_array_file(Path::new("/nonexistent/usage.json")).unwrap_err();
        assert!(matches!(err, EngineError::DataAccess { .. }));
    }
}
