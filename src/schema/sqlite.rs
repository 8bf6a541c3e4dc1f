//! Read-only loader for the SQLite usage store
//!
//! The store keeps app usage in the `ZOBJECT` table: `ZSTARTDATE` and
//! `ZENDDATE` are reference-epoch offsets, `ZVALUESTRING` the bundle id and
//! `ZSTREAMNAME` the stream tag. Copying the database out of its protected
//! location is left to the caller.

use crate::error::EngineError;
use crate::schema::raw_row::{RawText, RawTimestamp, RawUsageRow};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::Path;

const SELECT_ALL: &str = "SELECT ZSTARTDATE, ZENDDATE, ZVALUESTRING, ZSTREAMNAME
     FROM ZOBJECT
     ORDER BY ZSTARTDATE";

const SELECT_STREAM: &str = "SELECT ZSTARTDATE, ZENDDATE, ZVALUESTRING, ZSTREAMNAME
     FROM ZOBJECT
     WHERE ZSTREAMNAME = ?1
     ORDER BY ZSTARTDATE";

/// Open the database read-only and load its usage rows.
///
/// With `stream_tag` set, only rows of that stream are read.
pub fn load_rows(path: &Path, stream_tag: Option<&str>) -> Result<Vec<RawUsageRow>, EngineError> {
    let display = path.display().to_string();
    if !path.exists() {
        return Err(EngineError::data_access(display, "file not found"));
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| EngineError::data_access(display.clone(), e))?;

    let rows = load_rows_from_connection(&conn, stream_tag)
        .map_err(|e| EngineError::data_access(display, e))?;

    log::info!("Loaded {} usage rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Load usage rows from an open connection
pub fn load_rows_from_connection(
    conn: &Connection,
    stream_tag: Option<&str>,
) -> rusqlite::Result<Vec<RawUsageRow>> {
    match stream_tag {
        Some(tag) if !tag.is_empty() => {
            let mut stmt = conn.prepare(SELECT_STREAM)?;
            let rows = stmt.query_map(params![tag], row_to_usage)?;
            rows.collect()
        }
        _ => {
            let mut stmt = conn.prepare(SELECT_ALL)?;
            let rows = stmt.query_map([], row_to_usage)?;
            rows.collect()
        }
    }
}

fn row_to_usage(row: &Row<'_>) -> rusqlite::Result<RawUsageRow> {
    Ok(RawUsageRow {
        start: timestamp_value(row.get_ref(0)?),
        end: timestamp_value(row.get_ref(1)?),
        app: text_value(row.get_ref(2)?),
        stream: text_value(row.get_ref(3)?),
    })
}

// Bad cells become malformed rows for the normalizer instead of failing the load.
fn timestamp_value(value: ValueRef<'_>) -> Option<RawTimestamp> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(RawTimestamp::Seconds(i as f64)),
        ValueRef::Real(f) => Some(RawTimestamp::Seconds(f)),
        ValueRef::Text(bytes) => Some(RawTimestamp::Text(
            String::from_utf8_lossy(bytes).into_owned(),
        )),
        ValueRef::Blob(_) => Some(RawTimestamp::Other(serde_json::Value::String(
            "<blob>".to_string(),
        ))),
    }
}

fn text_value(value: ValueRef<'_>) -> Option<RawText> {
    match value {
        ValueRef::Text(bytes) => Some(RawText::Text(String::from_utf8_lossy(bytes).into_owned())),
        ValueRef::Integer(i) => Some(RawText::Text(i.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE ZOBJECT (
                Z_PK INTEGER PRIMARY KEY,
                ZSTARTDATE TIMESTAMP,
                ZENDDATE TIMESTAMP,
                ZVALUESTRING VARCHAR,
                ZSTREAMNAME VARCHAR
            );",
        )
        .unwrap();

        let rows: [(f64, Option<f64>, Option<&str>, &str); 4] = [
            (700_000_010.0, Some(700_000_020.0), Some("com.apple.Safari"), "/app/usage"),
            (700_000_000.0, Some(700_000_010.0), Some("com.tinyspeck.slackmacgap"), "/app/usage"),
            (700_000_020.0, None, None, "/app/usage"),
            (700_000_000.0, Some(700_000_100.0), Some("com.apple.Safari"), "/display/isBacklit"),
        ];
        for (start, end, app, stream) in rows {
            conn.execute(
                "INSERT INTO ZOBJECT (ZSTARTDATE, ZENDDATE, ZVALUESTRING, ZSTREAMNAME)
                 VALUES (?1, ?2, ?3, ?4)",
                params![start, end, app, stream],
            )
            .unwrap();
        }
        conn
    }

    #[test]
    fn test_load_stream_rows_in_start_order() {
        let conn = usage_db();
        let rows = load_rows_from_connection(&conn, Some("/app/usage")).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].app_str(), Some("com.tinyspeck.slackmacgap"));
        assert_eq!(rows[0].start, Some(RawTimestamp::Seconds(700_000_000.0)));
        assert_eq!(rows[1].app_str(), Some("com.apple.Safari"));
        // Null identifier survives the load and is left for the normalizer to flag
        assert_eq!(rows[2].app, None);
        assert_eq!(rows[2].end, None);
    }

    #[test]
    fn test_load_all_streams() {
        let conn = usage_db();
        let rows = load_rows_from_connection(&conn, None).unwrap();
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn test_missing_database_is_data_access_error() {
        let err = load_rows(Path::new("/nonexistent/knowledgeC.db"), None).unwrap_err();
        assert!(matches!(err, EngineError::DataAccess { .. }));
        assert!(err.to_string().contains("alternate path"));
    }

    #[test]
    fn test_missing_table_fails_load() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(load_rows_from_connection(&conn, None).is_err());
    }
}
