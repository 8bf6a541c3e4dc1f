//! usage.row.v1 input schema
//!
//! One row of the usage store: `(start_offset, end_offset_or_null,
//! app_identifier, stream_tag)`. Offsets are seconds since the store's
//! reference epoch. Field names of the source table are accepted as aliases so
//! exported rows can be fed in unchanged.

use crate::error::MalformedRecordError;
use serde::{Deserialize, Serialize};

/// Current input schema version
pub const SCHEMA_VERSION: &str = "usage.row.v1";

/// A timestamp as it appears in the input: a number, a numeric string, or junk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Seconds(f64),
    Text(String),
    /// Anything else; always malformed
    Other(serde_json::Value),
}

impl RawTimestamp {
    /// Offset in seconds, or a description of why it cannot be read
    pub fn as_seconds(&self) -> Result<f64, String> {
        let value = match self {
            RawTimestamp::Seconds(value) => *value,
            RawTimestamp::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("{text:?} is not a number"))?,
            RawTimestamp::Other(value) => return Err(format!("{value} is not a number")),
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err(format!("{value} is not finite"))
        }
    }
}

/// A text field as it appears in the input: a string, or any other JSON value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawText {
    Text(String),
    /// Anything else; malformed
    Other(serde_json::Value),
}

impl RawText {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawText::Text(text) => Some(text),
            RawText::Other(_) => None,
        }
    }
}

impl From<&str> for RawText {
    fn from(text: &str) -> Self {
        RawText::Text(text.to_string())
    }
}

/// One raw usage row
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawUsageRow {
    #[serde(default, alias = "start_offset", alias = "ZSTARTDATE")]
    pub start: Option<RawTimestamp>,

    /// Null when the interval was still open at export time
    #[serde(default, alias = "end_offset", alias = "ZENDDATE")]
    pub end: Option<RawTimestamp>,

    #[serde(default, alias = "app_identifier", alias = "bundle_id", alias = "ZVALUESTRING")]
    pub app: Option<RawText>,

    #[serde(
        default,
        alias = "stream_tag",
        alias = "ZSTREAMNAME",
        skip_serializing_if = "Option::is_none"
    )]
    pub stream: Option<RawText>,
}

/// A row whose fields all parsed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedRow<'a> {
    pub start_secs: f64,
    pub end_secs: Option<f64>,
    pub app: &'a str,
}

impl RawUsageRow {
    /// Create a row from numeric offsets
    pub fn new(start: f64, end: Option<f64>, app: &str, stream: &str) -> Self {
        Self {
            start: Some(RawTimestamp::Seconds(start)),
            end: end.map(RawTimestamp::Seconds),
            app: Some(RawText::from(app)),
            stream: Some(RawText::from(stream)),
        }
    }

    /// The app identifier, when it is a string
    pub fn app_str(&self) -> Option<&str> {
        self.app.as_ref().and_then(RawText::as_str)
    }

    /// The stream tag, when it is a string
    pub fn stream_str(&self) -> Option<&str> {
        self.stream.as_ref().and_then(RawText::as_str)
    }

    /// Parse the row's fields, reporting the first problem found
    pub fn parse(&self) -> Result<ParsedRow<'_>, MalformedRecordError> {
        let app = match &self.app {
            None => "",
            Some(RawText::Text(text)) => text.trim(),
            Some(RawText::Other(value)) => {
                return Err(MalformedRecordError::NonTextField {
                    field: "app",
                    value: value.to_string(),
                })
            }
        };
        if let Some(RawText::Other(value)) = &self.stream {
            return Err(MalformedRecordError::NonTextField {
                field: "stream",
                value: value.to_string(),
            });
        }
        if app.is_empty() {
            return Err(MalformedRecordError::EmptyIdentifier);
        }

        let start_secs = self
            .start
            .as_ref()
            .ok_or(MalformedRecordError::MissingStart)?
            .as_seconds()
            .map_err(MalformedRecordError::UnparsableStart)?;

        let end_secs = self
            .end
            .as_ref()
            .map(|end| end.as_seconds().map_err(MalformedRecordError::UnparsableEnd))
            .transpose()?;

        if let Some(end) = end_secs {
            if end < start_secs {
                return Err(MalformedRecordError::EndBeforeStart);
            }
        }

        Ok(ParsedRow {
            start_secs,
            end_secs,
            app,
        })
    }

    pub fn validate(&self) -> Result<(), MalformedRecordError> {
        self.parse().map(|_| ())
    }
}
