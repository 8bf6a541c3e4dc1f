//! Error types for loopwatch

use thiserror::Error;

/// Fatal errors that abort an analysis run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "Cannot read usage data at {path}: {reason}. Grant read access to the source \
         (e.g. Full Disk Access for the terminal) or supply an alternate path to a copy of it"
    )]
    DataAccess { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse usage rows: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Template render failed: {0}")]
    TemplateRender(#[from] TemplateRenderError),
}

impl EngineError {
    pub fn data_access(path: impl Into<String>, reason: impl ToString) -> Self {
        EngineError::DataAccess {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Reasons a single usage row is skipped during normalization.
///
/// These never abort a run; the normalizer counts them as warnings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedRecordError {
    #[error("empty app identifier")]
    EmptyIdentifier,

    #[error("missing start timestamp")]
    MissingStart,

    #[error("unparsable start timestamp: {0}")]
    UnparsableStart(String),

    #[error("unparsable end timestamp: {0}")]
    UnparsableEnd(String),

    #[error("timestamp out of range: {0}")]
    OutOfRange(f64),

    #[error("end timestamp precedes start")]
    EndBeforeStart,

    #[error("{field} is not a string: {value}")]
    NonTextField { field: &'static str, value: String },
}

/// Failure to render one intervention script.
///
/// Fatal only for the pattern being rendered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateRenderError {
    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    #[error("template {template} is missing required parameter {parameter}")]
    MissingParameter { template: String, parameter: String },

    #[error("template {template} parameter {parameter} must be {expected}")]
    InvalidParameter {
        template: String,
        parameter: String,
        expected: String,
    },

    #[error("app name {name:?} cannot be embedded in a Lua string literal: {reason}")]
    UnsafeAppName { name: String, reason: String },

    #[error("template {template} is malformed: {reason}")]
    MalformedTemplate { template: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_access_message_names_remediation() {
        let err = EngineError::data_access("/tmp/knowledgeC.db", "permission denied");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/knowledgeC.db"));
        assert!(msg.contains("Grant read access"));
        assert!(msg.contains("alternate path"));
    }

    #[test]
    fn test_render_error_converts_into_engine_error() {
        let err: EngineError = TemplateRenderError::UnknownTemplate("nope".to_string()).into();
        assert!(matches!(err, EngineError::TemplateRender(_)));
        assert_eq!(err.to_string(), "Template render failed: unknown template: nope");
    }
}
