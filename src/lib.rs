//! loopwatch - On-device detection of app-switching death loops
//!
//! loopwatch turns raw app-usage rows into a ranked report of compulsive
//! switching patterns through a deterministic pipeline: row normalization →
//! switch extraction → pattern detection → severity scoring → classification
//! → intervention script generation.
//!
//! Detected distraction loops get a ready-to-load Hammerspoon (Lua) module
//! built from a fixed template catalog; parameters are escaped, never
//! interpolated raw.
//!
//! ```no_run
//! use loopwatch::usage_to_report;
//!
//! let rows = std::fs::read_to_string("usage.json").unwrap();
//! let report_json = usage_to_report(rows).unwrap();
//! println!("{}", report_json);
//! ```

pub mod canonical;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod error;
pub mod generator;
pub mod normalizer;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod scorer;
pub mod switches;
pub mod templates;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use classifier::{AnnotationContext, PatternAnnotator};
pub use config::EngineConfig;
pub use error::{EngineError, MalformedRecordError, TemplateRenderError};
pub use pipeline::{usage_to_report, usage_to_report_with_config, Analysis, DeathLoopEngine};
pub use report::{ReportEmitter, UsageReport};
pub use templates::TemplateCatalog;

// Schema exports
pub use schema::{RawUsageRow, UsageRowAdapter, SCHEMA_VERSION};

/// loopwatch version embedded in every report
pub const LOOPWATCH_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "loopwatch";
