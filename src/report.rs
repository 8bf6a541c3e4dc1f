//! Report emitter
//!
//! Formats an [`Analysis`] into the stable report document. Values are only
//! rounded for presentation; nothing is recomputed here. The report carries no
//! wall-clock time or random ids so identical runs serialize identically.

use crate::error::EngineError;
use crate::normalizer::NormalizationWarnings;
use crate::pipeline::Analysis;
use crate::types::{Classification, ClassificationSource, ClassifiedPattern, DirectionalCounts, SeverityTier};
use crate::{LOOPWATCH_VERSION, PRODUCER_NAME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current report format version
pub const REPORT_VERSION: &str = "1.0.0";

/// Overall outcome of a run that produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Ok,
    /// Rows were skipped, identifiers went unresolved or a script failed to render
    OkWithWarnings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
}

/// One ranked pattern as reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPattern {
    pub rank: usize,
    pub apps: [String; 2],
    pub frequency: u64,
    pub directional_counts: DirectionalCounts,
    pub avg_gap_secs: f64,
    pub minutes_lost: f64,
    pub severity_tier: SeverityTier,
    pub classification: Classification,
    pub classification_source: ClassificationSource,
    pub cost: f64,
    pub weekly_cost: f64,
}

/// Manifest entry for a rendered script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportScript {
    pub template_id: String,
    pub target_apps: Vec<String>,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportScriptFailure {
    pub apps: [String; 2],
    pub template_id: String,
    pub error: String,
}

/// The run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub report_version: String,
    pub producer: ReportProducer,
    pub status: ReportStatus,
    pub window_days: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_end: Option<DateTime<Utc>>,
    pub total_switches: u64,
    pub bounce_count: u64,
    pub bounce_rate: f64,
    pub rapid_switches: u64,
    pub distinct_apps: usize,
    pub top_patterns: Vec<ReportPattern>,
    pub estimated_weekly_cost: f64,
    pub generated_scripts: Vec<ReportScript>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub script_failures: Vec<ReportScriptFailure>,
    pub warnings: NormalizationWarnings,
}

/// Builds [`UsageReport`]s
pub struct ReportEmitter {
    top_n: usize,
}

impl Default for ReportEmitter {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ReportEmitter {
    /// Emitter listing at most `top_n` patterns
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }

    pub fn emit(&self, analysis: &Analysis) -> UsageReport {
        let baseline = &analysis.baseline;
        let status = if analysis.warnings.has_warnings() || !analysis.failures.is_empty() {
            ReportStatus::OkWithWarnings
        } else {
            ReportStatus::Ok
        };

        UsageReport {
            report_version: REPORT_VERSION.to_string(),
            producer: ReportProducer {
                name: PRODUCER_NAME.to_string(),
                version: LOOPWATCH_VERSION.to_string(),
            },
            status,
            window_days: analysis.window.days,
            window_start: analysis.window.start,
            window_end: analysis.window.end,
            total_switches: baseline.total_switches,
            bounce_count: baseline.bounce_count,
            bounce_rate: round_to(baseline.bounce_rate, 3),
            rapid_switches: baseline.rapid_switches,
            distinct_apps: baseline.distinct_apps,
            top_patterns: analysis
                .patterns
                .iter()
                .take(self.top_n)
                .enumerate()
                .map(|(i, p)| report_pattern(i + 1, p))
                .collect(),
            estimated_weekly_cost: round_to(analysis.estimated_weekly_cost, 2),
            generated_scripts: analysis
                .scripts
                .iter()
                .map(|s| ReportScript {
                    template_id: s.template_id.clone(),
                    target_apps: s.target_apps.clone(),
                    file_name: s.file_name.clone(),
                })
                .collect(),
            script_failures: analysis
                .failures
                .iter()
                .map(|f| ReportScriptFailure {
                    apps: [f.pattern_key.app_a.clone(), f.pattern_key.app_b.clone()],
                    template_id: f.template_id.clone(),
                    error: f.error.clone(),
                })
                .collect(),
            warnings: analysis.warnings.clone(),
        }
    }

    /// Emit as JSON
    pub fn emit_json(&self, analysis: &Analysis, pretty: bool) -> Result<String, EngineError> {
        self.emit(analysis).to_json(pretty)
    }
}

impl UsageReport {
    pub fn to_json(&self, pretty: bool) -> Result<String, EngineError> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(json)
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Plain-text rendering for terminals
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for UsageReport {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(out, "{} {} report ({}-day window)", self.producer.name, self.producer.version, self.window_days)?;
        if let (Some(start), Some(end)) = (self.window_start, self.window_end) {
            writeln!(out, "Window: {} .. {}", start.to_rfc3339(), end.to_rfc3339())?;
        }
        writeln!(
            out,
            "Switches: {}  Bounces: {} ({:.1}%)  Rapid: {}  Apps: {}",
            self.total_switches,
            self.bounce_count,
            self.bounce_rate * 100.0,
            self.rapid_switches,
            self.distinct_apps
        )?;
        writeln!(out, "Estimated weekly cost: ${:.2}", self.estimated_weekly_cost)?;

        writeln!(out)?;
        if self.top_patterns.is_empty() {
            writeln!(out, "No death loops found.")?;
        } else {
            writeln!(out, "Top patterns:")?;
            for p in &self.top_patterns {
                writeln!(
                    out,
                    "{:>3}. {} <-> {}  x{} ({}/{})  {:.2} min  {}  {} [{}]  ${:.2}/week",
                    p.rank,
                    p.apps[0],
                    p.apps[1],
                    p.frequency,
                    p.directional_counts.a_to_b,
                    p.directional_counts.b_to_a,
                    p.minutes_lost,
                    p.severity_tier.as_str(),
                    p.classification.as_str(),
                    source_label(p.classification_source),
                    p.weekly_cost
                )?;
            }
        }

        if !self.generated_scripts.is_empty() {
            writeln!(out)?;
            writeln!(out, "Scripts:")?;
            for s in &self.generated_scripts {
                writeln!(out, "  {}  ({}: {})", s.file_name, s.template_id, s.target_apps.join(", "))?;
            }
        }
        if !self.script_failures.is_empty() {
            writeln!(out)?;
            writeln!(out, "Script failures:")?;
            for f in &self.script_failures {
                writeln!(out, "  {} for {} <-> {}: {}", f.template_id, f.apps[0], f.apps[1], f.error)?;
            }
        }

        let w = &self.warnings;
        if w.malformed_rows > 0 || !w.unresolved_identifiers.is_empty() {
            writeln!(out)?;
            writeln!(out, "Warnings:")?;
            if w.malformed_rows > 0 {
                writeln!(out, "  {} malformed rows skipped", w.malformed_rows)?;
            }
            for id in &w.unresolved_identifiers {
                writeln!(out, "  unresolved app identifier: {id}")?;
            }
        }
        Ok(())
    }
}

fn report_pattern(rank: usize, classified: &ClassifiedPattern) -> ReportPattern {
    let scored = &classified.scored;
    let pattern = &scored.pattern;
    ReportPattern {
        rank,
        apps: [pattern.key.app_a.clone(), pattern.key.app_b.clone()],
        frequency: pattern.frequency,
        directional_counts: pattern.directional_counts,
        avg_gap_secs: round_to(pattern.avg_gap_secs, 3),
        minutes_lost: round_to(scored.total_minutes_lost, 2),
        severity_tier: scored.severity_tier,
        classification: classified.classification,
        classification_source: classified.source,
        cost: round_to(scored.cost, 2),
        weekly_cost: round_to(scored.weekly_cost, 2),
    }
}

fn source_label(source: ClassificationSource) -> &'static str {
    match source {
        ClassificationSource::Rule => "rule",
        ClassificationSource::Annotation => "annotation",
        ClassificationSource::Default => "default",
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
