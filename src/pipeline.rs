//! Pipeline orchestration
//!
//! This module provides the public API for loopwatch.
//! It runs raw usage rows through every stage, from normalization to the
//! rendered intervention scripts and the report.

use crate::canonical::AppCatalog;
use crate::classifier::{PatternAnnotator, WorkflowClassifier};
use crate::config::EngineConfig;
use crate::detector::DeathLoopDetector;
use crate::error::EngineError;
use crate::generator::ScriptGenerator;
use crate::normalizer::{AnalysisWindow, NormalizationWarnings, UsageNormalizer};
use crate::report::{ReportEmitter, UsageReport};
use crate::schema::{RawUsageRow, UsageRowAdapter};
use crate::scorer::{estimated_weekly_cost, SeverityScorer};
use crate::switches::SwitchSequenceBuilder;
use crate::templates::TemplateCatalog;
use crate::types::{ClassifiedPattern, GeneratedScript, ScriptFailure, UserBaseline};
use std::sync::Arc;

const HOUR_MS: i64 = 3_600_000;

/// Everything one run computed
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub window: AnalysisWindow,
    pub baseline: UserBaseline,
    /// Ranked, scored and classified patterns
    pub patterns: Vec<ClassifiedPattern>,
    /// Sum of weekly cost over every non-workflow pattern
    pub estimated_weekly_cost: f64,
    pub scripts: Vec<GeneratedScript>,
    pub failures: Vec<ScriptFailure>,
    pub warnings: NormalizationWarnings,
}

/// Analyze usage rows JSON with the default configuration (stateless, one-shot).
///
/// # Arguments
/// * `rows_json` - JSON array of usage rows
///
/// # Returns
/// Report JSON string
///
/// # Example
/// ```ignore
/// let report_json = usage_to_report(rows_json)?;
/// ```
pub fn usage_to_report(rows_json: String) -> Result<String, EngineError> {
    DeathLoopEngine::new(EngineConfig::default())?.analyze_json(&rows_json)
}

/// Analyze usage rows JSON with a JSON configuration.
///
/// # Arguments
/// * `rows_json` - JSON array of usage rows
/// * `config_json` - Engine configuration; missing fields take their defaults
///
/// # Returns
/// Report JSON string
pub fn usage_to_report_with_config(rows_json: String, config_json: String) -> Result<String, EngineError> {
    let config = EngineConfig::from_json(&config_json)?;
    DeathLoopEngine::new(config)?.analyze_json(&rows_json)
}

/// Reusable engine: validated config, app catalog, template catalog and classifier.
///
/// Construction fails on invalid configuration, before any data is touched.
pub struct DeathLoopEngine {
    config: EngineConfig,
    apps: AppCatalog,
    templates: TemplateCatalog,
    classifier: WorkflowClassifier,
}

impl DeathLoopEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let templates = TemplateCatalog::with_templates(&config.generation.extra_templates)
            .map_err(|e| EngineError::Config(format!("invalid template: {e}")))?;
        let selection = &config.generation.templates;
        for id in [
            &selection.high_frequency,
            &selection.checked_app,
            &selection.fallback,
            &selection.workflow_layout,
        ] {
            if !templates.contains(id) {
                return Err(EngineError::Config(format!("unknown template reference: {id}")));
            }
        }

        Ok(Self {
            apps: AppCatalog::from_config(&config.apps),
            classifier: WorkflowClassifier::new(config.classification.clone()),
            templates,
            config,
        })
    }

    /// Hand ambiguous patterns to an external annotator
    pub fn with_annotator(mut self, annotator: Arc<dyn PatternAnnotator>) -> Self {
        self.classifier = self.classifier.with_annotator(annotator);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn templates(&self) -> &TemplateCatalog {
        &self.templates
    }

    /// Run every stage over the rows.
    ///
    /// Pipeline stages:
    /// 1. UsageNormalizer - Filter, parse, window, sort and canonicalize rows
    /// 2. SwitchSequenceBuilder - Collapse sessions into switches
    /// 3. DeathLoopDetector - Tally pairs and bounces, optionally per shard
    /// 4. SeverityScorer - Minutes lost, tier and cost; rank
    /// 5. WorkflowClassifier - Workflow or distraction
    /// 6. ScriptGenerator - Render interventions
    pub fn analyze(&self, rows: &[RawUsageRow]) -> Analysis {
        let config = &self.config;

        // Stage 1: Normalize rows into events
        let normalized = UsageNormalizer::normalize(rows, config, &self.apps);

        // Stage 2: Build switches
        let switches = SwitchSequenceBuilder::build(&normalized.events, config.bounce_threshold_ms());

        // Stage 3: Aggregate
        let detector = DeathLoopDetector::from_config(config);
        let tally = match config.shard_hours {
            Some(hours) => detector.tally_sharded(&switches, i64::from(hours) * HOUR_MS),
            None => detector.tally(&switches),
        };
        let detection = detector.detect(&tally, normalized.window.days);

        // Stage 4: Score and rank
        let scored = SeverityScorer::from_config(config).score(&detection.patterns, &detection.baseline);

        // Stage 5: Classify
        let patterns = self.classifier.classify_all(scored, &detection.baseline);

        // Stage 6: Generate scripts
        let generated = ScriptGenerator::new(&self.templates, &config.generation, config.bounce_threshold_secs)
            .generate(&patterns);

        log::info!(
            "Analyzed {} rows: {} switches, {} patterns, {} scripts",
            rows.len(),
            detection.baseline.total_switches,
            patterns.len(),
            generated.scripts.len()
        );

        Analysis {
            window: normalized.window,
            baseline: detection.baseline,
            estimated_weekly_cost: estimated_weekly_cost(&patterns),
            patterns,
            scripts: generated.scripts,
            failures: generated.failures,
            warnings: normalized.warnings,
        }
    }

    /// Build the report for an analysis
    pub fn report(&self, analysis: &Analysis) -> UsageReport {
        ReportEmitter::new(self.config.report_top_n).emit(analysis)
    }

    /// Parse rows JSON, analyze, and return the pretty report JSON
    pub fn analyze_json(&self, rows_json: &str) -> Result<String, EngineError> {
        let rows = UsageRowAdapter::parse_array(rows_json)?;
        let analysis = self.analyze(&rows);
        self.report(&analysis).to_json(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportStatus;
    use crate::templates::BOUNCE_KILLER;
    use crate::types::{Classification, ClassificationSource, SeverityTier};
    use pretty_assertions::assert_eq;

    const T0: f64 = 700_000_000.0;

    fn row(start: f64, end: f64, app: &str) -> RawUsageRow {
        RawUsageRow::new(start, Some(end), app, "/app/usage")
    }

    /// Alternating Mail/Notes rows with the given durations, back to back
    fn alternating(durations: impl IntoIterator<Item = f64>) -> Vec<RawUsageRow> {
        let mut t = T0;
        durations
            .into_iter()
            .enumerate()
            .map(|(i, d)| {
                let app = if i % 2 == 0 { "com.apple.mail" } else { "com.apple.Notes" };
                let r = row(t, t + d, app);
                t += d;
                r
            })
            .collect()
    }

    /// Back-to-back rows cycling through `(app, seconds)`
    fn contiguous<'a>(sessions: impl IntoIterator<Item = (&'a str, f64)>) -> Vec<RawUsageRow> {
        let mut t = T0;
        sessions
            .into_iter()
            .map(|(app, d)| {
                let r = row(t, t + d, app);
                t += d;
                r
            })
            .collect()
    }

    fn engine() -> DeathLoopEngine {
        DeathLoopEngine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_bounce_rate_over_a_week() {
        // 10,889 events give 10,888 switches; events 1..=7426 last half a second,
        // so the switch leaving each of them returns within the threshold.
        let rows = alternating((0..10_889).map(|i| if (1..=7_426).contains(&i) { 0.5 } else { 5.0 }));
        let engine = engine();
        let analysis = engine.analyze(&rows);

        assert_eq!(analysis.baseline.total_switches, 10_888);
        assert_eq!(analysis.baseline.bounce_count, 7_426);
        assert_eq!(engine.report(&analysis).bounce_rate, 0.682);

        assert_eq!(analysis.patterns.len(), 1);
        assert_eq!(analysis.patterns[0].scored.pattern.frequency, 10_888);
    }

    #[test]
    fn test_contiguous_store_rows_produce_a_script() {
        let rows = contiguous((0..400).map(|i| {
            let app = if i % 2 == 0 { "com.apple.dt.Xcode" } else { "com.google.ios.youtube" };
            (app, 20.0)
        }));
        let analysis = engine().analyze(&rows);

        let pattern = &analysis.patterns[0];
        assert_eq!(pattern.scored.pattern.frequency, 399);
        assert_eq!(pattern.scored.pattern.avg_gap_secs, 0.0);
        // 399 round trips of 20s
        assert_eq!(pattern.scored.total_minutes_lost, 133.0);
        assert_eq!(pattern.scored.severity_tier, SeverityTier::High);
        assert_eq!(pattern.classification, Classification::Distraction);
        assert!((analysis.estimated_weekly_cost - 133.0 * 50.0 / 60.0).abs() < 1e-9);

        assert_eq!(analysis.scripts.len(), 1);
        assert_eq!(analysis.scripts[0].template_id, BOUNCE_KILLER);
    }

    #[test]
    fn test_two_app_loop_from_raw_rows() {
        // Cursor 20s, Slack half a second. Five of the returns to Cursor detour
        // through Finder, leaving 4,136 Cursor->Slack and 4,130 Slack->Cursor.
        let mut sessions = Vec::new();
        for i in 0..4_136 {
            sessions.push(("com.todesktop.230313mzl4w4u92", 20.0));
            sessions.push(("com.tinyspeck.slackmacgap", 0.5));
            if i < 5 {
                sessions.push(("com.apple.finder", 0.5));
            }
        }
        let engine = engine();
        let analysis = engine.analyze(&contiguous(sessions));

        let pattern = &analysis.patterns[0];
        assert_eq!(pattern.scored.pattern.key.app_a, "Cursor");
        assert_eq!(pattern.scored.pattern.key.app_b, "Slack");
        assert_eq!(pattern.scored.pattern.frequency, 8_266);
        assert_eq!(pattern.scored.pattern.directional_counts.a_to_b, 4_136);
        assert_eq!(pattern.scored.pattern.directional_counts.b_to_a, 4_130);
        assert_eq!(pattern.scored.severity_tier, SeverityTier::High);
        assert_eq!(pattern.classification, Classification::Distraction);
        assert_eq!(pattern.source, ClassificationSource::Rule);

        // Every Slack->Cursor return came half a second after Cursor->Slack
        assert_eq!(analysis.baseline.bounce_count, 4_130);
        assert_eq!(analysis.baseline.total_switches, 8_276);

        assert_eq!(analysis.scripts.len(), 1);
        assert_eq!(analysis.scripts[0].template_id, BOUNCE_KILLER);
        let report = engine.report(&analysis);
        assert_eq!(report.top_patterns[0].severity_tier, SeverityTier::High);
        assert_eq!(report.generated_scripts[0].template_id, BOUNCE_KILLER);
    }

    #[test]
    fn test_non_string_app_is_skipped_not_fatal() {
        let mut rows: Vec<serde_json::Value> = alternating([30.0; 10])
            .iter()
            .map(|r| serde_json::to_value(r).unwrap())
            .collect();
        rows.push(serde_json::json!({ "start": T0 + 300.0, "end": T0 + 310.0, "app": 42 }));
        let json = serde_json::Value::Array(rows).to_string();

        let report = usage_to_report(json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(value["total_switches"], 9);
        assert_eq!(value["warnings"]["malformed_rows"], 1);
        assert_eq!(value["status"], "ok_with_warnings");
    }

    #[test]
    fn test_unknown_identifier_passes_through() {
        let mut rows = alternating([30.0; 20]);
        for r in rows.iter_mut().skip(1).step_by(2) {
            r.app = Some("com.example.Mystery".into());
        }
        let analysis = engine().analyze(&rows);

        assert_eq!(analysis.warnings.unresolved_identifiers, vec!["com.example.Mystery"]);
        assert_eq!(analysis.patterns[0].scored.pattern.key.app_a, "Mail");
        assert_eq!(analysis.patterns[0].scored.pattern.key.app_b, "com.example.Mystery");
        assert_eq!(analysis.baseline.total_switches, 19);
        assert_eq!(engine().report(&analysis).status, ReportStatus::OkWithWarnings);
    }

    #[test]
    fn test_empty_identifier_counts_once() {
        let clean = alternating([10.0; 12]);
        let mut dirty = clean.clone();
        dirty.insert(5, row(T0 + 45.0, T0 + 47.0, "   "));

        let engine = engine();
        let clean_analysis = engine.analyze(&clean);
        let dirty_analysis = engine.analyze(&dirty);

        assert_eq!(dirty_analysis.warnings.malformed_rows, 1);
        assert_eq!(dirty_analysis.baseline, clean_analysis.baseline);
        assert_eq!(dirty_analysis.patterns, clean_analysis.patterns);
    }

    #[test]
    fn test_reruns_are_byte_identical() {
        // 7s sessions with 3s of dead time: 399 round trips of 10s each
        let rows: Vec<RawUsageRow> = (0..400)
            .map(|i| {
                let app = if i % 2 == 0 { "com.apple.mail" } else { "com.apple.Notes" };
                let start = T0 + f64::from(i) * 10.0;
                row(start, start + 7.0, app)
            })
            .collect();
        let engine = engine();

        let first = engine.analyze(&rows);
        let second = engine.analyze(&rows);
        assert_eq!(
            engine.report(&first).to_json(true).unwrap(),
            engine.report(&second).to_json(true).unwrap()
        );
        let sources = |a: &Analysis| a.scripts.iter().map(|s| s.rendered_source.clone()).collect::<Vec<_>>();
        assert_eq!(sources(&first), sources(&second));
        assert_eq!(first.scripts.len(), 1);
        assert_eq!(first.scripts[0].template_id, BOUNCE_KILLER);
    }

    #[test]
    fn test_sharded_run_matches_single_pass() {
        // Spread across several hours so the shards are real
        let rows = alternating((0..3_000).map(|i| if i % 4 == 0 { 0.6 } else { 20.0 }));
        let single = engine().analyze(&rows);
        let sharded = DeathLoopEngine::new(EngineConfig {
            shard_hours: Some(1),
            ..EngineConfig::default()
        })
        .unwrap()
        .analyze(&rows);

        assert_eq!(sharded.baseline, single.baseline);
        assert_eq!(sharded.patterns, single.patterns);
    }

    #[test]
    fn test_ide_and_browser_is_laid_out_not_blocked() {
        let rows: Vec<RawUsageRow> = (0..40)
            .map(|i| {
                let app = if i % 2 == 0 { "com.todesktop.230313mzl4w4u92" } else { "com.apple.Safari" };
                let start = T0 + f64::from(i) * 60.0;
                row(start, start + 55.0, app)
            })
            .collect();
        let analysis = engine().analyze(&rows);

        let pattern = &analysis.patterns[0];
        assert_eq!(pattern.classification, Classification::Workflow);
        assert_eq!(pattern.source, ClassificationSource::Rule);
        assert_eq!(analysis.estimated_weekly_cost, 0.0);
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let config = EngineConfig {
            bounce_threshold_secs: -1.0,
            ..EngineConfig::default()
        };
        assert!(matches!(DeathLoopEngine::new(config), Err(EngineError::Config(_))));

        let mut config = EngineConfig::default();
        config.generation.templates.fallback = "nap-time".to_string();
        assert!(matches!(DeathLoopEngine::new(config), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_usage_to_report_json() {
        let rows = alternating([2.0; 30]);
        let json = serde_json::to_string(&rows).unwrap();
        let report = usage_to_report(json.clone()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&report).unwrap();

        assert_eq!(value["total_switches"], 29);
        assert_eq!(value["producer"]["name"], "loopwatch");

        let custom = usage_to_report_with_config(json, r#"{"min_pattern_frequency": 100}"#.to_string()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&custom).unwrap();
        assert_eq!(value["top_patterns"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn test_empty_input() {
        let analysis = engine().analyze(&[]);
        assert_eq!(analysis.baseline.total_switches, 0);
        assert_eq!(analysis.baseline.bounce_rate, 0.0);
        assert!(analysis.patterns.is_empty());
        assert_eq!(analysis.window.end, None);
    }
}
