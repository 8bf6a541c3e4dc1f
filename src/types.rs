//! Core types for the loopwatch pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: usage events, app switches, aggregated death-loop patterns, scored
//! and classified patterns, and the intervention specs rendered into scripts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A single foreground interval of one application.
///
/// Half-open `[start, end)` with `start < end`. The app id is already canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub app_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Index of the raw row this event came from
    pub source_index: usize,
}

impl UsageEvent {
    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }
}

/// A transition from one app session to the next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchEvent {
    pub from_app: String,
    pub to_app: String,
    /// Start of the session in `to_app`
    pub timestamp: DateTime<Utc>,
    /// Dead time between leaving `from_app` and entering `to_app` (ms, never negative)
    pub gap_ms: i64,
    /// Time since the previous switch into `from_app` (ms)
    pub dwell_ms: i64,
    /// Gap below the bounce threshold
    pub is_bounce_candidate: bool,
}

impl SwitchEvent {
    pub fn gap_secs(&self) -> f64 {
        self.gap_ms as f64 / 1000.0
    }

    pub fn dwell_secs(&self) -> f64 {
        self.dwell_ms as f64 / 1000.0
    }
}

/// Unordered app pair, stored in lexicographic order
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternKey {
    pub app_a: String,
    pub app_b: String,
}

impl PatternKey {
    /// Build the canonical key for two apps. Returns `None` when both are the same app.
    pub fn new(first: &str, second: &str) -> Option<Self> {
        match first.cmp(second) {
            Ordering::Less => Some(Self {
                app_a: first.to_string(),
                app_b: second.to_string(),
            }),
            Ordering::Greater => Some(Self {
                app_a: second.to_string(),
                app_b: first.to_string(),
            }),
            Ordering::Equal => None,
        }
    }

    pub fn contains(&self, app: &str) -> bool {
        self.app_a == app || self.app_b == app
    }

    /// The other side of the pair, if `app` is part of it
    pub fn other(&self, app: &str) -> Option<&str> {
        if self.app_a == app {
            Some(&self.app_b)
        } else if self.app_b == app {
            Some(&self.app_a)
        } else {
            None
        }
    }

    pub fn apps(&self) -> [&str; 2] {
        [&self.app_a, &self.app_b]
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.app_a, self.app_b)
    }
}

/// Switch counts in each direction of a pattern key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionalCounts {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

impl DirectionalCounts {
    pub fn total(&self) -> u64 {
        self.a_to_b + self.b_to_a
    }

    /// min/max of the two directions; 1.0 is perfectly balanced traffic
    pub fn symmetry(&self) -> f64 {
        let max = self.a_to_b.max(self.b_to_a);
        if max == 0 {
            return 0.0;
        }
        self.a_to_b.min(self.b_to_a) as f64 / max as f64
    }
}

/// Aggregated traffic between one app pair over the analysis window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeathLoopPattern {
    pub key: PatternKey,
    pub directional_counts: DirectionalCounts,
    /// Always `directional_counts.total()`
    pub frequency: u64,
    pub avg_gap_secs: f64,
    /// Average seconds spent in `app_a` before switching to `app_b`
    pub avg_dwell_a_secs: f64,
    /// Average seconds spent in `app_b` before switching to `app_a`
    pub avg_dwell_b_secs: f64,
    pub total_gap_ms: i64,
    pub total_dwell_ms: i64,
}

impl DeathLoopPattern {
    /// Average dwell per switch across both directions
    pub fn avg_dwell_secs(&self) -> f64 {
        if self.frequency == 0 {
            return 0.0;
        }
        self.total_dwell_ms as f64 / 1000.0 / self.frequency as f64
    }

    /// Average dwell in one side of the pair before leaving for the other
    pub fn avg_dwell_in(&self, app: &str) -> Option<f64> {
        if self.key.app_a == app {
            Some(self.avg_dwell_a_secs)
        } else if self.key.app_b == app {
            Some(self.avg_dwell_b_secs)
        } else {
            None
        }
    }

    /// Switches that landed in `app`
    pub fn arrivals_in(&self, app: &str) -> Option<u64> {
        if self.key.app_a == app {
            Some(self.directional_counts.b_to_a)
        } else if self.key.app_b == app {
            Some(self.directional_counts.a_to_b)
        } else {
            None
        }
    }
}

/// Run-level switching statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBaseline {
    pub total_switches: u64,
    pub bounce_count: u64,
    /// `bounce_count / total_switches`, 0 when there are no switches
    pub bounce_rate: f64,
    /// Switches whose gap is under the rapid-switch window
    pub rapid_switches: u64,
    pub distinct_apps: usize,
    pub switches_per_day: f64,
    pub window_days: u32,
}

impl UserBaseline {
    pub fn new(
        total_switches: u64,
        bounce_count: u64,
        rapid_switches: u64,
        distinct_apps: usize,
        window_days: u32,
    ) -> Self {
        let bounce_rate = if total_switches == 0 {
            0.0
        } else {
            (bounce_count as f64 / total_switches as f64).clamp(0.0, 1.0)
        };
        let switches_per_day = if window_days == 0 {
            0.0
        } else {
            total_switches as f64 / window_days as f64
        };

        Self {
            total_switches,
            bounce_count,
            bounce_rate,
            rapid_switches,
            distinct_apps,
            switches_per_day,
            window_days,
        }
    }
}

/// Discrete bucket of estimated minutes lost
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTier {
    Low,
    Medium,
    High,
}

impl SeverityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityTier::Low => "low",
            SeverityTier::Medium => "medium",
            SeverityTier::High => "high",
        }
    }
}

/// A pattern with its cost attached. The wrapped pattern is never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPattern {
    pub pattern: DeathLoopPattern,
    pub total_minutes_lost: f64,
    pub severity_tier: SeverityTier,
    /// Monetary value of the time lost over the window
    pub cost: f64,
    /// `cost` normalized to the window length, then scaled to seven days:
    /// `cost / window_days x 7`. Equals `cost` for the default 7-day window.
    pub weekly_cost: f64,
    /// Fraction of all switches in the window that belong to this pattern
    pub share_of_switches: f64,
}

/// Workflow-vs-distraction verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Workflow,
    Distraction,
    Ambiguous,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Workflow => "workflow",
            Classification::Distraction => "distraction",
            Classification::Ambiguous => "ambiguous",
        }
    }
}

/// Where a classification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// Decided by the allow/deny/symmetry rules
    Rule,
    /// Supplied by an external annotator
    Annotation,
    /// Ambiguous with no usable annotation in time
    Default,
}

/// Broad role of an application, used by the classifier and generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppRole {
    Development,
    Browser,
    Communication,
    Entertainment,
    Productivity,
    Utility,
}

/// A scored pattern with its classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedPattern {
    pub scored: ScoredPattern,
    pub classification: Classification,
    pub source: ClassificationSource,
    pub roles: [Option<AppRole>; 2],
}

impl ClassifiedPattern {
    pub fn key(&self) -> &PatternKey {
        &self.scored.pattern.key
    }

    pub fn role_of(&self, app: &str) -> Option<AppRole> {
        let key = self.key();
        if key.app_a == app {
            self.roles[0]
        } else if key.app_b == app {
            self.roles[1]
        } else {
            None
        }
    }
}

/// Value bound to a template parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

/// One intervention to render for one pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionSpec {
    pub pattern_key: PatternKey,
    pub template_id: String,
    pub parameters: BTreeMap<String, ParamValue>,
    pub target_apps: Vec<String>,
}

/// Rendered automation source for one intervention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedScript {
    pub template_id: String,
    pub pattern_key: PatternKey,
    pub target_apps: Vec<String>,
    pub file_name: String,
    pub rendered_source: String,
}

/// A script that could not be rendered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptFailure {
    pub pattern_key: PatternKey,
    pub template_id: String,
    pub error: String,
}
