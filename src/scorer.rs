//! Severity scorer
//!
//! Attaches estimated minutes lost, a severity tier and a monetary value to each
//! pattern, then ranks them. The underlying patterns are never modified.

use crate::config::{EngineConfig, LossModel, SeverityThresholds};
use crate::types::{Classification, ClassifiedPattern, DeathLoopPattern, ScoredPattern, UserBaseline};
use std::cmp::Ordering;

/// Scoring inputs taken from the engine config
#[derive(Debug, Clone)]
pub struct SeverityScorer {
    pub loss_model: LossModel,
    pub switch_cost_secs: f64,
    pub hourly_rate: f64,
    pub thresholds: SeverityThresholds,
}

impl SeverityScorer {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            loss_model: config.loss_model,
            switch_cost_secs: config.switch_cost_secs,
            hourly_rate: config.hourly_rate,
            thresholds: config.severity.clone(),
        }
    }

    /// Estimated minutes lost to one pattern under the configured loss model
    pub fn minutes_lost(&self, pattern: &DeathLoopPattern) -> f64 {
        match self.loss_model {
            LossModel::TransitionGap => pattern.total_gap_ms as f64 / 60_000.0,
            LossModel::RoundTrip => pattern.total_dwell_ms as f64 / 60_000.0,
            LossModel::PerSwitch => pattern.frequency as f64 * self.switch_cost_secs / 60.0,
        }
    }

    /// Dollar value of `minutes` at the hourly rate
    pub fn value_of(&self, minutes: f64) -> f64 {
        minutes * self.hourly_rate / 60.0
    }

    /// Score and rank patterns.
    ///
    /// Order: frequency descending, then minutes lost descending, then key ascending.
    pub fn score(&self, patterns: &[DeathLoopPattern], baseline: &UserBaseline) -> Vec<ScoredPattern> {
        let mut scored: Vec<ScoredPattern> = patterns
            .iter()
            .map(|pattern| self.score_one(pattern, baseline))
            .collect();
        scored.sort_by(rank_order);
        scored
    }

    fn score_one(&self, pattern: &DeathLoopPattern, baseline: &UserBaseline) -> ScoredPattern {
        let minutes = self.minutes_lost(pattern);
        let cost = self.value_of(minutes);
        let weekly_cost = if baseline.window_days == 0 {
            0.0
        } else {
            cost / baseline.window_days as f64 * 7.0
        };
        let share_of_switches = if baseline.total_switches == 0 {
            0.0
        } else {
            pattern.frequency as f64 / baseline.total_switches as f64
        };

        ScoredPattern {
            pattern: pattern.clone(),
            total_minutes_lost: minutes,
            severity_tier: self.thresholds.tier_for(minutes),
            cost,
            weekly_cost,
            share_of_switches,
        }
    }
}

/// Ranking comparator shared by the scorer and the report
pub fn rank_order(a: &ScoredPattern, b: &ScoredPattern) -> Ordering {
    b.pattern
        .frequency
        .cmp(&a.pattern.frequency)
        .then_with(|| b.total_minutes_lost.total_cmp(&a.total_minutes_lost))
        .then_with(|| a.pattern.key.cmp(&b.pattern.key))
}

/// Weekly cost of everything that is not a workflow
pub fn estimated_weekly_cost(patterns: &[ClassifiedPattern]) -> f64 {
    patterns
        .iter()
        .filter(|p| p.classification != Classification::Workflow)
        .map(|p| p.scored.weekly_cost)
        .sum()
}
