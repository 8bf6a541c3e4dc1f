//! Death-loop detector
//!
//! Tallies switch traffic per unordered app pair over the whole analysis window
//! and counts A→B→A bounce-backs. Strict alternation is not required: any
//! repeated traffic between the same two apps lands in one pattern.
//!
//! Tallies are plain sums over integer milliseconds, so tallies of contiguous
//! shards merge into exactly the single-pass result.

use crate::config::EngineConfig;
use crate::types::{DeathLoopPattern, DirectionalCounts, PatternKey, SwitchEvent, UserBaseline};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Running sums for one app pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairTally {
    pub a_to_b: u64,
    pub b_to_a: u64,
    pub gap_ms: i64,
    /// Time spent in `app_a` before switching to `app_b`
    pub dwell_a_ms: i64,
    /// Time spent in `app_b` before switching to `app_a`
    pub dwell_b_ms: i64,
}

impl PairTally {
    fn add(&mut self, other: &PairTally) {
        self.a_to_b += other.a_to_b;
        self.b_to_a += other.b_to_a;
        self.gap_ms += other.gap_ms;
        self.dwell_a_ms += other.dwell_a_ms;
        self.dwell_b_ms += other.dwell_b_ms;
    }

    pub fn frequency(&self) -> u64 {
        self.a_to_b + self.b_to_a
    }
}

/// Aggregate over a run of switches. Mergeable by summation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternTally {
    pub pairs: BTreeMap<PatternKey, PairTally>,
    pub total_switches: u64,
    pub bounce_count: u64,
    pub rapid_switches: u64,
    pub apps: BTreeSet<String>,
}

impl PatternTally {
    /// Merge another tally into this one. Associative and commutative.
    pub fn merge(mut self, other: PatternTally) -> PatternTally {
        for (key, tally) in other.pairs {
            self.pairs.entry(key).or_default().add(&tally);
        }
        self.total_switches += other.total_switches;
        self.bounce_count += other.bounce_count;
        self.rapid_switches += other.rapid_switches;
        self.apps.extend(other.apps);
        self
    }

    pub fn frequency(&self, key: &PatternKey) -> u64 {
        self.pairs.get(key).map(PairTally::frequency).unwrap_or(0)
    }
}

/// Patterns and baseline of one detection run
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Qualifying patterns, most frequent first, ties by key
    pub patterns: Vec<DeathLoopPattern>,
    pub baseline: UserBaseline,
}

/// Death-loop detector
#[derive(Debug, Clone)]
pub struct DeathLoopDetector {
    bounce_threshold_ms: i64,
    rapid_switch_ms: i64,
    min_frequency: u64,
}

impl DeathLoopDetector {
    pub fn new(bounce_threshold_ms: i64, rapid_switch_ms: i64, min_frequency: u64) -> Self {
        Self {
            bounce_threshold_ms,
            rapid_switch_ms,
            min_frequency,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.bounce_threshold_ms(),
            config.rapid_switch_ms(),
            config.min_pattern_frequency,
        )
    }

    /// Tally a whole switch sequence in one pass
    pub fn tally(&self, switches: &[SwitchEvent]) -> PatternTally {
        self.tally_after(None, switches)
    }

    /// Tally a shard of the sequence. `previous` is the switch just before the
    /// shard, so a bounce straddling the shard boundary is still seen.
    pub fn tally_after(&self, previous: Option<&SwitchEvent>, switches: &[SwitchEvent]) -> PatternTally {
        let mut tally = PatternTally::default();
        let mut prev = previous;

        for switch in switches {
            tally.total_switches += 1;
            if switch.gap_ms < self.rapid_switch_ms {
                tally.rapid_switches += 1;
            }
            if let Some(prev) = prev {
                if self.is_bounce(prev, switch) {
                    tally.bounce_count += 1;
                }
            }
            tally.apps.insert(switch.from_app.clone());
            tally.apps.insert(switch.to_app.clone());

            if let Some(key) = PatternKey::new(&switch.from_app, &switch.to_app) {
                let pair = tally.pairs.entry(key.clone()).or_default();
                pair.gap_ms += switch.gap_ms;
                if key.app_a == switch.from_app {
                    pair.a_to_b += 1;
                    pair.dwell_a_ms += switch.dwell_ms;
                } else {
                    pair.b_to_a += 1;
                    pair.dwell_b_ms += switch.dwell_ms;
                }
            }

            prev = Some(switch);
        }

        tally
    }

    /// A→B followed by B→A, returning within the bounce threshold
    pub fn is_bounce(&self, previous: &SwitchEvent, current: &SwitchEvent) -> bool {
        current.to_app == previous.from_app
            && current.from_app == previous.to_app
            && (current.timestamp - previous.timestamp).num_milliseconds() < self.bounce_threshold_ms
    }

    /// Split the sequence into contiguous time shards of `shard_ms`, tally each
    /// and merge. Yields the same tally as [`tally`](Self::tally).
    pub fn tally_sharded(&self, switches: &[SwitchEvent], shard_ms: i64) -> PatternTally {
        shard_bounds(switches, shard_ms)
            .into_iter()
            .map(|(start, end)| {
                let previous = start.checked_sub(1).map(|i| &switches[i]);
                self.tally_after(previous, &switches[start..end])
            })
            .fold(PatternTally::default(), PatternTally::merge)
    }

    /// Turn a tally into patterns and the run baseline
    pub fn detect(&self, tally: &PatternTally, window_days: u32) -> Detection {
        let mut patterns: Vec<DeathLoopPattern> = tally
            .pairs
            .iter()
            .filter(|(_, pair)| pair.frequency() >= self.min_frequency)
            .map(|(key, pair)| to_pattern(key, pair))
            .collect();
        patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.key.cmp(&b.key)));

        let baseline = UserBaseline::new(
            tally.total_switches,
            tally.bounce_count,
            tally.rapid_switches,
            tally.apps.len(),
            window_days,
        );

        log::debug!(
            "Detected {} patterns over {} switches ({} bounces)",
            patterns.len(),
            baseline.total_switches,
            baseline.bounce_count
        );

        Detection { patterns, baseline }
    }
}

fn to_pattern(key: &PatternKey, pair: &PairTally) -> DeathLoopPattern {
    let frequency = pair.frequency();
    let average = |total_ms: i64, count: u64| {
        if count == 0 {
            0.0
        } else {
            total_ms as f64 / 1000.0 / count as f64
        }
    };

    DeathLoopPattern {
        key: key.clone(),
        directional_counts: DirectionalCounts {
            a_to_b: pair.a_to_b,
            b_to_a: pair.b_to_a,
        },
        frequency,
        avg_gap_secs: average(pair.gap_ms, frequency),
        avg_dwell_a_secs: average(pair.dwell_a_ms, pair.a_to_b),
        avg_dwell_b_secs: average(pair.dwell_b_ms, pair.b_to_a),
        total_gap_ms: pair.gap_ms,
        total_dwell_ms: pair.dwell_a_ms + pair.dwell_b_ms,
    }
}

/// Index ranges of contiguous shards keyed by `timestamp / shard_ms`
fn shard_bounds(switches: &[SwitchEvent], shard_ms: i64) -> Vec<(usize, usize)> {
    let shard_ms = shard_ms.max(1);
    let mut bounds = Vec::new();
    let mut start = 0;

    for i in 1..switches.len() {
        let prev_shard = switches[i - 1].timestamp.timestamp_millis().div_euclid(shard_ms);
        let shard = switches[i].timestamp.timestamp_millis().div_euclid(shard_ms);
        if shard != prev_shard {
            bounds.push((start, i));
            start = i;
        }
    }
    if start < switches.len() {
        bounds.push((start, switches.len()));
    }

    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    const DAY_MS: i64 = 86_400_000;

    fn switch(from: &str, to: &str, at_ms: i64, gap_ms: i64, dwell_ms: i64) -> SwitchEvent {
        SwitchEvent {
            from_app: from.to_string(),
            to_app: to.to_string(),
            timestamp: Utc.timestamp_millis_opt(at_ms).unwrap(),
            gap_ms,
            dwell_ms,
            is_bounce_candidate: gap_ms < 1_000,
        }
    }

    fn detector() -> DeathLoopDetector {
        DeathLoopDetector::from_config(&EngineConfig::default())
    }

    #[test]
    fn test_two_app_loop_frequency() {
        // 4130 quick A<->B round trips, then 6 slow A->B switches
        let mut switches = Vec::new();
        let mut at = 0;
        for i in 0..8260 {
            let (from, to) = if i % 2 == 0 { ("A", "B") } else { ("B", "A") };
            switches.push(switch(from, to, at, 100, 400));
            at += 400;
        }
        for _ in 0..6 {
            at += 10_000;
            switches.push(switch("A", "B", at, 100, 10_000));
        }

        let detector = detector();
        let tally = detector.tally(&switches);
        let detection = detector.detect(&tally, 7);

        assert_eq!(detection.patterns.len(), 1);
        let pattern = &detection.patterns[0];
        assert_eq!(pattern.key, PatternKey::new("A", "B").unwrap());
        assert_eq!(pattern.directional_counts.a_to_b, 4136);
        assert_eq!(pattern.directional_counts.b_to_a, 4130);
        assert_eq!(pattern.frequency, 8266);

        // Every quick switch after the first returns within 400ms
        assert_eq!(detection.baseline.bounce_count, 8259);
        assert_eq!(detection.baseline.total_switches, 8266);
    }

    #[test]
    fn test_frequency_equals_switches_per_key() {
        let switches = vec![
            switch("Cursor", "Slack", 0, 0, 10),
            switch("Slack", "Safari", 1_000, 0, 10),
            switch("Safari", "Slack", 2_000, 0, 10),
            switch("Slack", "Cursor", 3_000, 0, 10),
            switch("Cursor", "Slack", 4_000, 0, 10),
            switch("Slack", "Cursor", 5_000, 0, 10),
        ];
        let detector = DeathLoopDetector::new(1_000, 10_000, 1);
        let tally = detector.tally(&switches);

        for (key, pair) in &tally.pairs {
            let expected = switches
                .iter()
                .filter(|s| PatternKey::new(&s.from_app, &s.to_app).as_ref() == Some(key))
                .count() as u64;
            assert_eq!(pair.frequency(), expected);
        }
        assert_eq!(tally.frequency(&PatternKey::new("Cursor", "Slack").unwrap()), 4);
        assert_eq!(tally.frequency(&PatternKey::new("Safari", "Slack").unwrap()), 2);
    }

    #[test]
    fn test_bounce_requires_return_within_threshold() {
        let detector = detector();
        let out = switch("Cursor", "Slack", 0, 0, 5_000);
        let quick_back = switch("Slack", "Cursor", 800, 0, 800);
        let slow_back = switch("Slack", "Cursor", 1_000, 0, 1_000);
        let elsewhere = switch("Slack", "Safari", 500, 0, 500);

        assert!(detector.is_bounce(&out, &quick_back));
        assert!(!detector.is_bounce(&out, &slow_back));
        assert!(!detector.is_bounce(&out, &elsewhere));
    }

    #[test]
    fn test_min_frequency_filters_patterns_only() {
        let switches = vec![
            switch("Mail", "Notes", 0, 0, 10),
            switch("Notes", "Mail", 10_000, 0, 10),
        ];
        let detector = detector();
        let detection = detector.detect(&detector.tally(&switches), 7);

        assert!(detection.patterns.is_empty());
        assert_eq!(detection.baseline.total_switches, 2);
    }

    #[test]
    fn test_directional_dwell_averages() {
        let switches = vec![
            switch("A", "B", 0, 200, 4_000),
            switch("B", "A", 1_000, 400, 1_000),
            switch("A", "B", 5_000, 0, 2_000),
        ];
        let detector = DeathLoopDetector::new(1_000, 10_000, 1);
        let detection = detector.detect(&detector.tally(&switches), 7);
        let pattern = &detection.patterns[0];

        assert_eq!(pattern.avg_dwell_a_secs, 3.0);
        assert_eq!(pattern.avg_dwell_b_secs, 1.0);
        assert!((pattern.avg_gap_secs - 0.2).abs() < 1e-9);
        assert_eq!(pattern.total_dwell_ms, 7_000);
    }

    #[test]
    fn test_sharded_tally_matches_single_pass() {
        let apps = ["Cursor", "Safari", "Slack", "Cursor", "Slack", "Spotify"];
        let mut switches = Vec::new();
        let mut at = 0;
        for i in 0..600 {
            let from = apps[i % apps.len()];
            let to = apps[(i + 1) % apps.len()];
            switches.push(switch(from, to, at, (i as i64 * 37) % 3_000, 500 + (i as i64 % 7) * 100));
            // Uneven spacing so shards have different sizes and a bounce can straddle a boundary
            at += if i % 50 == 49 { DAY_MS / 3 } else { 700 };
        }

        let detector = DeathLoopDetector::new(1_000, 10_000, 1);
        let single = detector.tally(&switches);

        for shard_ms in [DAY_MS, DAY_MS / 4, 3_600_000, 1] {
            let sharded = detector.tally_sharded(&switches, shard_ms);
            assert_eq!(sharded, single, "shard size {shard_ms}");
        }

        // Merge order does not matter
        let mid = switches.len() / 2;
        let left = detector.tally_after(None, &switches[..mid]);
        let right = detector.tally_after(Some(&switches[mid - 1]), &switches[mid..]);
        assert_eq!(left.clone().merge(right.clone()), right.merge(left));
    }

    #[test]
    fn test_empty_sequence() {
        let detector = detector();
        let detection = detector.detect(&detector.tally(&[]), 7);
        assert!(detection.patterns.is_empty());
        assert_eq!(detection.baseline.bounce_rate, 0.0);
    }
}
