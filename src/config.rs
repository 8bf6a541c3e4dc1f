//! Engine configuration
//!
//! Every threshold, rate and lookup table the pipeline consults lives here. All
//! fields have defaults, so a config file only needs to name what it overrides.
//! The severity minute thresholds are configuration, not business logic: tune
//! them per user rather than in code.

use crate::error::EngineError;
use crate::templates::TemplateSpec;
use crate::types::{AppRole, SeverityTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Seconds between 1970-01-01 and the 2001-01-01 reference epoch of the usage store
pub const DEFAULT_EPOCH_OFFSET_SECS: i64 = 978_307_200;

/// Stream tag of foreground app usage rows
pub const DEFAULT_STREAM_TAG: &str = "/app/usage";

/// Return within this many seconds counts as a bounce-back
pub const DEFAULT_BOUNCE_THRESHOLD_SECS: f64 = 1.0;

/// Switches with a gap below this many seconds count as rapid
pub const DEFAULT_RAPID_SWITCH_SECS: f64 = 10.0;

/// Refocus cost charged per switch by the per-switch loss model
pub const DEFAULT_SWITCH_COST_SECS: f64 = 30.0;

/// Hourly valuation rate in dollars
pub const DEFAULT_HOURLY_RATE: f64 = 50.0;

/// How wasted time is estimated for a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossModel {
    /// `frequency x avg_gap`: only dead time between apps is wasted
    TransitionGap,
    /// `frequency x avg_dwell`: the whole round trip is wasted. Default, since
    /// store intervals are contiguous and leave no gap to measure.
    RoundTrip,
    /// `frequency x switch_cost_secs`: fixed refocus cost per switch
    PerSwitch,
}

/// Minute thresholds for severity tiers.
///
/// `< medium_minutes` is low, `> high_minutes` is high, anything between is medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    pub medium_minutes: f64,
    pub high_minutes: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            medium_minutes: 10.0,
            high_minutes: 60.0,
        }
    }
}

impl SeverityThresholds {
    pub fn tier_for(&self, minutes: f64) -> SeverityTier {
        if minutes < self.medium_minutes {
            SeverityTier::Low
        } else if minutes > self.high_minutes {
            SeverityTier::High
        } else {
            SeverityTier::Medium
        }
    }
}

/// Prefix rule for identifiers not found in the exact table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRule {
    /// Matched case-insensitively against the start of the raw identifier
    pub prefix: String,
    pub name: String,
}

impl PrefixRule {
    fn new(prefix: &str, name: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            name: name.to_string(),
        }
    }
}

/// App canonicalization table: exact bundle ids first, then prefix rules in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppCatalogConfig {
    pub exact: BTreeMap<String, String>,
    pub prefixes: Vec<PrefixRule>,
}

impl Default for AppCatalogConfig {
    fn default() -> Self {
        let exact = [
            ("com.apple.Safari", "Safari"),
            ("com.google.Chrome", "Chrome"),
            ("com.brave.Browser", "Brave"),
            ("org.mozilla.firefox", "Firefox"),
            ("com.microsoft.edgemac", "Edge"),
            ("company.thebrowser.Browser", "Arc"),
            ("com.microsoft.VSCode", "VS Code"),
            ("com.todesktop.230313mzl4w4u92", "Cursor"),
            ("com.apple.dt.Xcode", "Xcode"),
            ("com.apple.Terminal", "Terminal"),
            ("com.googlecode.iterm2", "iTerm"),
            ("dev.warp.Warp-Stable", "Warp"),
            ("dev.zed.Zed", "Zed"),
            ("com.tinyspeck.slackmacgap", "Slack"),
            ("com.microsoft.teams", "Teams"),
            ("com.microsoft.teams2", "Teams"),
            ("us.zoom.xos", "Zoom"),
            ("com.apple.mail", "Mail"),
            ("com.apple.MobileSMS", "Messages"),
            ("net.whatsapp.WhatsApp", "WhatsApp"),
            ("ru.keepcoder.Telegram", "Telegram"),
            ("com.tdesktop.Telegram", "Telegram"),
            ("com.hnc.Discord", "Discord"),
            ("com.facebook.archon", "Messenger"),
            ("com.spotify.client", "Spotify"),
            ("com.apple.Music", "Music"),
            ("com.twitter.twitter-mac", "Twitter"),
            ("com.apple.iCal", "Calendar"),
            ("com.apple.Notes", "Notes"),
            ("notion.id", "Notion"),
            ("md.obsidian", "Obsidian"),
            ("com.figma.Desktop", "Figma"),
            ("com.apple.finder", "Finder"),
            ("com.apple.Preview", "Preview"),
            ("com.apple.systempreferences", "System Settings"),
        ]
        .into_iter()
        .map(|(id, name)| (id.to_string(), name.to_string()))
        .collect();

        // Specific prefixes first: the first matching rule wins.
        let prefixes = vec![
            PrefixRule::new("com.todesktop.230313", "Cursor"),
            PrefixRule::new("com.microsoft.vscodeinsiders", "VS Code Insiders"),
            PrefixRule::new("com.microsoft.vscode", "VS Code"),
            PrefixRule::new("com.jetbrains.intellij", "IntelliJ IDEA"),
            PrefixRule::new("com.jetbrains.pycharm", "PyCharm"),
            PrefixRule::new("com.jetbrains.webstorm", "WebStorm"),
            PrefixRule::new("com.jetbrains.goland", "GoLand"),
            PrefixRule::new("com.jetbrains.rustrover", "RustRover"),
            PrefixRule::new("com.jetbrains.", "JetBrains IDE"),
            PrefixRule::new("com.google.android.studio", "Android Studio"),
            PrefixRule::new("com.google.chrome", "Chrome"),
            PrefixRule::new("com.apple.safari", "Safari"),
            PrefixRule::new("org.mozilla.firefox", "Firefox"),
            PrefixRule::new("com.tinyspeck.slackmacgap", "Slack"),
        ];

        Self { exact, prefixes }
    }
}

/// Matches one side of an app pair, either by role or by canonical app name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppMatcher {
    Role(AppRole),
    App(String),
}

/// Unordered pair rule: matches when the two matchers cover the two apps in either order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRule {
    pub first: AppMatcher,
    pub second: AppMatcher,
}

impl PairRule {
    pub fn roles(first: AppRole, second: AppRole) -> Self {
        Self {
            first: AppMatcher::Role(first),
            second: AppMatcher::Role(second),
        }
    }
}

/// Keywords that assign a role to canonical app names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRule {
    pub role: AppRole,
    pub keywords: Vec<String>,
}

/// Allow/deny lists and heuristics for the workflow classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
    /// Checked in order; the first rule with a matching keyword assigns the role
    pub roles: Vec<RoleRule>,
    pub allow_pairs: Vec<PairRule>,
    pub deny_pairs: Vec<PairRule>,
    /// Pairs involving an app with one of these roles are distractions
    pub distraction_roles: Vec<AppRole>,
    /// Directional symmetry below this marks one-sided drift
    pub drift_symmetry: f64,
    /// Upper bound on waiting for an external annotation of one pattern
    pub annotation_timeout_ms: u64,
}

fn role_rule(role: AppRole, keywords: &[&str]) -> RoleRule {
    RoleRule {
        role,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

impl Default for ClassificationRules {
    fn default() -> Self {
        Self {
            roles: vec![
                role_rule(
                    AppRole::Development,
                    &[
                        "cursor", "vs code", "xcode", "terminal", "iterm", "warp", "zed",
                        "intellij", "pycharm", "webstorm", "goland", "rustrover", "jetbrains",
                        "android studio", "sublime text", "vim", "emacs",
                    ],
                ),
                role_rule(
                    AppRole::Browser,
                    &["safari", "chrome", "firefox", "brave", "edge", "arc", "opera"],
                ),
                role_rule(
                    AppRole::Communication,
                    &[
                        "slack", "teams", "zoom", "mail", "messages", "whatsapp", "telegram",
                        "discord", "messenger", "outlook",
                    ],
                ),
                role_rule(
                    AppRole::Entertainment,
                    &[
                        "spotify", "music", "youtube", "netflix", "twitter", "reddit", "steam",
                        "instagram", "tiktok", "facebook",
                    ],
                ),
                role_rule(
                    AppRole::Productivity,
                    &[
                        "notes", "notion", "obsidian", "calendar", "figma", "pages", "numbers",
                        "keynote", "word", "excel",
                    ],
                ),
                role_rule(
                    AppRole::Utility,
                    &["finder", "preview", "system settings", "activity monitor"],
                ),
            ],
            allow_pairs: vec![
                PairRule::roles(AppRole::Development, AppRole::Browser),
                PairRule::roles(AppRole::Development, AppRole::Development),
                PairRule::roles(AppRole::Development, AppRole::Productivity),
            ],
            deny_pairs: vec![
                PairRule::roles(AppRole::Development, AppRole::Communication),
                PairRule::roles(AppRole::Development, AppRole::Entertainment),
            ],
            distraction_roles: vec![AppRole::Entertainment],
            drift_symmetry: 0.5,
            annotation_timeout_ms: 2_000,
        }
    }
}

/// Template ids used by the script generator's selection rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSelection {
    pub high_frequency: String,
    pub checked_app: String,
    pub fallback: String,
    pub workflow_layout: String,
}

impl Default for TemplateSelection {
    fn default() -> Self {
        Self {
            high_frequency: "bounce-killer".to_string(),
            checked_app: "communication-batcher".to_string(),
            fallback: "focus-mode".to_string(),
            workflow_layout: "split-screen-layout".to_string(),
        }
    }
}

/// Script generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Patterns below this tier get no script
    pub severity_floor: SeverityTier,
    /// Distraction patterns at or above this frequency get the bounce killer
    pub high_frequency: u64,
    /// Average dwell below this marks an app as "checked" rather than used
    pub check_dwell_secs: f64,
    /// Bounces within one watch before the bounce killer steps in
    pub max_bounces: u32,
    pub cooldown_secs: f64,
    pub block_minutes: f64,
    pub batch_interval_minutes: f64,
    pub batch_window_minutes: f64,
    /// Generate split-screen layouts for workflow patterns
    pub layout_workflows: bool,
    /// Screen fraction given to the primary app of a layout
    pub layout_primary_ratio: f64,
    pub templates: TemplateSelection,
    /// Additional templates registered alongside the built-in catalog
    pub extra_templates: Vec<TemplateSpec>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            severity_floor: SeverityTier::Medium,
            high_frequency: 100,
            check_dwell_secs: 30.0,
            max_bounces: 3,
            cooldown_secs: 120.0,
            block_minutes: 25.0,
            batch_interval_minutes: 30.0,
            batch_window_minutes: 5.0,
            layout_workflows: true,
            layout_primary_ratio: 0.6,
            templates: TemplateSelection::default(),
            extra_templates: Vec::new(),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub epoch_offset_secs: i64,
    /// Rows tagged with another stream are ignored. Empty disables the filter.
    pub stream_tag: String,
    pub window_days: u32,
    /// End of the analysis window; defaults to the latest row start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_end: Option<DateTime<Utc>>,
    pub bounce_threshold_secs: f64,
    pub rapid_switch_secs: f64,
    /// Pairs with fewer switches are not reported as patterns
    pub min_pattern_frequency: u64,
    /// Aggregate in contiguous shards of this many hours and merge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_hours: Option<u32>,
    pub loss_model: LossModel,
    pub switch_cost_secs: f64,
    pub hourly_rate: f64,
    pub severity: SeverityThresholds,
    pub apps: AppCatalogConfig,
    pub classification: ClassificationRules,
    pub generation: GenerationConfig,
    /// Patterns listed in the report
    pub report_top_n: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            epoch_offset_secs: DEFAULT_EPOCH_OFFSET_SECS,
            stream_tag: DEFAULT_STREAM_TAG.to_string(),
            window_days: 7,
            window_end: None,
            bounce_threshold_secs: DEFAULT_BOUNCE_THRESHOLD_SECS,
            rapid_switch_secs: DEFAULT_RAPID_SWITCH_SECS,
            min_pattern_frequency: 3,
            shard_hours: None,
            loss_model: LossModel::RoundTrip,
            switch_cost_secs: DEFAULT_SWITCH_COST_SECS,
            hourly_rate: DEFAULT_HOURLY_RATE,
            severity: SeverityThresholds::default(),
            apps: AppCatalogConfig::default(),
            classification: ClassificationRules::default(),
            generation: GenerationConfig::default(),
            report_top_n: 10,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("cannot parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| EngineError::data_access(path.display().to_string(), e))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn bounce_threshold_ms(&self) -> i64 {
        secs_to_ms(self.bounce_threshold_secs)
    }

    pub fn rapid_switch_ms(&self) -> i64 {
        secs_to_ms(self.rapid_switch_secs)
    }

    /// Check every threshold and rate. Template references are checked by the
    /// engine once the catalog is built.
    pub fn validate(&self) -> Result<(), EngineError> {
        fn invalid(msg: String) -> Result<(), EngineError> {
            Err(EngineError::Config(msg))
        }

        if self.window_days == 0 {
            return invalid("window_days must be at least 1".to_string());
        }
        if !positive(self.bounce_threshold_secs) {
            return invalid(format!(
                "bounce_threshold_secs must be a positive number, got {}",
                self.bounce_threshold_secs
            ));
        }
        if !positive(self.rapid_switch_secs) {
            return invalid(format!(
                "rapid_switch_secs must be a positive number, got {}",
                self.rapid_switch_secs
            ));
        }
        if self.min_pattern_frequency == 0 {
            return invalid("min_pattern_frequency must be at least 1".to_string());
        }
        if self.shard_hours == Some(0) {
            return invalid("shard_hours must be at least 1".to_string());
        }
        if !positive(self.switch_cost_secs) {
            return invalid(format!(
                "switch_cost_secs must be a positive number, got {}",
                self.switch_cost_secs
            ));
        }
        if !self.hourly_rate.is_finite() || self.hourly_rate < 0.0 {
            return invalid(format!(
                "hourly_rate must be a non-negative number, got {}",
                self.hourly_rate
            ));
        }

        let severity = &self.severity;
        if !severity.medium_minutes.is_finite()
            || !severity.high_minutes.is_finite()
            || severity.medium_minutes < 0.0
            || severity.medium_minutes > severity.high_minutes
        {
            return invalid(format!(
                "severity thresholds must satisfy 0 <= medium_minutes <= high_minutes, got {} and {}",
                severity.medium_minutes, severity.high_minutes
            ));
        }

        if let Some(rule) = self.apps.prefixes.iter().find(|r| r.prefix.is_empty()) {
            return invalid(format!("prefix rule for {} has an empty prefix", rule.name));
        }
        if let Some((id, _)) = self.apps.exact.iter().find(|(_, name)| name.trim().is_empty()) {
            return invalid(format!("app {id} maps to an empty name"));
        }

        let rules = &self.classification;
        if !(0.0..=1.0).contains(&rules.drift_symmetry) {
            return invalid(format!(
                "drift_symmetry must be within [0, 1], got {}",
                rules.drift_symmetry
            ));
        }
        if rules.annotation_timeout_ms == 0 {
            return invalid("annotation_timeout_ms must be at least 1".to_string());
        }

        let generation = &self.generation;
        if generation.high_frequency == 0 {
            return invalid("generation.high_frequency must be at least 1".to_string());
        }
        if generation.max_bounces == 0 {
            return invalid("generation.max_bounces must be at least 1".to_string());
        }
        for (name, value) in [
            ("check_dwell_secs", generation.check_dwell_secs),
            ("block_minutes", generation.block_minutes),
            ("batch_interval_minutes", generation.batch_interval_minutes),
            ("batch_window_minutes", generation.batch_window_minutes),
        ] {
            if !positive(value) {
                return invalid(format!(
                    "generation.{name} must be a positive number, got {value}"
                ));
            }
        }
        if !generation.cooldown_secs.is_finite() || generation.cooldown_secs < 0.0 {
            return invalid(format!(
                "generation.cooldown_secs must be a non-negative number, got {}",
                generation.cooldown_secs
            ));
        }
        if generation.batch_window_minutes >= generation.batch_interval_minutes {
            return invalid(
                "generation.batch_window_minutes must be shorter than batch_interval_minutes"
                    .to_string(),
            );
        }
        if !(generation.layout_primary_ratio > 0.0 && generation.layout_primary_ratio < 1.0) {
            return invalid(format!(
                "generation.layout_primary_ratio must be within (0, 1), got {}",
                generation.layout_primary_ratio
            ));
        }

        if self.report_top_n == 0 {
            return invalid("report_top_n must be at least 1".to_string());
        }

        Ok(())
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

pub(crate) fn secs_to_ms(secs: f64) -> i64 {
    (secs * 1000.0).round() as i64
}
