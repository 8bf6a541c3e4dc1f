//! Script generator
//!
//! Picks one intervention template per qualifying pattern, fills its
//! parameters from the pattern and the generation defaults, and renders it
//! through the template catalog. A render failure only costs that pattern its
//! script; it is reported alongside the scripts that did render.

use crate::config::GenerationConfig;
use crate::templates::TemplateCatalog;
use crate::types::{
    AppRole, Classification, ClassifiedPattern, GeneratedScript, InterventionSpec, ParamValue, ScriptFailure,
};
use std::collections::{BTreeMap, HashSet};

/// Scripts and per-pattern failures of one generation run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutput {
    pub scripts: Vec<GeneratedScript>,
    pub failures: Vec<ScriptFailure>,
}

/// Selects and renders interventions
pub struct ScriptGenerator<'a> {
    catalog: &'a TemplateCatalog,
    config: &'a GenerationConfig,
    bounce_threshold_secs: f64,
}

impl<'a> ScriptGenerator<'a> {
    pub fn new(catalog: &'a TemplateCatalog, config: &'a GenerationConfig, bounce_threshold_secs: f64) -> Self {
        Self {
            catalog,
            config,
            bounce_threshold_secs,
        }
    }

    /// The intervention for one pattern, or `None` when it gets no script.
    ///
    /// Distractions at or above the severity floor:
    /// 1. frequency at or above `high_frequency`: bounce killer on both apps
    /// 2. exactly one side is repeatedly checked: communication batcher on it
    /// 3. otherwise: focus mode, blocking the distracting side
    ///
    /// Workflows at or above the floor get a split-screen layout when enabled.
    pub fn plan(&self, pattern: &ClassifiedPattern) -> Option<InterventionSpec> {
        if pattern.scored.severity_tier < self.config.severity_floor {
            return None;
        }
        match pattern.classification {
            Classification::Workflow if self.config.layout_workflows => Some(self.plan_layout(pattern)),
            Classification::Workflow => None,
            // The classifier never hands back an unresolved pattern; treat one as a distraction
            Classification::Distraction | Classification::Ambiguous => Some(self.plan_distraction(pattern)),
        }
    }

    /// Plan and render every pattern, in the order given
    pub fn generate(&self, patterns: &[ClassifiedPattern]) -> GenerationOutput {
        let mut output = GenerationOutput::default();
        let mut file_names = HashSet::new();

        for spec in patterns.iter().filter_map(|p| self.plan(p)) {
            match self.catalog.render(&spec) {
                Ok(rendered_source) => {
                    let file_name = unique_file_name(&spec, &mut file_names);
                    output.scripts.push(GeneratedScript {
                        template_id: spec.template_id,
                        pattern_key: spec.pattern_key,
                        target_apps: spec.target_apps,
                        file_name,
                        rendered_source,
                    });
                }
                Err(e) => {
                    log::warn!("No {} script for {}: {e}", spec.template_id, spec.pattern_key);
                    output.failures.push(ScriptFailure {
                        pattern_key: spec.pattern_key,
                        template_id: spec.template_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        log::debug!(
            "Generated {} scripts ({} failed)",
            output.scripts.len(),
            output.failures.len()
        );
        output
    }

    fn plan_distraction(&self, pattern: &ClassifiedPattern) -> InterventionSpec {
        let key = pattern.key();
        let [app_a, app_b] = key.apps();
        let templates = &self.config.templates;

        if pattern.scored.pattern.frequency >= self.config.high_frequency {
            return intervention(
                pattern,
                &templates.high_frequency,
                vec![
                    ("app_a", app_a.into()),
                    ("app_b", app_b.into()),
                    ("bounce_threshold", self.bounce_threshold_secs.into()),
                    ("max_bounces", f64::from(self.config.max_bounces).into()),
                    ("cooldown_seconds", self.config.cooldown_secs.into()),
                ],
                vec![app_a, app_b],
            );
        }

        if let Some(checked) = self.checked_app(pattern) {
            return intervention(
                pattern,
                &templates.checked_app,
                vec![
                    ("app", checked.into()),
                    ("interval_minutes", self.config.batch_interval_minutes.into()),
                    ("window_minutes", self.config.batch_window_minutes.into()),
                ],
                vec![checked],
            );
        }

        let blocked = distracting_side(pattern);
        let focus = if blocked == app_a { app_b } else { app_a };
        intervention(
            pattern,
            &templates.fallback,
            vec![
                ("focus_app", focus.into()),
                ("blocked_app", blocked.into()),
                ("block_minutes", self.config.block_minutes.into()),
            ],
            vec![focus, blocked],
        )
    }

    fn plan_layout(&self, pattern: &ClassifiedPattern) -> InterventionSpec {
        let [app_a, app_b] = pattern.key().apps();
        let dev = |app: &str| pattern.role_of(app) == Some(AppRole::Development);

        let primary = match (dev(app_a), dev(app_b)) {
            (true, false) => app_a,
            (false, true) => app_b,
            _ => {
                let p = &pattern.scored.pattern;
                if p.avg_dwell_b_secs > p.avg_dwell_a_secs {
                    app_b
                } else {
                    app_a
                }
            }
        };
        let secondary = if primary == app_a { app_b } else { app_a };

        intervention(
            pattern,
            &self.config.templates.workflow_layout,
            vec![
                ("primary_app", primary.into()),
                ("secondary_app", secondary.into()),
                ("primary_ratio", self.config.layout_primary_ratio.into()),
            ],
            vec![primary, secondary],
        )
    }

    /// The single side the user keeps glancing at, if there is exactly one
    fn checked_app<'p>(&self, pattern: &'p ClassifiedPattern) -> Option<&'p str> {
        let [app_a, app_b] = pattern.key().apps();
        let p = &pattern.scored.pattern;
        let limit = self.config.check_dwell_secs;

        let checked = |role: Option<AppRole>, dwell: f64, other_dwell: f64| {
            role == Some(AppRole::Communication) || (dwell < limit && other_dwell >= limit)
        };
        let a = checked(pattern.roles[0], p.avg_dwell_a_secs, p.avg_dwell_b_secs);
        let b = checked(pattern.roles[1], p.avg_dwell_b_secs, p.avg_dwell_a_secs);

        match (a, b) {
            (true, false) => Some(app_a),
            (false, true) => Some(app_b),
            _ => None,
        }
    }
}

/// Entertainment side if exactly one, else the side pulled into more often
fn distracting_side(pattern: &ClassifiedPattern) -> &str {
    let [app_a, app_b] = pattern.key().apps();
    let fun = |i: usize| pattern.roles[i] == Some(AppRole::Entertainment);
    match (fun(0), fun(1)) {
        (true, false) => app_a,
        (false, true) => app_b,
        _ => {
            let counts = &pattern.scored.pattern.directional_counts;
            // b_to_a counts arrivals in app_a
            if counts.b_to_a > counts.a_to_b {
                app_a
            } else {
                app_b
            }
        }
    }
}

fn intervention(
    pattern: &ClassifiedPattern,
    template_id: &str,
    parameters: Vec<(&str, ParamValue)>,
    targets: Vec<&str>,
) -> InterventionSpec {
    InterventionSpec {
        pattern_key: pattern.key().clone(),
        template_id: template_id.to_string(),
        parameters: parameters
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect::<BTreeMap<_, _>>(),
        target_apps: targets.into_iter().map(str::to_string).collect(),
    }
}

/// `{template}-{app}-{app}.lua`, suffixed `-2`, `-3`.. on collision
fn unique_file_name(spec: &InterventionSpec, taken: &mut HashSet<String>) -> String {
    let mut stem = slug(&spec.template_id);
    for app in &spec.target_apps {
        stem.push('-');
        stem.push_str(&slug(app));
    }

    let mut name = format!("{stem}.lua");
    let mut n = 2;
    while taken.contains(&name) {
        name = format!("{stem}-{n}.lua");
        n += 1;
    }
    taken.insert(name.clone());
    name
}

fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("app");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{BOUNCE_KILLER, COMMUNICATION_BATCHER, FOCUS_MODE, SPLIT_SCREEN_LAYOUT};
    use crate::types::{ClassificationSource, DeathLoopPattern, DirectionalCounts, PatternKey, ScoredPattern, SeverityTier};
    use pretty_assertions::assert_eq;

    struct Fixture {
        a: &'static str,
        b: &'static str,
        counts: (u64, u64),
        dwell: (f64, f64),
        roles: [Option<AppRole>; 2],
        tier: SeverityTier,
        classification: Classification,
    }

    impl Default for Fixture {
        fn default() -> Self {
            Self {
                a: "Mail",
                b: "Notes",
                counts: (20, 20),
                dwell: (60.0, 60.0),
                roles: [None, None],
                tier: SeverityTier::Medium,
                classification: Classification::Distraction,
            }
        }
    }

    impl Fixture {
        // `a` must sort before `b`
        fn build(self) -> ClassifiedPattern {
            let key = PatternKey::new(self.a, self.b).unwrap();
            assert_eq!(key.app_a, self.a);
            let counts = DirectionalCounts {
                a_to_b: self.counts.0,
                b_to_a: self.counts.1,
            };
            ClassifiedPattern {
                scored: ScoredPattern {
                    pattern: DeathLoopPattern {
                        key,
                        directional_counts: counts,
                        frequency: counts.total(),
                        avg_gap_secs: 2.0,
                        avg_dwell_a_secs: self.dwell.0,
                        avg_dwell_b_secs: self.dwell.1,
                        total_gap_ms: counts.total() as i64 * 2_000,
                        total_dwell_ms: 0,
                    },
                    total_minutes_lost: 30.0,
                    severity_tier: self.tier,
                    cost: 25.0,
                    weekly_cost: 25.0,
                    share_of_switches: 0.1,
                },
                classification: self.classification,
                source: ClassificationSource::Rule,
                roles: self.roles,
            }
        }
    }

    fn plan(pattern: &ClassifiedPattern) -> Option<InterventionSpec> {
        let catalog = TemplateCatalog::builtin();
        let config = GenerationConfig::default();
        ScriptGenerator::new(&catalog, &config, 1.0).plan(pattern)
    }

    #[test]
    fn test_high_frequency_gets_bounce_killer() {
        let spec = plan(&Fixture { counts: (60, 60), ..Fixture::default() }.build()).unwrap();
        assert_eq!(spec.template_id, BOUNCE_KILLER);
        assert_eq!(spec.target_apps, vec!["Mail", "Notes"]);
        assert_eq!(spec.parameters["bounce_threshold"], ParamValue::Number(1.0));
        assert_eq!(spec.parameters["max_bounces"], ParamValue::Number(3.0));
    }

    #[test]
    fn test_communication_app_gets_batcher() {
        let spec = plan(
            &Fixture {
                a: "Cursor",
                b: "Slack",
                roles: [Some(AppRole::Development), Some(AppRole::Communication)],
                ..Fixture::default()
            }
            .build(),
        )
        .unwrap();
        assert_eq!(spec.template_id, COMMUNICATION_BATCHER);
        assert_eq!(spec.target_apps, vec!["Slack"]);
        assert_eq!(spec.parameters["app"], ParamValue::Text("Slack".to_string()));
    }

    #[test]
    fn test_short_dwell_side_counts_as_checked() {
        let spec = plan(&Fixture { dwell: (120.0, 4.0), ..Fixture::default() }.build()).unwrap();
        assert_eq!(spec.template_id, COMMUNICATION_BATCHER);
        assert_eq!(spec.target_apps, vec!["Notes"]);
    }

    #[test]
    fn test_focus_mode_blocks_entertainment_side() {
        let spec = plan(
            &Fixture {
                a: "Notion",
                b: "YouTube",
                roles: [Some(AppRole::Productivity), Some(AppRole::Entertainment)],
                ..Fixture::default()
            }
            .build(),
        )
        .unwrap();
        assert_eq!(spec.template_id, FOCUS_MODE);
        assert_eq!(spec.parameters["focus_app"], ParamValue::Text("Notion".to_string()));
        assert_eq!(spec.parameters["blocked_app"], ParamValue::Text("YouTube".to_string()));
    }

    #[test]
    fn test_focus_mode_blocks_side_with_more_arrivals() {
        // 30 switches land in Mail, 10 in Notes
        let spec = plan(&Fixture { counts: (10, 30), ..Fixture::default() }.build()).unwrap();
        assert_eq!(spec.template_id, FOCUS_MODE);
        assert_eq!(spec.parameters["blocked_app"], ParamValue::Text("Mail".to_string()));
    }

    #[test]
    fn test_below_floor_gets_nothing() {
        assert_eq!(plan(&Fixture { tier: SeverityTier::Low, ..Fixture::default() }.build()), None);
    }

    #[test]
    fn test_workflow_gets_layout_with_ide_primary() {
        let spec = plan(
            &Fixture {
                a: "Cursor",
                b: "Safari",
                dwell: (20.0, 90.0),
                roles: [Some(AppRole::Development), Some(AppRole::Browser)],
                classification: Classification::Workflow,
                ..Fixture::default()
            }
            .build(),
        )
        .unwrap();
        assert_eq!(spec.template_id, SPLIT_SCREEN_LAYOUT);
        assert_eq!(spec.target_apps, vec!["Cursor", "Safari"]);
    }

    #[test]
    fn test_workflow_layout_can_be_disabled() {
        let catalog = TemplateCatalog::builtin();
        let config = GenerationConfig {
            layout_workflows: false,
            ..GenerationConfig::default()
        };
        let pattern = Fixture {
            classification: Classification::Workflow,
            ..Fixture::default()
        }
        .build();
        assert_eq!(ScriptGenerator::new(&catalog, &config, 1.0).plan(&pattern), None);
    }

    #[test]
    fn test_render_failure_is_isolated() {
        let catalog = TemplateCatalog::builtin();
        let config = GenerationConfig::default();
        let generator = ScriptGenerator::new(&catalog, &config, 1.0);

        let bad = Fixture {
            a: "Bad\u{1}App",
            b: "Notes",
            counts: (60, 60),
            ..Fixture::default()
        }
        .build();
        let good = Fixture { counts: (60, 60), ..Fixture::default() }.build();

        let output = generator.generate(&[bad, good]);
        assert_eq!(output.scripts.len(), 1);
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].template_id, BOUNCE_KILLER);
        assert_eq!(output.failures[0].pattern_key.app_a, "Bad\u{1}App");
        assert_eq!(output.scripts[0].file_name, "bounce-killer-mail-notes.lua");
    }

    #[test]
    fn test_file_names_are_unique() {
        let mut taken = HashSet::new();
        let spec = InterventionSpec {
            pattern_key: PatternKey::new("A b", "A-B").unwrap(),
            template_id: FOCUS_MODE.to_string(),
            parameters: BTreeMap::new(),
            target_apps: vec!["VS Code".to_string()],
        };
        assert_eq!(unique_file_name(&spec, &mut taken), "focus-mode-vs-code.lua");
        assert_eq!(unique_file_name(&spec, &mut taken), "focus-mode-vs-code-2.lua");
        assert_eq!(slug("***"), "app");
    }

    #[test]
    fn test_generation_is_deterministic() {
        let catalog = TemplateCatalog::builtin();
        let config = GenerationConfig::default();
        let generator = ScriptGenerator::new(&catalog, &config, 1.0);
        let patterns = vec![
            Fixture { counts: (60, 60), ..Fixture::default() }.build(),
            Fixture { a: "Cursor", b: "Slack", roles: [None, Some(AppRole::Communication)], ..Fixture::default() }.build(),
        ];
        assert_eq!(generator.generate(&patterns), generator.generate(&patterns));
    }
}
