//! Intervention template catalog
//!
//! Templates are data: an id, a parameter schema and Lua source with `{{name}}`
//! placeholders. New intervention types are added by registering a template,
//! not by touching the generator. Every template is a Hammerspoon module that
//! exposes a trigger entry point and a status entry point and returns its
//! module table.
//!
//! Rendering is a pure function of the template and the parameters: no clock,
//! no randomness, so identical inputs give byte-identical scripts.

use crate::error::TemplateRenderError;
use crate::types::{InterventionSpec, ParamValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const BOUNCE_KILLER: &str = "bounce-killer";
pub const FOCUS_MODE: &str = "focus-mode";
pub const COMMUNICATION_BATCHER: &str = "communication-batcher";
pub const SPLIT_SCREEN_LAYOUT: &str = "split-screen-layout";

/// Kind of value a parameter accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// One app name, rendered as a Lua string
    App,
    /// List of app names, rendered as a Lua array of strings
    Apps,
    Number,
    /// Free text, rendered as a Lua string
    Text,
}

impl ParamKind {
    fn describe(&self) -> &'static str {
        match self {
            ParamKind::App => "an app name",
            ParamKind::Apps => "a list of app names",
            ParamKind::Number => "a finite number",
            ParamKind::Text => "a string",
        }
    }
}

/// One entry of a template's parameter schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl ParamSpec {
    fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            default: None,
            description: Some(description.to_string()),
        }
    }

    fn with_default(name: &str, value: f64, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Number,
            required: true,
            default: Some(ParamValue::Number(value)),
            description: Some(description.to_string()),
        }
    }
}

/// A registered intervention template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub id: String,
    pub description: String,
    #[serde(default = "default_trigger")]
    pub trigger_entry_point: String,
    #[serde(default = "default_status")]
    pub status_entry_point: String,
    pub params: Vec<ParamSpec>,
    pub source: String,
}

fn default_trigger() -> String {
    "start".to_string()
}

fn default_status() -> String {
    "status".to_string()
}

/// Catalog of templates keyed by id
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, TemplateSpec>,
}

impl TemplateCatalog {
    /// The four built-in interventions
    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        for spec in builtin_templates() {
            catalog.templates.insert(spec.id.clone(), spec);
        }
        catalog
    }

    /// Built-ins plus extra templates; an extra template may replace a built-in
    pub fn with_templates(extra: &[TemplateSpec]) -> Result<Self, TemplateRenderError> {
        let mut catalog = Self::builtin();
        for spec in extra {
            catalog.register(spec.clone())?;
        }
        Ok(catalog)
    }

    /// Check and add a template
    pub fn register(&mut self, spec: TemplateSpec) -> Result<(), TemplateRenderError> {
        validate_template(&spec)?;
        log::debug!("Registered template {}", spec.id);
        self.templates.insert(spec.id.clone(), spec);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&TemplateSpec> {
        self.templates.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TemplateSpec> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Render the script for one intervention
    pub fn render(&self, spec: &InterventionSpec) -> Result<String, TemplateRenderError> {
        let template = self
            .get(&spec.template_id)
            .ok_or_else(|| TemplateRenderError::UnknownTemplate(spec.template_id.clone()))?;

        let mut literals: HashMap<&str, String> = HashMap::new();
        for param in &template.params {
            let value = spec.parameters.get(&param.name).or(param.default.as_ref());
            let literal = match value {
                Some(value) => render_value(template, param, value)?,
                None if param.required => {
                    return Err(TemplateRenderError::MissingParameter {
                        template: template.id.clone(),
                        parameter: param.name.clone(),
                    })
                }
                None => "nil".to_string(),
            };
            literals.insert(param.name.as_str(), literal);
        }

        let targets = spec
            .target_apps
            .iter()
            .map(|app| lua_app_literal(app))
            .collect::<Result<Vec<_>, _>>()?;

        let body = substitute(template, |name| literals.get(name).cloned())?;

        let mut out = String::with_capacity(body.len() + 256);
        out.push_str(&format!("-- loopwatch intervention: {}\n", template.id));
        out.push_str(&format!("-- targets: {}\n", targets.join(", ")));
        out.push_str(&format!(
            "-- entry points: M.{}(), M.{}()\n\n",
            template.trigger_entry_point, template.status_entry_point
        ));
        out.push_str(&body);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }
}

/// Quote a string as a Lua double-quoted literal.
///
/// Backslash, quotes, newline, carriage return and tab are escaped. Any other
/// control character has no safe spelling and is rejected.
pub fn lua_string_literal(value: &str) -> Result<String, String> {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                return Err(format!("contains control character U+{:04X}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    Ok(out)
}

fn lua_app_literal(name: &str) -> Result<String, TemplateRenderError> {
    if name.trim().is_empty() {
        return Err(TemplateRenderError::UnsafeAppName {
            name: name.to_string(),
            reason: "empty name".to_string(),
        });
    }
    lua_string_literal(name).map_err(|reason| TemplateRenderError::UnsafeAppName {
        name: name.to_string(),
        reason,
    })
}

/// Shortest round-trip spelling; integral values without a fraction
fn lua_number_literal(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn render_value(template: &TemplateSpec, param: &ParamSpec, value: &ParamValue) -> Result<String, TemplateRenderError> {
    let invalid = || TemplateRenderError::InvalidParameter {
        template: template.id.clone(),
        parameter: param.name.clone(),
        expected: param.kind.describe().to_string(),
    };

    match (param.kind, value) {
        (ParamKind::App, ParamValue::Text(name)) => lua_app_literal(name),
        (ParamKind::Apps, ParamValue::List(names)) => {
            let items = names
                .iter()
                .map(|name| lua_app_literal(name))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("{{ {} }}", items.join(", ")))
        }
        (ParamKind::Number, ParamValue::Number(n)) if n.is_finite() => Ok(lua_number_literal(*n)),
        (ParamKind::Text, ParamValue::Text(text)) => lua_string_literal(text).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Replace every `{{name}}` using `lookup`. Unknown or unclosed placeholders are errors.
fn substitute<F>(template: &TemplateSpec, lookup: F) -> Result<String, TemplateRenderError>
where
    F: Fn(&str) -> Option<String>,
{
    let malformed = |reason: String| TemplateRenderError::MalformedTemplate {
        template: template.id.clone(),
        reason,
    };

    let mut out = String::with_capacity(template.source.len());
    let mut rest = template.source.as_str();
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| malformed("unclosed placeholder".to_string()))?;
        let name = after[..close].trim();
        let literal = lookup(name).ok_or_else(|| malformed(format!("undeclared placeholder {{{{{name}}}}}")))?;
        out.push_str(&literal);
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn validate_template(spec: &TemplateSpec) -> Result<(), TemplateRenderError> {
    let malformed = |reason: String| TemplateRenderError::MalformedTemplate {
        template: spec.id.clone(),
        reason,
    };

    if spec.id.trim().is_empty() {
        return Err(malformed("empty template id".to_string()));
    }
    let mut names: Vec<&str> = spec.params.iter().map(|p| p.name.as_str()).collect();
    names.sort_unstable();
    if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
        return Err(malformed(format!("parameter {} declared twice", dup[0])));
    }
    for entry in [&spec.trigger_entry_point, &spec.status_entry_point] {
        if !spec.source.contains(&format!("function M.{entry}(")) {
            return Err(malformed(format!("missing entry point M.{entry}()")));
        }
    }
    if !spec.source.contains("return M") {
        return Err(malformed("module table M is never returned".to_string()));
    }

    // Every placeholder must be declared
    substitute(spec, |name| names.binary_search(&name).ok().map(|_| String::new())).map(|_| ())
}

fn builtin_templates() -> Vec<TemplateSpec> {
    vec![
        TemplateSpec {
            id: BOUNCE_KILLER.to_string(),
            description: "Hides the app being bounced away from once quick A-B-A returns pile up".to_string(),
            trigger_entry_point: default_trigger(),
            status_entry_point: default_status(),
            params: vec![
                ParamSpec::required("app_a", ParamKind::App, "First app of the loop"),
                ParamSpec::required("app_b", ParamKind::App, "Second app of the loop"),
                ParamSpec::with_default("bounce_threshold", 1.0, "Seconds within which a return counts as a bounce"),
                ParamSpec::with_default("max_bounces", 3.0, "Bounces tolerated before intervening"),
                ParamSpec::with_default("cooldown_seconds", 120.0, "Quiet period after an intervention"),
            ],
            source: include_str!("lua/bounce_killer.lua").to_string(),
        },
        TemplateSpec {
            id: FOCUS_MODE.to_string(),
            description: "Timed focus block that keeps the distracting side of a loop hidden".to_string(),
            trigger_entry_point: default_trigger(),
            status_entry_point: default_status(),
            params: vec![
                ParamSpec::required("focus_app", ParamKind::App, "App to stay in"),
                ParamSpec::required("blocked_app", ParamKind::App, "App hidden during the block"),
                ParamSpec::with_default("block_minutes", 25.0, "Length of the focus block"),
            ],
            source: include_str!("lua/focus_mode.lua").to_string(),
        },
        TemplateSpec {
            id: COMMUNICATION_BATCHER.to_string(),
            description: "Makes a repeatedly checked app reachable only in short periodic windows".to_string(),
            trigger_entry_point: default_trigger(),
            status_entry_point: default_status(),
            params: vec![
                ParamSpec::required("app", ParamKind::App, "App to batch"),
                ParamSpec::with_default("interval_minutes", 30.0, "Minutes between windows"),
                ParamSpec::with_default("window_minutes", 5.0, "Length of each window"),
            ],
            source: include_str!("lua/communication_batcher.lua").to_string(),
        },
        TemplateSpec {
            id: SPLIT_SCREEN_LAYOUT.to_string(),
            description: "Tiles a workflow pair side by side so no switch is needed".to_string(),
            trigger_entry_point: default_trigger(),
            status_entry_point: default_status(),
            params: vec![
                ParamSpec::required("primary_app", ParamKind::App, "App on the left"),
                ParamSpec::required("secondary_app", ParamKind::App, "App on the right"),
                ParamSpec::with_default("primary_ratio", 0.6, "Screen fraction of the primary app"),
            ],
            source: include_str!("lua/split_screen_layout.lua").to_string(),
        },
    ]
}
