//! App identifier canonicalization
//!
//! Raw usage rows carry opaque platform identifiers (bundle ids, some of them
//! obfuscated). The catalog resolves them to stable display names.

use crate::config::AppCatalogConfig;
use std::collections::{HashMap, HashSet};

/// Result of resolving one raw identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedApp {
    pub name: String,
    /// False when the identifier matched nothing and was passed through
    pub resolved: bool,
}

/// Lookup table built from [`AppCatalogConfig`]
#[derive(Debug, Clone)]
pub struct AppCatalog {
    exact: HashMap<String, String>,
    /// Lowercased prefix and display name, in configured order
    prefixes: Vec<(String, String)>,
    /// Display names, so already-canonical input is recognized
    names: HashSet<String>,
}

impl Default for AppCatalog {
    fn default() -> Self {
        Self::from_config(&AppCatalogConfig::default())
    }
}

impl AppCatalog {
    pub fn from_config(config: &AppCatalogConfig) -> Self {
        let exact: HashMap<String, String> = config
            .exact
            .iter()
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect();
        let prefixes: Vec<(String, String)> = config
            .prefixes
            .iter()
            .map(|rule| (rule.prefix.to_lowercase(), rule.name.clone()))
            .collect();
        let names = exact
            .values()
            .chain(prefixes.iter().map(|(_, name)| name))
            .cloned()
            .collect();

        Self {
            exact,
            prefixes,
            names,
        }
    }

    /// Resolve an identifier: exact match, then prefix rules, then pass-through.
    pub fn resolve(&self, identifier: &str) -> ResolvedApp {
        let identifier = identifier.trim();

        if let Some(name) = self.exact.get(identifier) {
            return ResolvedApp {
                name: name.clone(),
                resolved: true,
            };
        }

        let lowered = identifier.to_lowercase();
        if let Some((_, name)) = self
            .prefixes
            .iter()
            .find(|(prefix, _)| lowered.starts_with(prefix.as_str()))
        {
            return ResolvedApp {
                name: name.clone(),
                resolved: true,
            };
        }

        ResolvedApp {
            name: identifier.to_string(),
            resolved: self.names.contains(identifier),
        }
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrefixRule;
    use std::collections::BTreeMap;

    #[test]
    fn test_exact_match() {
        let catalog = AppCatalog::default();
        let app = catalog.resolve("com.tinyspeck.slackmacgap");
        assert_eq!(app.name, "Slack");
        assert!(app.resolved);
    }

    #[test]
    fn test_obfuscated_ide_bundle_id() {
        let catalog = AppCatalog::default();
        assert_eq!(catalog.resolve("com.todesktop.230313mzl4w4u92").name, "Cursor");
        // A different build suffix still hits the prefix rule
        assert_eq!(catalog.resolve("com.todesktop.230313abcdef").name, "Cursor");
    }

    #[test]
    fn test_prefix_rules_are_case_insensitive() {
        let catalog = AppCatalog::default();
        assert_eq!(catalog.resolve("com.google.Chrome.canary").name, "Chrome");
        assert_eq!(catalog.resolve("com.microsoft.VSCodeInsiders").name, "VS Code Insiders");
        assert_eq!(catalog.resolve("com.jetbrains.PyCharm-EAP").name, "PyCharm");
        assert_eq!(catalog.resolve("com.jetbrains.CLion").name, "JetBrains IDE");
    }

    #[test]
    fn test_unknown_identifier_passes_through() {
        let catalog = AppCatalog::default();
        let app = catalog.resolve("com.example.UnknownApp");
        assert_eq!(app.name, "com.example.UnknownApp");
        assert!(!app.resolved);
    }

    #[test]
    fn test_display_name_counts_as_resolved() {
        let catalog = AppCatalog::default();
        let app = catalog.resolve("Safari");
        assert_eq!(app.name, "Safari");
        assert!(app.resolved);
    }

    #[test]
    fn test_first_matching_prefix_wins() {
        let config = AppCatalogConfig {
            exact: BTreeMap::new(),
            prefixes: vec![
                PrefixRule {
                    prefix: "com.acme.".to_string(),
                    name: "Acme".to_string(),
                },
                PrefixRule {
                    prefix: "com.acme.editor".to_string(),
                    name: "Acme Editor".to_string(),
                },
            ],
        };
        let catalog = AppCatalog::from_config(&config);
        assert_eq!(catalog.resolve("com.acme.editor").name, "Acme");
    }
}
