//! Workflow classifier
//!
//! Separates purposeful app pairings (editor and browser while testing) from
//! distraction loops. A deterministic rule set decides most patterns; the rest
//! are ambiguous and may be handed to an external [`PatternAnnotator`], which is
//! given a bounded amount of time. Anything still undecided is a distraction.

use crate::config::{AppMatcher, ClassificationRules, PairRule};
use crate::types::{AppRole, Classification, ClassificationSource, ClassifiedPattern, ScoredPattern, UserBaseline};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// What an annotator gets to look at besides the pattern
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationContext {
    pub roles: [Option<AppRole>; 2],
    pub symmetry: f64,
    pub baseline: UserBaseline,
}

/// Decides a single pattern
pub trait PatternClassifier {
    fn classify(&self, pattern: &ScoredPattern) -> Classification;
}

/// External annotation layer for ambiguous patterns.
///
/// Runs on a worker thread; the engine stops waiting after the configured timeout.
pub trait PatternAnnotator: Send + Sync {
    fn annotate(&self, pattern: &ScoredPattern, context: &AnnotationContext) -> Classification;
}

impl<F> PatternAnnotator for F
where
    F: Fn(&ScoredPattern, &AnnotationContext) -> Classification + Send + Sync,
{
    fn annotate(&self, pattern: &ScoredPattern, context: &AnnotationContext) -> Classification {
        self(pattern, context)
    }
}

/// Allow/deny/symmetry rule classifier
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    rules: ClassificationRules,
    /// Lowercased keyword tokens per role, in rule order
    keywords: Vec<(AppRole, Vec<Vec<String>>)>,
}

impl RuleClassifier {
    pub fn new(rules: ClassificationRules) -> Self {
        let keywords = rules
            .roles
            .iter()
            .map(|rule| (rule.role, rule.keywords.iter().map(|k| tokens(k)).collect()))
            .collect();
        Self { rules, keywords }
    }

    /// Role of a canonical app name: first role with a keyword matching whole words
    pub fn role_of(&self, app: &str) -> Option<AppRole> {
        let words = tokens(app);
        self.keywords
            .iter()
            .find(|(_, keywords)| {
                keywords
                    .iter()
                    .any(|kw| !kw.is_empty() && words.windows(kw.len()).any(|w| w == kw.as_slice()))
            })
            .map(|(role, _)| *role)
    }

    pub fn roles_of(&self, pattern: &ScoredPattern) -> [Option<AppRole>; 2] {
        let key = &pattern.pattern.key;
        [self.role_of(&key.app_a), self.role_of(&key.app_b)]
    }

    fn pair_matches(&self, rule: &PairRule, apps: [&str; 2], roles: [Option<AppRole>; 2]) -> bool {
        let side = |matcher: &AppMatcher, i: usize| match matcher {
            AppMatcher::Role(role) => roles[i] == Some(*role),
            AppMatcher::App(name) => apps[i].eq_ignore_ascii_case(name),
        };
        (side(&rule.first, 0) && side(&rule.second, 1)) || (side(&rule.first, 1) && side(&rule.second, 0))
    }
}

impl PatternClassifier for RuleClassifier {
    /// Deny pair, allow pair, distraction role, one-sided drift, else ambiguous
    fn classify(&self, pattern: &ScoredPattern) -> Classification {
        let apps = pattern.pattern.key.apps();
        let roles = self.roles_of(pattern);

        if self.rules.deny_pairs.iter().any(|r| self.pair_matches(r, apps, roles)) {
            return Classification::Distraction;
        }
        if self.rules.allow_pairs.iter().any(|r| self.pair_matches(r, apps, roles)) {
            return Classification::Workflow;
        }
        if roles
            .iter()
            .flatten()
            .any(|role| self.rules.distraction_roles.contains(role))
        {
            return Classification::Distraction;
        }
        if pattern.pattern.directional_counts.symmetry() < self.rules.drift_symmetry {
            return Classification::Distraction;
        }
        Classification::Ambiguous
    }
}

/// Rule classification plus bounded external annotation
pub struct WorkflowClassifier {
    rules: RuleClassifier,
    annotator: Option<Arc<dyn PatternAnnotator>>,
    timeout: Duration,
}

impl WorkflowClassifier {
    pub fn new(rules: ClassificationRules) -> Self {
        let timeout = Duration::from_millis(rules.annotation_timeout_ms);
        Self {
            rules: RuleClassifier::new(rules),
            annotator: None,
            timeout,
        }
    }

    pub fn with_annotator(mut self, annotator: Arc<dyn PatternAnnotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn rules(&self) -> &RuleClassifier {
        &self.rules
    }

    /// Classify every pattern, keeping the input order
    pub fn classify_all(&self, patterns: Vec<ScoredPattern>, baseline: &UserBaseline) -> Vec<ClassifiedPattern> {
        patterns
            .into_iter()
            .map(|scored| self.classify_one(scored, baseline))
            .collect()
    }

    fn classify_one(&self, scored: ScoredPattern, baseline: &UserBaseline) -> ClassifiedPattern {
        let roles = self.rules.roles_of(&scored);
        let (classification, source) = match self.rules.classify(&scored) {
            Classification::Ambiguous => self.resolve_ambiguous(&scored, roles, baseline),
            decided => (decided, ClassificationSource::Rule),
        };

        ClassifiedPattern {
            scored,
            classification,
            source,
            roles,
        }
    }

    fn resolve_ambiguous(
        &self,
        scored: &ScoredPattern,
        roles: [Option<AppRole>; 2],
        baseline: &UserBaseline,
    ) -> (Classification, ClassificationSource) {
        let fallback = (Classification::Distraction, ClassificationSource::Default);
        let Some(annotator) = &self.annotator else {
            return fallback;
        };

        let context = AnnotationContext {
            roles,
            symmetry: scored.pattern.directional_counts.symmetry(),
            baseline: baseline.clone(),
        };
        let (tx, rx) = mpsc::channel();
        let annotator = Arc::clone(annotator);
        let pattern = scored.clone();

        // The worker is detached; a late answer is dropped with the channel.
        let spawned = thread::Builder::new()
            .name("loopwatch-annotator".to_string())
            .spawn(move || {
                let _ = tx.send(annotator.annotate(&pattern, &context));
            });
        if let Err(e) = spawned {
            log::warn!("Could not start annotator for {}: {e}", scored.pattern.key);
            return fallback;
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Classification::Ambiguous) => fallback,
            Ok(decided) => (decided, ClassificationSource::Annotation),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Annotation for {} timed out after {:?}; treating as distraction",
                    scored.pattern.key,
                    self.timeout
                );
                fallback
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                log::warn!("Annotator for {} exited without an answer", scored.pattern.key);
                fallback
            }
        }
    }
}

/// Lowercase alphanumeric words
fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}
