//! Rule engine: matches registry rules against a tool call and resolves one
//! aggregate action.
//!
//! Resolution:
//! - no match: `config.default_action` (Allow unless configured otherwise)
//! - match: the severity default of the highest matched severity, unless a
//!   matched rule declares a non-default action, in which case the *first*
//!   such rule in candidate iteration order wins. Iteration order rather than
//!   severity order is kept for compatibility with existing rulesets.
//!
//! Fail-open: a custom detector that errors or panics does not match, and any
//! internal failure yields `Allow` with a diagnostic `reason` unless
//! `config.fail_open` is false.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::detector::{DetectorInput, DetectorRegistry};
use super::error::{RuleError, RuleResult};
use super::model::{mask_excerpt, Rule, RuleAction, RuleCategory, Severity};
use super::registry::SharedRegistry;
use crate::digest::canonical_json;

/// Engine behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEngineConfig {
    /// Action when no rule matches.
    pub default_action: RuleAction,
    /// Degrade internal failures to `Allow` instead of returning an error.
    pub fail_open: bool,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            default_action: RuleAction::Allow,
            fail_open: true,
        }
    }
}

/// Optional call-site context handed to detectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleContext {
    pub run_id: Option<String>,
    pub step_id: Option<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// One matched rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule_id: String,
    pub name: String,
    pub category: RuleCategory,
    pub severity: Severity,
    /// The rule's effective action.
    pub action: RuleAction,
    /// Pattern (or detector name) that hit.
    pub pattern: String,
    /// Masked excerpt of the matched text, if any.
    pub excerpt: Option<String>,
    pub false_positive_rate: f64,
}

/// Outcome of one `evaluate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEngineResult {
    pub action: RuleAction,
    pub matches: Vec<RuleMatch>,
    pub highest_severity: Option<Severity>,
    /// `min(1 - false_positive_rate)` over matches; 1.0 without matches.
    pub confidence: f64,
    /// Diagnostic set when the result came from a fail-open path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The engine failed and degraded to Allow; the result says nothing
    /// about the payload.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed_open: bool,
}

impl RuleEngineResult {
    fn no_match(action: RuleAction) -> Self {
        Self {
            action,
            matches: Vec::new(),
            highest_severity: None,
            confidence: 1.0,
            reason: None,
            failed_open: false,
        }
    }

    fn failed_open(reason: String) -> Self {
        Self {
            reason: Some(reason),
            failed_open: true,
            ..Self::no_match(RuleAction::Allow)
        }
    }

    /// Allow without running any rule, for callers with nothing to evaluate.
    pub fn not_evaluated(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::no_match(RuleAction::Allow)
        }
    }

    /// Constant result reported by a switched-off guard domain.
    pub fn disabled() -> Self {
        Self {
            reason: Some("disabled".to_string()),
            ..Self::no_match(RuleAction::Allow)
        }
    }

    pub fn is_match(&self) -> bool {
        !self.matches.is_empty()
    }

    pub fn rule_ids(&self) -> Vec<&str> {
        self.matches.iter().map(|m| m.rule_id.as_str()).collect()
    }
}

/// Evaluates rules from a shared registry.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    registry: SharedRegistry,
    detectors: Arc<DetectorRegistry>,
    config: RuleEngineConfig,
}

impl RuleEngine {
    pub fn new(registry: SharedRegistry, detectors: Arc<DetectorRegistry>) -> Self {
        Self::with_config(registry, detectors, RuleEngineConfig::default())
    }

    pub fn with_config(
        registry: SharedRegistry,
        detectors: Arc<DetectorRegistry>,
        config: RuleEngineConfig,
    ) -> Self {
        Self {
            registry,
            detectors,
            config,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn config(&self) -> RuleEngineConfig {
        self.config
    }

    /// Number of enabled rules visible to this engine (0 if the lock is poisoned).
    pub fn enabled_rule_count(&self) -> usize {
        self.registry
            .read()
            .map(|r| r.enabled_rules().count())
            .unwrap_or(0)
    }

    /// Evaluate rules against `params` rendered as canonical JSON.
    pub fn evaluate(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        context: Option<&RuleContext>,
        categories: Option<&[RuleCategory]>,
        min_severity: Option<Severity>,
    ) -> RuleResult<RuleEngineResult> {
        let text = match canonical_json(&Value::Object(params.clone())) {
            Ok(text) => text,
            Err(err) => return self.fail(RuleError::from(err)),
        };
        self.evaluate_text(tool, params, &text, context, categories, min_severity)
    }

    /// Evaluate rules against caller-rendered text (DLP caps and renders its
    /// own payloads). Detectors still see `params`.
    pub fn evaluate_text(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        text: &str,
        context: Option<&RuleContext>,
        categories: Option<&[RuleCategory]>,
        min_severity: Option<Severity>,
    ) -> RuleResult<RuleEngineResult> {
        match self.try_evaluate(tool, params, text, context, categories, min_severity) {
            Ok(result) => Ok(result),
            Err(err) => self.fail(err),
        }
    }

    fn fail(&self, err: RuleError) -> RuleResult<RuleEngineResult> {
        if self.config.fail_open {
            tracing::warn!(event = "rules.engine_fail_open", error = %err);
            Ok(RuleEngineResult::failed_open(format!(
                "rule engine failed open: {err}"
            )))
        } else {
            Err(err)
        }
    }

    fn try_evaluate(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        text: &str,
        context: Option<&RuleContext>,
        categories: Option<&[RuleCategory]>,
        min_severity: Option<Severity>,
    ) -> RuleResult<RuleEngineResult> {
        let registry = self.registry.read().map_err(|_| RuleError::LockPoisoned)?;
        let candidates = registry.select(categories, min_severity);
        let lowered = text.to_lowercase();

        let mut matched: Vec<(&Rule, RuleMatch)> = Vec::new();
        for rule in candidates {
            let hit = if rule.has_custom_detector() {
                self.run_detectors(rule, tool, params, text, context)
            } else {
                rule.patterns
                    .iter()
                    .find_map(|p| p.find(text, &lowered).map(|frag| (p.value.clone(), Some(frag))))
            };
            if let Some((pattern, fragment)) = hit {
                let rule_match = RuleMatch {
                    rule_id: rule.rule_id.clone(),
                    name: rule.name.clone(),
                    category: rule.category,
                    severity: rule.severity,
                    action: rule.effective_action(),
                    pattern,
                    excerpt: fragment.as_deref().map(mask_excerpt),
                    false_positive_rate: rule.false_positive_rate,
                };
                matched.push((rule, rule_match));
            }
        }

        let Some(highest) = matched.iter().map(|(r, _)| r.severity).max() else {
            return Ok(RuleEngineResult::no_match(self.config.default_action));
        };

        let action = matched
            .iter()
            .find(|(r, _)| r.has_explicit_action())
            .map(|(r, _)| r.effective_action())
            .unwrap_or_else(|| highest.default_action());

        let confidence = matched
            .iter()
            .map(|(r, _)| 1.0 - r.false_positive_rate)
            .fold(1.0_f64, f64::min);

        Ok(RuleEngineResult {
            action,
            matches: matched.into_iter().map(|(_, m)| m).collect(),
            highest_severity: Some(highest),
            confidence,
            reason: None,
            failed_open: false,
        })
    }

    /// Run a rule's custom detectors; any error, panic or unknown detector
    /// counts as "no match".
    fn run_detectors(
        &self,
        rule: &Rule,
        tool: &str,
        params: &Map<String, Value>,
        text: &str,
        context: Option<&RuleContext>,
    ) -> Option<(String, Option<String>)> {
        let input = DetectorInput {
            tool,
            params,
            text,
            rule,
            context,
        };
        for name in rule.detector_names() {
            let Some(detector) = self.detectors.get(name) else {
                tracing::warn!(
                    event = "rules.detector_missing",
                    rule_id = %rule.rule_id,
                    detector = %name,
                );
                continue;
            };
            match catch_unwind(AssertUnwindSafe(|| detector.detect(&input))) {
                Ok(Ok(true)) => return Some((name.to_string(), None)),
                Ok(Ok(false)) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        event = "rules.detector_failed",
                        rule_id = %rule.rule_id,
                        detector = %name,
                        error = %err,
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        event = "rules.detector_panicked",
                        rule_id = %rule.rule_id,
                        detector = %name,
                    );
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::loader::MemoryLoader;
    use crate::rules::model::{PatternDefinition, RuleDefinition, RuleSetDefinition};
    use crate::rules::model::Severity as S;
    use crate::rules::registry::RuleRegistry;
    use serde_json::json;

    fn engine_with(rules: Vec<RuleDefinition>, detectors: DetectorRegistry) -> RuleEngine {
        let mut def = RuleSetDefinition::new("t", "1");
        for r in rules {
            def = def.with_rule(r).unwrap();
        }
        let mut registry = RuleRegistry::new(Arc::new(MemoryLoader::new().with_ruleset(def)));
        registry.load_ruleset("t").unwrap();
        RuleEngine::new(registry.into_shared(), Arc::new(detectors))
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_no_match_returns_default_action() {
        let engine = engine_with(
            vec![RuleDefinition::new(
                "k",
                RuleCategory::DlpApiKey,
                S::Critical,
                vec![PatternDefinition::keyword("secret")],
            )],
            DetectorRegistry::new(),
        );
        let result = engine
            .evaluate("x", &Map::new(), None, None, None)
            .unwrap();
        assert_eq!(result.action, RuleAction::Allow);
        assert!(result.matches.is_empty());
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_critical_match_blocks() {
        let engine = engine_with(
            vec![RuleDefinition::new(
                "k",
                RuleCategory::DlpApiKey,
                S::Critical,
                vec![PatternDefinition::keyword("secret")],
            )
            .with_false_positive_rate(0.25)],
            DetectorRegistry::new(),
        );
        let result = engine
            .evaluate("x", &params(json!({"v": "my SECRET"})), None, None, None)
            .unwrap();
        assert_eq!(result.action, RuleAction::Block);
        assert_eq!(result.highest_severity, Some(S::Critical));
        assert!((result.confidence - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_first_explicit_action_wins_by_iteration_order() {
        let engine = engine_with(
            vec![
                RuleDefinition::new(
                    "low_log",
                    RuleCategory::DlpPii,
                    S::Low,
                    vec![PatternDefinition::keyword("abc")],
                )
                .with_action(RuleAction::Warn),
                RuleDefinition::new(
                    "crit_allow",
                    RuleCategory::DlpPii,
                    S::Critical,
                    vec![PatternDefinition::keyword("abc")],
                )
                .with_action(RuleAction::Allow),
            ],
            DetectorRegistry::new(),
        );
        let result = engine
            .evaluate("x", &params(json!({"v": "abc"})), None, None, None)
            .unwrap();
        assert_eq!(result.matches.len(), 2);
        assert_eq!(result.action, RuleAction::Warn);
    }

    #[test]
    fn test_detector_error_and_panic_fail_open() {
        let detectors = DetectorRegistry::new()
            .with_detector("boom", |_: &DetectorInput<'_>| -> Result<bool, String> {
                panic!("detector bug")
            })
            .with_detector("err", |_: &DetectorInput<'_>| -> Result<bool, String> {
                Err("nope".to_string())
            });
        let engine = engine_with(
            vec![
                RuleDefinition::new(
                    "panics",
                    RuleCategory::SemanticInjection,
                    S::Critical,
                    vec![PatternDefinition::custom("boom")],
                ),
                RuleDefinition::new(
                    "errors",
                    RuleCategory::SemanticInjection,
                    S::Critical,
                    vec![PatternDefinition::custom("err")],
                ),
                RuleDefinition::new(
                    "unknown",
                    RuleCategory::SemanticInjection,
                    S::Critical,
                    vec![PatternDefinition::custom("not_registered")],
                ),
            ],
            detectors,
        );
        let result = engine
            .evaluate("x", &params(json!({"a": 1})), None, None, None)
            .unwrap();
        assert!(result.matches.is_empty());
        assert_eq!(result.action, RuleAction::Allow);
    }

    #[test]
    fn test_poisoned_registry_fails_open_or_propagates() {
        let engine = engine_with(vec![], DetectorRegistry::new());
        let registry = engine.registry().clone();
        let _ = std::thread::spawn(move || {
            let _guard = registry.write().unwrap();
            panic!("poison");
        })
        .join();

        let result = engine.evaluate("x", &Map::new(), None, None, None).unwrap();
        assert_eq!(result.action, RuleAction::Allow);
        assert!(result.failed_open);
        assert!(result.reason.unwrap().contains("failed open"));

        let strict = RuleEngine::with_config(
            engine.registry().clone(),
            Arc::new(DetectorRegistry::new()),
            RuleEngineConfig {
                fail_open: false,
                ..RuleEngineConfig::default()
            },
        );
        assert!(matches!(
            strict.evaluate("x", &Map::new(), None, None, None),
            Err(RuleError::LockPoisoned)
        ));
    }
}
