//! Rule data model: severities, actions, categories, patterns and rule sets.
//!
//! Definitions ([`RuleDefinition`], [`RuleSetDefinition`]) are the serde shape
//! of the RuleSet YAML document. [`Rule`] is the compiled form: regexes are
//! built once at load time so evaluation never compiles patterns.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{RuleError, RuleResult};

// ---------------------------------------------------------------------------
// Severity / action
// ---------------------------------------------------------------------------

/// Rule severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Default action when a rule of this severity matches.
    ///
    /// | Severity       | Action |
    /// |----------------|--------|
    /// | Critical, High | Block  |
    /// | Medium         | Warn   |
    /// | Low            | Log    |
    pub fn default_action(self) -> RuleAction {
        match self {
            Severity::Critical | Severity::High => RuleAction::Block,
            Severity::Medium => RuleAction::Warn,
            Severity::Low => RuleAction::Log,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action a rule (or the engine, in aggregate) resolves to. Ordered by
/// strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Log,
    Warn,
    Block,
}

impl RuleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleAction::Allow => "allow",
            RuleAction::Log => "log",
            RuleAction::Warn => "warn",
            RuleAction::Block => "block",
        }
    }
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Domains and categories
// ---------------------------------------------------------------------------

/// The five guard domains sharing the rule model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardDomain {
    Dlp,
    Semantic,
    Effects,
    Taint,
    Drift,
}

impl GuardDomain {
    pub const ALL: [GuardDomain; 5] = [
        GuardDomain::Dlp,
        GuardDomain::Semantic,
        GuardDomain::Effects,
        GuardDomain::Taint,
        GuardDomain::Drift,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GuardDomain::Dlp => "dlp",
            GuardDomain::Semantic => "semantic",
            GuardDomain::Effects => "effects",
            GuardDomain::Taint => "taint",
            GuardDomain::Drift => "drift",
        }
    }
}

impl std::fmt::Display for GuardDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed rule category set spanning all guard domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleCategory {
    DlpApiKey,
    DlpSecretToken,
    DlpPrivateKey,
    DlpPii,
    DlpPaymentCard,
    SemanticSecretLeakage,
    SemanticInjection,
    SemanticDangerousCombo,
    SemanticPathTraversal,
    EffectFilesystem,
    EffectNetwork,
    EffectExec,
    TaintSource,
    TaintSink,
    DriftParameter,
    DriftTarget,
}

impl RuleCategory {
    /// Domain that owns this category.
    pub fn domain(self) -> GuardDomain {
        match self {
            RuleCategory::DlpApiKey
            | RuleCategory::DlpSecretToken
            | RuleCategory::DlpPrivateKey
            | RuleCategory::DlpPii
            | RuleCategory::DlpPaymentCard => GuardDomain::Dlp,
            RuleCategory::SemanticSecretLeakage
            | RuleCategory::SemanticInjection
            | RuleCategory::SemanticDangerousCombo
            | RuleCategory::SemanticPathTraversal => GuardDomain::Semantic,
            RuleCategory::EffectFilesystem
            | RuleCategory::EffectNetwork
            | RuleCategory::EffectExec => GuardDomain::Effects,
            RuleCategory::TaintSource | RuleCategory::TaintSink => GuardDomain::Taint,
            RuleCategory::DriftParameter | RuleCategory::DriftTarget => GuardDomain::Drift,
        }
    }

    /// Stable upper-case name, e.g. `DLP_API_KEY`.
    pub fn as_str(self) -> &'static str {
        match self {
            RuleCategory::DlpApiKey => "DLP_API_KEY",
            RuleCategory::DlpSecretToken => "DLP_SECRET_TOKEN",
            RuleCategory::DlpPrivateKey => "DLP_PRIVATE_KEY",
            RuleCategory::DlpPii => "DLP_PII",
            RuleCategory::DlpPaymentCard => "DLP_PAYMENT_CARD",
            RuleCategory::SemanticSecretLeakage => "SEMANTIC_SECRET_LEAKAGE",
            RuleCategory::SemanticInjection => "SEMANTIC_INJECTION",
            RuleCategory::SemanticDangerousCombo => "SEMANTIC_DANGEROUS_COMBO",
            RuleCategory::SemanticPathTraversal => "SEMANTIC_PATH_TRAVERSAL",
            RuleCategory::EffectFilesystem => "EFFECT_FILESYSTEM",
            RuleCategory::EffectNetwork => "EFFECT_NETWORK",
            RuleCategory::EffectExec => "EFFECT_EXEC",
            RuleCategory::TaintSource => "TAINT_SOURCE",
            RuleCategory::TaintSink => "TAINT_SINK",
            RuleCategory::DriftParameter => "DRIFT_PARAMETER",
            RuleCategory::DriftTarget => "DRIFT_TARGET",
        }
    }

    /// Category name without its domain prefix, e.g. `API_KEY`.
    pub fn short_name(self) -> &'static str {
        let full = self.as_str();
        full.split_once('_').map(|(_, rest)| rest).unwrap_or(full)
    }
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Definitions (serde shape)
// ---------------------------------------------------------------------------

/// How a pattern's `value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    /// Regex search over the rendered params.
    Regex,
    /// Case-insensitive substring.
    Keyword,
    /// Name of a registered [`super::Detector`].
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDefinition {
    pub pattern_type: PatternType,
    pub value: String,
    /// Regex flags: `i` (case-insensitive), `m` (multi-line), `s` (dot-all).
    #[serde(default)]
    pub flags: Vec<String>,
}

impl PatternDefinition {
    pub fn regex(value: impl Into<String>) -> Self {
        Self {
            pattern_type: PatternType::Regex,
            value: value.into(),
            flags: Vec::new(),
        }
    }

    pub fn keyword(value: impl Into<String>) -> Self {
        Self {
            pattern_type: PatternType::Keyword,
            value: value.into(),
            flags: Vec::new(),
        }
    }

    pub fn custom(detector: impl Into<String>) -> Self {
        Self {
            pattern_type: PatternType::Custom,
            value: detector.into(),
            flags: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: &str) -> Self {
        self.flags.push(flags.to_string());
        self
    }
}

fn default_true() -> bool {
    true
}

/// Serde shape of one rule inside a RuleSet document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub rule_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: RuleCategory,
    pub severity: Severity,
    /// Explicit action; absent means the severity default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<RuleAction>,
    #[serde(default)]
    pub patterns: Vec<PatternDefinition>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub examples: Vec<Value>,
    #[serde(default)]
    pub false_positive_rate: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RuleDefinition {
    pub fn new(
        rule_id: impl Into<String>,
        category: RuleCategory,
        severity: Severity,
        patterns: Vec<PatternDefinition>,
    ) -> Self {
        let rule_id = rule_id.into();
        Self {
            name: rule_id.clone(),
            rule_id,
            description: String::new(),
            category,
            severity,
            action: None,
            patterns,
            config: Map::new(),
            examples: Vec::new(),
            false_positive_rate: 0.0,
            enabled: true,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_action(mut self, action: RuleAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_false_positive_rate(mut self, rate: f64) -> Self {
        self.false_positive_rate = rate;
        self
    }
}

/// Serde shape of a RuleSet document.
///
/// `rules` stays untyped so that one malformed entry can be skipped without
/// rejecting the whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSetDefinition {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: Vec<Value>,
}

impl RuleSetDefinition {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            rules: Vec::new(),
        }
    }

    /// Append a typed rule definition.
    pub fn with_rule(mut self, rule: RuleDefinition) -> RuleResult<Self> {
        self.rules.push(serde_json::to_value(rule)?);
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Compiled rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Matcher {
    Regex(Regex),
    Keyword(String),
    Custom,
}

/// A compiled pattern.
#[derive(Debug, Clone)]
pub struct RulePattern {
    pub pattern_type: PatternType,
    pub value: String,
    pub flags: Vec<String>,
    matcher: Matcher,
}

impl RulePattern {
    fn compile(rule_id: &str, def: &PatternDefinition) -> RuleResult<Self> {
        if def.value.is_empty() {
            return Err(RuleError::InvalidRule {
                rule_id: rule_id.to_string(),
                reason: "pattern value must not be empty".to_string(),
            });
        }
        let matcher = match def.pattern_type {
            PatternType::Regex => {
                let mut builder = RegexBuilder::new(&def.value);
                for flag in def.flags.iter().flat_map(|f| f.chars()) {
                    match flag {
                        'i' => builder.case_insensitive(true),
                        'm' => builder.multi_line(true),
                        's' => builder.dot_matches_new_line(true),
                        other => {
                            return Err(RuleError::InvalidRule {
                                rule_id: rule_id.to_string(),
                                reason: format!("unsupported regex flag '{other}'"),
                            })
                        }
                    };
                }
                let regex = builder.build().map_err(|source| RuleError::InvalidRegex {
                    rule_id: rule_id.to_string(),
                    source,
                })?;
                Matcher::Regex(regex)
            }
            PatternType::Keyword => Matcher::Keyword(def.value.to_lowercase()),
            PatternType::Custom => Matcher::Custom,
        };
        Ok(Self {
            pattern_type: def.pattern_type,
            value: def.value.clone(),
            flags: def.flags.clone(),
            matcher,
        })
    }

    /// Search `text`; returns the matched fragment.
    ///
    /// `lowered` is `text.to_lowercase()`, computed once by the caller.
    /// Custom patterns never match here; the engine dispatches them to detectors.
    pub fn find(&self, text: &str, lowered: &str) -> Option<String> {
        match &self.matcher {
            Matcher::Regex(re) => re.find(text).map(|m| m.as_str().to_string()),
            Matcher::Keyword(kw) => lowered.find(kw.as_str()).map(|_| self.value.clone()),
            Matcher::Custom => None,
        }
    }

    /// Replace every regex match in `text` with `replacement`.
    pub fn redact(&self, text: &str, replacement: &str) -> Option<String> {
        match &self.matcher {
            Matcher::Regex(re) if re.is_match(text) => {
                Some(re.replace_all(text, replacement).into_owned())
            }
            _ => None,
        }
    }

    pub fn to_definition(&self) -> PatternDefinition {
        PatternDefinition {
            pattern_type: self.pattern_type,
            value: self.value.clone(),
            flags: self.flags.clone(),
        }
    }
}

/// A compiled detection rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub rule_id: String,
    pub name: String,
    pub description: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub action: Option<RuleAction>,
    pub patterns: Vec<RulePattern>,
    pub config: Map<String, Value>,
    pub examples: Vec<Value>,
    pub false_positive_rate: f64,
    pub enabled: bool,
}

impl Rule {
    /// Compile a definition, validating ids, rates and patterns.
    pub fn from_definition(def: RuleDefinition) -> RuleResult<Self> {
        if def.rule_id.trim().is_empty() {
            return Err(RuleError::InvalidRule {
                rule_id: def.rule_id,
                reason: "rule_id must not be empty".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&def.false_positive_rate) {
            return Err(RuleError::InvalidRule {
                rule_id: def.rule_id,
                reason: format!(
                    "false_positive_rate {} outside [0, 1]",
                    def.false_positive_rate
                ),
            });
        }
        if def.patterns.is_empty() {
            return Err(RuleError::InvalidRule {
                rule_id: def.rule_id,
                reason: "rule has no patterns".to_string(),
            });
        }
        let patterns = def
            .patterns
            .iter()
            .map(|p| RulePattern::compile(&def.rule_id, p))
            .collect::<RuleResult<Vec<_>>>()?;

        let name = if def.name.is_empty() {
            def.rule_id.clone()
        } else {
            def.name
        };
        Ok(Self {
            rule_id: def.rule_id,
            name,
            description: def.description,
            category: def.category,
            severity: def.severity,
            action: def.action,
            patterns,
            config: def.config,
            examples: def.examples,
            false_positive_rate: def.false_positive_rate,
            enabled: def.enabled,
        })
    }

    /// The action this rule contributes when it matches.
    pub fn effective_action(&self) -> RuleAction {
        self.action.unwrap_or_else(|| self.severity.default_action())
    }

    /// Whether the rule overrides its severity's default action.
    pub fn has_explicit_action(&self) -> bool {
        self.action
            .is_some_and(|action| action != self.severity.default_action())
    }

    /// Names of custom detectors referenced by this rule.
    pub fn detector_names(&self) -> impl Iterator<Item = &str> {
        self.patterns
            .iter()
            .filter(|p| p.pattern_type == PatternType::Custom)
            .map(|p| p.value.as_str())
    }

    pub fn has_custom_detector(&self) -> bool {
        self.detector_names().next().is_some()
    }

    pub fn to_definition(&self) -> RuleDefinition {
        RuleDefinition {
            rule_id: self.rule_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category,
            severity: self.severity,
            action: self.action,
            patterns: self.patterns.iter().map(RulePattern::to_definition).collect(),
            config: self.config.clone(),
            examples: self.examples.clone(),
            false_positive_rate: self.false_positive_rate,
            enabled: self.enabled,
        }
    }
}

/// A rule definition that failed to compile and was left out of its set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRule {
    pub index: usize,
    pub rule_id: Option<String>,
    pub reason: String,
}

/// A named, versioned collection of compiled rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub name: String,
    pub version: String,
    pub description: String,
    pub rules: Vec<Rule>,
    pub skipped: Vec<SkippedRule>,
}

impl RuleSet {
    /// Compile a definition. Malformed rules are skipped with a diagnostic;
    /// the rest of the set still loads.
    pub fn from_definition(def: RuleSetDefinition) -> Self {
        let mut rules = Vec::with_capacity(def.rules.len());
        let mut skipped = Vec::new();

        for (index, raw) in def.rules.into_iter().enumerate() {
            let rule_id = raw
                .get("rule_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            let compiled = serde_json::from_value::<RuleDefinition>(raw)
                .map_err(RuleError::from)
                .and_then(Rule::from_definition);
            match compiled {
                Ok(rule) => rules.push(rule),
                Err(err) => {
                    crate::obs::emit_rule_skipped(&def.name, rule_id.as_deref(), &err);
                    skipped.push(SkippedRule {
                        index,
                        rule_id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        Self {
            name: def.name,
            version: def.version,
            description: def.description,
            rules,
            skipped,
        }
    }
}

/// Mask a matched fragment for evidence so secrets never land in traces.
pub fn mask_excerpt(fragment: &str) -> String {
    let count = fragment.chars().count();
    if count <= 8 {
        return "*".repeat(count);
    }
    let head: String = fragment.chars().take(4).collect();
    format!("{head}****({count} chars)")
}
