//! Semantic intent guard: secret leakage, injection, dangerous command
//! combinations and path traversal.
//!
//! Only rules at or above `min_severity` (High by default) are enforced, so the
//! domain stays quiet on low-confidence heuristics unless asked otherwise.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{EngineMode, GuardError};
use crate::rules::{GuardDomain, RuleContext, RuleEngine, RuleEngineResult, Severity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    pub enabled: bool,
    pub ruleset: String,
    pub min_severity: Severity,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ruleset: crate::rules::builtin::SEMANTIC.to_string(),
            min_severity: Severity::High,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SemanticEngine {
    rules: RuleEngine,
    min_severity: Severity,
}

impl SemanticEngine {
    pub fn new(rules: RuleEngine, config: &SemanticConfig) -> Self {
        Self {
            rules,
            min_severity: config.min_severity,
        }
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    pub fn check(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        context: Option<&RuleContext>,
    ) -> Result<RuleEngineResult, GuardError> {
        self.rules
            .evaluate(tool, params, context, None, Some(self.min_severity))
            .map_err(|source| GuardError::Rule {
                domain: GuardDomain::Semantic,
                source,
            })
    }
}

#[derive(Debug, Clone)]
pub enum SemanticGuard {
    Real(SemanticEngine),
    NoOp,
}

impl SemanticGuard {
    pub fn mode(&self) -> EngineMode {
        match self {
            SemanticGuard::Real(_) => EngineMode::Real,
            SemanticGuard::NoOp => EngineMode::NoOp,
        }
    }

    pub fn rule_count(&self) -> usize {
        match self {
            SemanticGuard::Real(engine) => engine.rules.enabled_rule_count(),
            SemanticGuard::NoOp => 0,
        }
    }

    pub fn check(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        context: Option<&RuleContext>,
    ) -> Result<RuleEngineResult, GuardError> {
        match self {
            SemanticGuard::Real(engine) => engine.check(tool, params, context),
            SemanticGuard::NoOp => Ok(RuleEngineResult::disabled()),
        }
    }
}
