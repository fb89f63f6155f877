//! Built-in validators.
//!
//! `security.path_traversal` and `network.ssrf` are self-contained; the rest
//! adapt one guard domain of a shared [`GuardSet`] to the validator contract.

mod dlp;
mod drift;
mod effects;
mod path;
mod semantic;
mod ssrf;
mod taint;

use std::sync::Arc;

use serde_json::{json, Value};

pub use dlp::DlpValidator;
pub use drift::DriftValidator;
pub use effects::EffectsValidator;
pub use path::{PathTraversalValidator, PATH_TRAVERSAL, SANDBOX_VIOLATION};
pub use semantic::SemanticValidator;
pub use ssrf::{SsrfValidator, SSRF_CODE};
pub use taint::TaintValidator;

use super::decision::{Decision, RiskLevel};
use super::validator::ValidatorRegistry;
use crate::guards::GuardSet;
use crate::rules::{RuleAction, RuleEngineResult, RuleMatch};

/// Stable ids of the built-in validators.
pub mod ids {
    pub const PATH_TRAVERSAL: &str = "security.path_traversal";
    pub const SSRF: &str = "network.ssrf";
    pub const DLP: &str = "dlp.scan";
    pub const SEMANTIC: &str = "semantic.intent";
    pub const EFFECTS: &str = "effects.boundary";
    pub const TAINT: &str = "taint.flow";
    pub const DRIFT: &str = "drift.params";

    pub const ALL: &[&str] = &[PATH_TRAVERSAL, SSRF, DLP, SEMANTIC, EFFECTS, TAINT, DRIFT];
}

impl ValidatorRegistry {
    /// Registry holding every built-in validator, the guard-backed ones
    /// sharing `guards`.
    pub fn builtin(guards: Arc<GuardSet>) -> Self {
        ValidatorRegistry::new()
            .with(PathTraversalValidator)
            .with(SsrfValidator)
            .with(DlpValidator::new(guards.clone()))
            .with(SemanticValidator::new(guards.clone()))
            .with(EffectsValidator::new(guards.clone()))
            .with(TaintValidator::new(guards.clone()))
            .with(DriftValidator::new(guards))
    }
}

/// The most severe match; the earliest wins a tie.
pub(crate) fn top_match(result: &RuleEngineResult) -> Option<&RuleMatch> {
    let highest = result.highest_severity?;
    result.matches.iter().find(|m| m.severity == highest)
}

pub(crate) fn matches_evidence(result: &RuleEngineResult) -> Value {
    Value::Array(
        result
            .matches
            .iter()
            .map(|m| {
                json!({
                    "rule_id": m.rule_id,
                    "category": m.category.as_str(),
                    "severity": m.severity.as_str(),
                    "excerpt": m.excerpt,
                })
            })
            .collect(),
    )
}

/// Turn a rule-engine verdict into a decision coded `<prefix>_<CATEGORY>`.
/// Allow and Log verdicts produce nothing.
pub(crate) fn rule_decision(
    validator_id: &str,
    prefix: &str,
    result: &RuleEngineResult,
    remediation: &str,
) -> Option<Decision> {
    let top = top_match(result)?;
    let code = format!("{prefix}_{}", top.category.short_name());
    let risk = RiskLevel::from(top.severity);
    let message = format!("{} matched ({})", top.name, top.rule_id);
    let decision = match result.action {
        RuleAction::Block => Decision::block(validator_id, code, message, risk),
        RuleAction::Warn => Decision::warn(validator_id, code, message, risk),
        RuleAction::Allow | RuleAction::Log => return None,
    };
    Some(
        decision
            .with_rule_id(top.rule_id.as_str())
            .with_evidence("matches", matches_evidence(result))
            .with_evidence("confidence", result.confidence)
            .with_remediation(remediation),
    )
}
