use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::ids;
use crate::guards::{DetectedEffect, EffectBoundary, EffectType, GuardSet};
use crate::validation::context::Context;
use crate::validation::decision::{Decision, RiskLevel};
use crate::validation::validator::{config_strings, Validator, ValidatorError};

pub const EFFECT_BOUNDARY: &str = "FC_EFFECT_BOUNDARY";

/// `effects.boundary`: inferred side effects checked against an allowed set.
///
/// The boundary comes from `config.allowed` when present, else from the
/// guard's configuration. With neither there is nothing to enforce.
#[derive(Debug, Clone)]
pub struct EffectsValidator {
    guards: Arc<GuardSet>,
}

impl EffectsValidator {
    pub fn new(guards: Arc<GuardSet>) -> Self {
        Self { guards }
    }

    fn boundary(
        &self,
        config: &Map<String, Value>,
    ) -> Result<Option<EffectBoundary>, ValidatorError> {
        if !config.contains_key("allowed") {
            return Ok(None);
        }
        let names = config_strings(self.id(), config, "allowed", &[])?;
        let allowed = names
            .iter()
            .map(|name| {
                EffectType::parse(name).ok_or_else(|| ValidatorError::InvalidConfig {
                    validator_id: self.id().to_string(),
                    reason: format!("unknown effect type '{name}'"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(EffectBoundary::new(allowed)))
    }
}

fn effect_json(effect: &DetectedEffect) -> Value {
    json!({
        "effect": effect.effect.as_str(),
        "target": effect.target,
        "evidence": effect.evidence,
    })
}

impl Validator for EffectsValidator {
    fn id(&self) -> &str {
        ids::EFFECTS
    }

    fn domain(&self) -> &str {
        "effects"
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "allowed": {
                    "type": "array",
                    "items": {"enum": [
                        "filesystem_read",
                        "filesystem_write",
                        "filesystem_delete",
                        "network",
                        "exec"
                    ]}
                }
            }
        })
    }

    fn evaluate(
        &self,
        context: &Context,
        config: &Map<String, Value>,
    ) -> Result<Vec<Decision>, ValidatorError> {
        let effects = &self.guards.effects;
        let report = match self.boundary(config)? {
            Some(boundary) => effects.check_with_boundary(&context.tool, &context.params, &boundary),
            None => effects.check(&context.tool, &context.params),
        };
        let Some(first) = report.violations.first() else {
            return Ok(Vec::new());
        };
        let risk = if report
            .violations
            .iter()
            .any(|v| matches!(v.effect, EffectType::Exec | EffectType::FilesystemDelete))
        {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };
        let names: Vec<&str> = report.violations.iter().map(|v| v.effect.as_str()).collect();
        let message = format!(
            "tool '{}' has effects outside the boundary: {}",
            context.tool,
            names.join(", ")
        );
        let violations: Vec<Value> = report.violations.iter().map(effect_json).collect();
        let effects: Vec<Value> = report.effects.iter().map(effect_json).collect();
        Ok(vec![Decision::block(self.id(), EFFECT_BOUNDARY, message, risk)
            .with_rule_id(format!("EFFECT_{}", first.effect.as_str().to_uppercase()))
            .with_evidence("violations", violations)
            .with_evidence("effects", effects)
            .with_remediation("grant the effect in the policy boundary or use a narrower tool")])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::GuardConfig;

    fn validator() -> EffectsValidator {
        EffectsValidator::new(Arc::new(GuardSet::builtin(&GuardConfig::default()).unwrap()))
    }

    fn ctx(tool: &str, params: Value) -> Context {
        Context::new(tool, params.as_object().cloned().unwrap(), "s1")
    }

    #[test]
    fn test_write_outside_read_only_boundary_blocks() {
        let config = json!({"allowed": ["filesystem_read"]});
        let out = validator()
            .evaluate(&ctx("write_file", json!({"path": "a.txt"})), config.as_object().unwrap())
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code(), EFFECT_BOUNDARY);
        assert_eq!(out[0].rule_id(), Some("EFFECT_FILESYSTEM_WRITE"));
    }

    #[test]
    fn test_allowed_effect_and_no_boundary_are_quiet() {
        let config = json!({"allowed": ["filesystem_read"]});
        let v = validator();
        assert!(v
            .evaluate(&ctx("read_file", json!({"path": "a.txt"})), config.as_object().unwrap())
            .unwrap()
            .is_empty());
        assert!(v
            .evaluate(&ctx("write_file", json!({"path": "a.txt"})), &Map::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_unknown_effect_name_is_config_error() {
        let config = json!({"allowed": ["teleport"]});
        let err = validator()
            .evaluate(&ctx("x", json!({})), config.as_object().unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }
}
