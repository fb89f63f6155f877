use std::sync::Arc;

use serde_json::{Map, Value};

use super::{ids, rule_decision};
use crate::guards::{scan_semantic, GuardSet};
use crate::validation::context::Context;
use crate::validation::decision::Decision;
use crate::validation::validator::{Validator, ValidatorError};

/// `semantic.intent`: injection, destructive commands and secret leakage
/// inferred from the whole call.
#[derive(Debug, Clone)]
pub struct SemanticValidator {
    guards: Arc<GuardSet>,
}

impl SemanticValidator {
    pub fn new(guards: Arc<GuardSet>) -> Self {
        Self { guards }
    }
}

impl Validator for SemanticValidator {
    fn id(&self) -> &str {
        ids::SEMANTIC
    }

    fn domain(&self) -> &str {
        "semantic"
    }

    fn evaluate(
        &self,
        context: &Context,
        _config: &Map<String, Value>,
    ) -> Result<Vec<Decision>, ValidatorError> {
        let rule_context = context.rule_context();
        let result = scan_semantic(
            &self.guards.semantic,
            context.scan_cache(),
            &context.tool,
            &context.params,
            Some(&rule_context),
            Some(&context.step_id),
        )?;
        Ok(rule_decision(
            self.id(),
            "FC_SEMANTIC",
            &result,
            "review the call; the arguments look like an attack or a destructive operation",
        )
        .into_iter()
        .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::GuardConfig;
    use serde_json::json;

    #[test]
    fn test_shell_injection_blocks() {
        let v = SemanticValidator::new(Arc::new(GuardSet::builtin(&GuardConfig::default()).unwrap()));
        let ctx = Context::new(
            "run_command",
            json!({"cmd": "ls; rm -rf /tmp/x"}).as_object().cloned().unwrap(),
            "s1",
        );
        let out = v.evaluate(&ctx, &Map::new()).unwrap();
        assert!(!out.is_empty());
        assert!(out[0].code().starts_with("FC_SEMANTIC_"));
        assert!(out[0].is_block());
    }

    #[test]
    fn test_benign_call_is_quiet() {
        let v = SemanticValidator::new(Arc::new(GuardSet::builtin(&GuardConfig::default()).unwrap()));
        let ctx = Context::new(
            "search",
            json!({"query": "weather in Paris"}).as_object().cloned().unwrap(),
            "s1",
        );
        assert!(v.evaluate(&ctx, &Map::new()).unwrap().is_empty());
    }
}
