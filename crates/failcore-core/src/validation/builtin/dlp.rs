use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::{ids, rule_decision};
use crate::guards::{scan_dlp, GuardSet};
use crate::validation::context::Context;
use crate::validation::decision::Decision;
use crate::validation::validator::{Validator, ValidatorError};

/// `dlp.scan`: secrets and PII in call params, through the run's scan cache.
#[derive(Debug, Clone)]
pub struct DlpValidator {
    guards: Arc<GuardSet>,
}

impl DlpValidator {
    pub fn new(guards: Arc<GuardSet>) -> Self {
        Self { guards }
    }
}

impl Validator for DlpValidator {
    fn id(&self) -> &str {
        ids::DLP
    }

    fn domain(&self) -> &str {
        "dlp"
    }

    fn config_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn evaluate(
        &self,
        context: &Context,
        _config: &Map<String, Value>,
    ) -> Result<Vec<Decision>, ValidatorError> {
        let scan = scan_dlp(
            &self.guards.dlp,
            context.scan_cache(),
            &context.params_value(),
            Some(&context.step_id),
        )?;
        let decision = rule_decision(
            self.id(),
            "FC_DLP",
            &scan.result,
            "remove or redact the sensitive value before calling the tool",
        )
        .map(|d| d.with_evidence("truncated", scan.truncated));
        Ok(decision.into_iter().collect())
    }
}
