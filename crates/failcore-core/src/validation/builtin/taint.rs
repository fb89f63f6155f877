use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::{ids, matches_evidence, top_match};
use crate::guards::{scan_taint, GuardSet};
use crate::rules::RuleAction;
use crate::validation::context::Context;
use crate::validation::decision::{Decision, RiskLevel};
use crate::validation::validator::{Validator, ValidatorError};

pub const TAINT_FLOW: &str = "FC_TAINT_FLOW";

/// `taint.flow`: data from a source tool (or secret-bearing content)
/// reaching a sink. Needs the run's taint tracker on the context.
#[derive(Debug, Clone)]
pub struct TaintValidator {
    guards: Arc<GuardSet>,
}

impl TaintValidator {
    pub fn new(guards: Arc<GuardSet>) -> Self {
        Self { guards }
    }
}

impl Validator for TaintValidator {
    fn id(&self) -> &str {
        ids::TAINT
    }

    fn domain(&self) -> &str {
        "taint"
    }

    fn evaluate(
        &self,
        context: &Context,
        _config: &Map<String, Value>,
    ) -> Result<Vec<Decision>, ValidatorError> {
        let Some(tracker) = context.taint.as_deref() else {
            return Ok(Vec::new());
        };
        let content = scan_taint(
            &self.guards.taint,
            context.scan_cache(),
            &context.params_value(),
            Some(&context.step_id),
        )?;
        let result = self.guards.taint.check_sink(
            &context.tool,
            &context.params,
            &context.step_id,
            tracker,
            content,
        )?;
        if !result.tainted {
            return Ok(Vec::new());
        }

        let rule_id = top_match(&result.content)
            .map(|m| m.rule_id.clone())
            .unwrap_or_else(|| "TAINT_FLOW".to_string());
        let risk = result
            .content
            .highest_severity
            .map(RiskLevel::from)
            .unwrap_or(RiskLevel::High);
        let sources: Vec<&str> =
            result.flows.iter().map(|f| f.source.step_id.as_str()).collect();
        let message = if sources.is_empty() {
            format!("sensitive content reaches sink '{}'", context.tool)
        } else {
            format!(
                "data from step(s) {} reaches sink '{}'",
                sources.join(", "),
                context.tool
            )
        };
        let flows: Vec<Value> = result
            .flows
            .iter()
            .map(|f| json!({"source": f.source.step_id, "tool": f.source.tool, "chain": f.chain}))
            .collect();

        let decision = match result.action {
            RuleAction::Block => Decision::block(self.id(), TAINT_FLOW, message, risk),
            RuleAction::Warn => Decision::warn(self.id(), TAINT_FLOW, message, risk),
            RuleAction::Allow | RuleAction::Log => return Ok(Vec::new()),
        };
        Ok(vec![decision
            .with_rule_id(rule_id)
            .with_evidence("flows", flows)
            .with_evidence("content", matches_evidence(&result.content))
            .with_remediation("strip tainted data before sending it outside the run")])
    }
}
