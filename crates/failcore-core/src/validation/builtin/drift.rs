use std::sync::Arc;

use serde_json::{Map, Value};

use super::{ids, matches_evidence, top_match};
use crate::guards::{DriftLevel, GuardSet};
use crate::rules::RuleAction;
use crate::validation::context::Context;
use crate::validation::decision::{Decision, RiskLevel};
use crate::validation::validator::{Validator, ValidatorError};

pub const DRIFT_MAJOR: &str = "FC_DRIFT_MAJOR";
pub const DRIFT_MINOR: &str = "FC_DRIFT_MINOR";

/// `drift.params`: params wandering away from the tool's first call in the
/// run. Needs the run's drift tracker on the context.
#[derive(Debug, Clone)]
pub struct DriftValidator {
    guards: Arc<GuardSet>,
}

impl DriftValidator {
    pub fn new(guards: Arc<GuardSet>) -> Self {
        Self { guards }
    }
}

impl Validator for DriftValidator {
    fn id(&self) -> &str {
        ids::DRIFT
    }

    fn domain(&self) -> &str {
        "drift"
    }

    fn evaluate(
        &self,
        context: &Context,
        _config: &Map<String, Value>,
    ) -> Result<Vec<Decision>, ValidatorError> {
        let Some(tracker) = context.drift.as_deref() else {
            return Ok(Vec::new());
        };
        let report = self
            .guards
            .drift
            .check(&context.tool, &context.params, tracker)?;

        let (code, risk) = match report.level {
            DriftLevel::Major => (DRIFT_MAJOR, RiskLevel::High),
            DriftLevel::Minor | DriftLevel::None => (DRIFT_MINOR, RiskLevel::Medium),
        };
        let risk = report
            .rules
            .highest_severity
            .map(RiskLevel::from)
            .map_or(risk, |r| r.max(risk));
        let message = format!(
            "parameters of '{}' drifted from the run baseline (score {:.2})",
            context.tool, report.score
        );
        let decision = match report.action {
            RuleAction::Block => Decision::block(self.id(), code, message, risk),
            RuleAction::Warn => Decision::warn(self.id(), code, message, risk),
            RuleAction::Allow | RuleAction::Log => return Ok(Vec::new()),
        };
        let rule_id = top_match(&report.rules)
            .map(|m| m.rule_id.clone())
            .unwrap_or_else(|| code.trim_start_matches("FC_").to_string());
        let changed: Vec<&str> = report.changes.iter().map(|c| c.key.as_str()).collect();
        Ok(vec![decision
            .with_rule_id(rule_id)
            .with_evidence("score", report.score)
            .with_evidence("changed_keys", changed)
            .with_evidence("rules", matches_evidence(&report.rules))])
    }
}
