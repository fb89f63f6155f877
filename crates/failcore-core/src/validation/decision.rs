//! Validator verdicts.
//!
//! A [`Decision`] is built through [`Decision::allow`], [`Decision::warn`] or
//! [`Decision::block`]; the outcome follows from the constructor and has no
//! public setter. Enforcement resolution is the only thing that may change it
//! afterwards, and only downwards (Block → Warn).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::policy::EnforcementMode;
use crate::rules::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Allow,
    Warn,
    Block,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Allow => "ALLOW",
            Outcome::Warn => "WARN",
            Outcome::Block => "BLOCK",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl From<Severity> for RiskLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => RiskLevel::Low,
            Severity::Medium => RiskLevel::Medium,
            Severity::High => RiskLevel::High,
            Severity::Critical => RiskLevel::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    code: String,
    validator_id: String,
    outcome: Outcome,
    message: String,
    #[serde(default)]
    evidence: Map<String, Value>,
    risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remediation: Option<String>,
    /// Enforcement applied by the validation engine, once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enforcement: Option<EnforcementMode>,
    /// Set when enforcement turned a Block into a Warn.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    downgraded: bool,
}

impl Decision {
    fn new(
        outcome: Outcome,
        validator_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            code: code.into(),
            validator_id: validator_id.into(),
            outcome,
            message: message.into(),
            evidence: Map::new(),
            risk_level,
            rule_id: None,
            remediation: None,
            enforcement: None,
            downgraded: false,
        }
    }

    pub fn allow(
        validator_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Outcome::Allow, validator_id, code, message, RiskLevel::Low)
    }

    pub fn warn(
        validator_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        risk_level: RiskLevel,
    ) -> Self {
        Self::new(Outcome::Warn, validator_id, code, message, risk_level)
    }

    pub fn block(
        validator_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        risk_level: RiskLevel,
    ) -> Self {
        Self::new(Outcome::Block, validator_id, code, message, risk_level)
    }

    pub fn with_evidence(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.evidence.insert(key.into(), value.into());
        self
    }

    pub fn with_rule_id(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn validator_id(&self) -> &str {
        &self.validator_id
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn evidence(&self) -> &Map<String, Value> {
        &self.evidence
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn rule_id(&self) -> Option<&str> {
        self.rule_id.as_deref()
    }

    pub fn remediation(&self) -> Option<&str> {
        self.remediation.as_deref()
    }

    pub fn enforcement(&self) -> Option<EnforcementMode> {
        self.enforcement
    }

    pub fn is_downgraded(&self) -> bool {
        self.downgraded
    }

    pub fn is_block(&self) -> bool {
        self.outcome == Outcome::Block
    }

    /// Apply an enforcement mode. Only Block enforcement keeps a Block.
    pub(crate) fn enforce(&mut self, mode: EnforcementMode) {
        self.enforcement = Some(mode);
        if self.outcome == Outcome::Block && mode != EnforcementMode::Block {
            self.outcome = Outcome::Warn;
            self.downgraded = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_sets_outcome() {
        assert_eq!(Decision::allow("v", "OK", "fine").outcome(), Outcome::Allow);
        assert_eq!(
            Decision::warn("v", "W", "hmm", RiskLevel::Medium).outcome(),
            Outcome::Warn
        );
        assert!(Decision::block("v", "B", "no", RiskLevel::High).is_block());
    }

    #[test]
    fn test_shadow_and_warn_downgrade_block() {
        for mode in [EnforcementMode::Shadow, EnforcementMode::Warn] {
            let mut d = Decision::block("v", "B", "no", RiskLevel::High).with_evidence("k", 1);
            d.enforce(mode);
            assert_eq!(d.outcome(), Outcome::Warn);
            assert!(d.is_downgraded());
            assert_eq!(d.evidence()["k"], 1);
        }
        let mut kept = Decision::block("v", "B", "no", RiskLevel::High);
        kept.enforce(EnforcementMode::Block);
        assert!(kept.is_block());
        assert!(!kept.is_downgraded());
    }

    #[test]
    fn test_warn_never_upgraded() {
        let mut d = Decision::warn("v", "W", "x", RiskLevel::Low);
        d.enforce(EnforcementMode::Block);
        assert_eq!(d.outcome(), Outcome::Warn);
    }

    #[test]
    fn test_serialized_shape() {
        let d = Decision::block("security.path_traversal", "PATH_TRAVERSAL", "escape", RiskLevel::High)
            .with_rule_id("SEC_PATH_TRAVERSAL");
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["outcome"], "BLOCK");
        assert_eq!(v["risk_level"], "high");
        assert_eq!(v["rule_id"], "SEC_PATH_TRAVERSAL");
        assert!(v.get("remediation").is_none());
    }
}
