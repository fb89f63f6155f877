//! Runs a policy's validators against one [`Context`].
//!
//! Validators run in ascending priority. Each decision is resolved through
//! the validator's (or the global override's) enforcement mode before it is
//! collected; the outcome is `blocked` iff a Block survives resolution.
//!
//! Failure handling: an unknown validator id is skipped with a warning, and
//! a validator that errors or panics contributes no decisions. Neither ends
//! the evaluation.
//!
//! `strict_mode` only decides whether evaluation stops at the first
//! surviving Block (the rest are reported as skipped) or always runs every
//! validator for a full audit.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use super::context::Context;
use super::decision::{Decision, Outcome};
use super::policy::Policy;
use super::validator::ValidatorRegistry;
use crate::error::panic_message;

/// A validator that produced no decisions because it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorFailure {
    pub validator_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Post-enforcement decisions in evaluation order.
    pub decisions: Vec<Decision>,
    pub blocked: bool,
    /// Validators that ran (including failed ones).
    pub evaluated: Vec<String>,
    /// Unknown ids, and validators not reached after a strict-mode block.
    pub skipped: Vec<String>,
    pub errors: Vec<ValidatorFailure>,
}

impl ValidationOutcome {
    /// First decision that still blocks.
    pub fn blocking_decision(&self) -> Option<&Decision> {
        self.decisions.iter().find(|d| d.is_block())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.iter().filter(|d| d.outcome() == Outcome::Warn)
    }
}

#[derive(Debug, Clone)]
pub struct ValidationEngine {
    registry: ValidatorRegistry,
    strict_mode: bool,
}

impl ValidationEngine {
    pub fn new(registry: ValidatorRegistry) -> Self {
        Self {
            registry,
            strict_mode: false,
        }
    }

    pub fn with_strict_mode(mut self, strict_mode: bool) -> Self {
        self.strict_mode = strict_mode;
        self
    }

    pub fn strict_mode(&self) -> bool {
        self.strict_mode
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    pub fn evaluate(&self, policy: &Policy, context: &Context) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();
        let enabled = policy.enabled_validators();

        for (index, (id, config)) in enabled.iter().enumerate() {
            let Some(validator) = self.registry.get(id) else {
                tracing::warn!(
                    event = "validation.validator_missing",
                    validator_id = %id,
                    step_id = %context.step_id,
                );
                outcome.skipped.push((*id).to_string());
                continue;
            };

            outcome.evaluated.push((*id).to_string());
            let result = catch_unwind(AssertUnwindSafe(|| {
                validator.evaluate(context, &config.config)
            }));
            let decisions = match result {
                Ok(Ok(decisions)) => decisions,
                Ok(Err(err)) => {
                    crate::obs::emit_validator_error(id, &err);
                    outcome.errors.push(ValidatorFailure {
                        validator_id: (*id).to_string(),
                        error: err.to_string(),
                    });
                    continue;
                }
                Err(payload) => {
                    let message = format!("panicked: {}", panic_message(payload.as_ref()));
                    crate::obs::emit_validator_error(id, &message);
                    outcome.errors.push(ValidatorFailure {
                        validator_id: (*id).to_string(),
                        error: message,
                    });
                    continue;
                }
            };

            let enforcement = policy.effective_enforcement(config);
            for mut decision in decisions {
                decision.enforce(enforcement);
                crate::obs::emit_decision(
                    id,
                    decision.code(),
                    decision.outcome().as_str(),
                    enforcement.as_str(),
                );
                outcome.blocked |= decision.is_block();
                outcome.decisions.push(decision);
            }

            if self.strict_mode && outcome.blocked {
                outcome
                    .skipped
                    .extend(enabled[index + 1..].iter().map(|(id, _)| (*id).to_string()));
                break;
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::decision::RiskLevel;
    use crate::validation::policy::{EnforcementMode, ValidatorConfig};
    use crate::validation::validator::{Validator, ValidatorError};
    use serde_json::{Map, Value};

    struct Fixed {
        id: &'static str,
        outcome: Outcome,
    }

    impl Validator for Fixed {
        fn id(&self) -> &str {
            self.id
        }

        fn domain(&self) -> &str {
            "test"
        }

        fn evaluate(
            &self,
            _context: &Context,
            _config: &Map<String, Value>,
        ) -> Result<Vec<Decision>, ValidatorError> {
            Ok(vec![match self.outcome {
                Outcome::Allow => Decision::allow(self.id, "OK", "ok"),
                Outcome::Warn => Decision::warn(self.id, "W", "warn", RiskLevel::Medium),
                Outcome::Block => Decision::block(self.id, "B", "block", RiskLevel::High)
                    .with_rule_id("R1"),
            }])
        }
    }

    struct Panics;

    impl Validator for Panics {
        fn id(&self) -> &str {
            "panics"
        }

        fn domain(&self) -> &str {
            "test"
        }

        fn evaluate(
            &self,
            _context: &Context,
            _config: &Map<String, Value>,
        ) -> Result<Vec<Decision>, ValidatorError> {
            panic!("validator bug")
        }
    }

    fn ctx() -> Context {
        Context::new("tool", Map::new(), "s1")
    }

    fn registry() -> ValidatorRegistry {
        ValidatorRegistry::new()
            .with(Fixed {
                id: "blocker",
                outcome: Outcome::Block,
            })
            .with(Fixed {
                id: "warner",
                outcome: Outcome::Warn,
            })
            .with(Panics)
    }

    #[test]
    fn test_block_enforcement_blocks() {
        let policy = Policy::empty()
            .with_validator("blocker", ValidatorConfig::new(EnforcementMode::Block, 1));
        let out = ValidationEngine::new(registry()).evaluate(&policy, &ctx());
        assert!(out.blocked);
        assert_eq!(out.blocking_decision().unwrap().code(), "B");
    }

    #[test]
    fn test_shadow_keeps_decision_but_not_blocked() {
        let policy = Policy::empty()
            .with_validator("blocker", ValidatorConfig::new(EnforcementMode::Shadow, 1));
        let out = ValidationEngine::new(registry()).evaluate(&policy, &ctx());
        assert!(!out.blocked);
        assert_eq!(out.decisions.len(), 1);
        let d = &out.decisions[0];
        assert_eq!(d.outcome(), Outcome::Warn);
        assert_eq!(d.rule_id(), Some("R1"));
        assert_eq!(d.enforcement(), Some(EnforcementMode::Shadow));
    }

    #[test]
    fn test_missing_and_panicking_validators_do_not_abort() {
        let policy = Policy::empty()
            .with_validator("nope", ValidatorConfig::new(EnforcementMode::Block, 1))
            .with_validator("panics", ValidatorConfig::new(EnforcementMode::Block, 2))
            .with_validator("warner", ValidatorConfig::new(EnforcementMode::Block, 3));
        let out = ValidationEngine::new(registry()).evaluate(&policy, &ctx());
        assert_eq!(out.skipped, vec!["nope"]);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].error.contains("validator bug"));
        assert_eq!(out.decisions.len(), 1);
        assert!(!out.blocked);
    }

    #[test]
    fn test_strict_mode_stops_after_block() {
        let policy = Policy::empty()
            .with_validator("blocker", ValidatorConfig::new(EnforcementMode::Block, 1))
            .with_validator("warner", ValidatorConfig::new(EnforcementMode::Block, 2));

        let audit = ValidationEngine::new(registry()).evaluate(&policy, &ctx());
        assert_eq!(audit.decisions.len(), 2);

        let strict = ValidationEngine::new(registry())
            .with_strict_mode(true)
            .evaluate(&policy, &ctx());
        assert!(strict.blocked);
        assert_eq!(strict.decisions.len(), 1);
        assert_eq!(strict.skipped, vec!["warner"]);
    }

    #[test]
    fn test_priority_order() {
        let policy = Policy::empty()
            .with_validator("warner", ValidatorConfig::new(EnforcementMode::Block, 1))
            .with_validator("blocker", ValidatorConfig::new(EnforcementMode::Block, 9));
        let out = ValidationEngine::new(registry()).evaluate(&policy, &ctx());
        assert_eq!(out.evaluated, vec!["warner", "blocker"]);
    }
}
