//! Boolean allow/deny gate evaluated after validation.
//!
//! Kept for simple call-sites that only need "may this tool run"; anything
//! richer belongs in a validator.

use serde::{Deserialize, Serialize};

use super::step::{RunContext, Step};
use crate::guards::tool_pattern_matches;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyVerdict {
    Allowed,
    Denied { reason: String },
    /// Treated as a denial by the executor, which has no approval loop.
    RequiresApproval { reason: String },
}

impl PolicyVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyVerdict::Allowed)
    }
}

pub trait StepPolicy: Send + Sync {
    fn allow(&self, step: &Step, run: &RunContext) -> PolicyVerdict;
}

impl<F> StepPolicy for F
where
    F: Fn(&Step, &RunContext) -> bool + Send + Sync,
{
    fn allow(&self, step: &Step, run: &RunContext) -> PolicyVerdict {
        if self(step, run) {
            PolicyVerdict::Allowed
        } else {
            PolicyVerdict::Denied {
                reason: format!("tool '{}' denied by step policy", step.tool),
            }
        }
    }
}

/// One rule keyed by tool name (`*` suffix wildcard).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolPolicyRule {
    Allow { tool: String },
    Deny { tool: String, reason: String },
    RequireApproval { tool: String, reason: String },
}

impl ToolPolicyRule {
    pub fn matches(&self, tool: &str) -> bool {
        match self {
            ToolPolicyRule::Allow { tool: pattern }
            | ToolPolicyRule::Deny { tool: pattern, .. }
            | ToolPolicyRule::RequireApproval { tool: pattern, .. } => {
                tool_pattern_matches(pattern, tool)
            }
        }
    }

    pub fn verdict(&self) -> PolicyVerdict {
        match self {
            ToolPolicyRule::Allow { .. } => PolicyVerdict::Allowed,
            ToolPolicyRule::Deny { reason, .. } => PolicyVerdict::Denied {
                reason: reason.clone(),
            },
            ToolPolicyRule::RequireApproval { reason, .. } => PolicyVerdict::RequiresApproval {
                reason: reason.clone(),
            },
        }
    }
}

/// Ordered rules, first match wins; `default_allow` decides unmatched tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolPolicySet {
    pub rules: Vec<ToolPolicyRule>,
    #[serde(default)]
    pub default_allow: bool,
}

impl ToolPolicySet {
    /// No rules, everything allowed.
    pub fn allow_all() -> Self {
        Self {
            rules: Vec::new(),
            default_allow: true,
        }
    }

    /// No rules, everything denied.
    pub fn deny_all() -> Self {
        Self {
            rules: Vec::new(),
            default_allow: false,
        }
    }

    pub fn with_rule(mut self, rule: ToolPolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn verdict_for(&self, tool: &str) -> PolicyVerdict {
        match self.rules.iter().find(|r| r.matches(tool)) {
            Some(rule) => rule.verdict(),
            None if self.default_allow => PolicyVerdict::Allowed,
            None => PolicyVerdict::Denied {
                reason: format!("no rule allows tool '{tool}'"),
            },
        }
    }
}

impl StepPolicy for ToolPolicySet {
    fn allow(&self, step: &Step, _run: &RunContext) -> PolicyVerdict {
        self.verdict_for(&step.tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_first_match_wins() {
        let set = ToolPolicySet::deny_all()
            .with_rule(ToolPolicyRule::Deny {
                tool: "shell_*".into(),
                reason: "no shells".into(),
            })
            .with_rule(ToolPolicyRule::Allow { tool: "*".into() });
        assert!(set.verdict_for("read_file").is_allowed());
        assert_eq!(
            set.verdict_for("shell_exec"),
            PolicyVerdict::Denied {
                reason: "no shells".into()
            }
        );
    }

    #[test]
    fn test_default_posture() {
        assert!(ToolPolicySet::allow_all().verdict_for("x").is_allowed());
        assert!(!ToolPolicySet::deny_all().verdict_for("x").is_allowed());
    }

    #[test]
    fn test_closure_gate() {
        let run = RunContext::new("r1").unwrap();
        let gate = |step: &Step, _: &RunContext| step.tool != "rm";
        assert!(gate.allow(&Step::new("s1", "ls", Map::new()), &run).is_allowed());
        assert!(!gate.allow(&Step::new("s2", "rm", Map::new()), &run).is_allowed());
    }

    #[test]
    fn test_policy_set_serde_roundtrip() {
        let set = ToolPolicySet::allow_all().with_rule(ToolPolicyRule::RequireApproval {
            tool: "deploy".into(),
            reason: "prod".into(),
        });
        let json = serde_json::to_string(&set).unwrap();
        let back: ToolPolicySet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
    }
}
