//! Policy document: which validators run, in what order, under which
//! enforcement mode.
//!
//! ```json
//! {
//!   "version": "1",
//!   "validators": {
//!     "security.path_traversal": {"enabled": true, "enforcement": "BLOCK", "priority": 10, "config": {}}
//!   },
//!   "global_override": {"enabled": true, "enforcement": "SHADOW"},
//!   "metadata": {}
//! }
//! ```
//!
//! A `Policy` is immutable once loaded; helpers such as
//! [`Policy::with_sandbox_root`] return a new value.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors raised while loading a policy document.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid policy: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnforcementMode {
    #[default]
    #[serde(alias = "block")]
    Block,
    #[serde(alias = "warn")]
    Warn,
    #[serde(alias = "shadow")]
    Shadow,
}

impl EnforcementMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EnforcementMode::Block => "BLOCK",
            EnforcementMode::Warn => "WARN",
            EnforcementMode::Shadow => "SHADOW",
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub enforcement: EnforcementMode,
    /// Lower runs first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enforcement: EnforcementMode::Block,
            priority: default_priority(),
            config: Map::new(),
        }
    }
}

impl ValidatorConfig {
    pub fn new(enforcement: EnforcementMode, priority: i32) -> Self {
        Self {
            enforcement,
            priority,
            ..Self::default()
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Forces one enforcement mode on every validator (e.g. a shadow rollout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalOverride {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub enforcement: EnforcementMode,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub validators: BTreeMap<String, ValidatorConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_override: Option<GlobalOverride>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Policy {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }

    /// No validators: every call is allowed by validation.
    pub fn empty() -> Self {
        Self::new("1")
    }

    /// Builtin validators with their recommended enforcement.
    ///
    /// | Validator                 | Enforcement | Priority |
    /// |---------------------------|-------------|----------|
    /// | security.path_traversal   | BLOCK       | 10       |
    /// | network.ssrf              | BLOCK       | 20       |
    /// | dlp.scan                  | BLOCK       | 30       |
    /// | semantic.intent           | BLOCK       | 40       |
    /// | taint.flow                | BLOCK       | 50       |
    /// | effects.boundary          | WARN        | 60       |
    /// | drift.params              | SHADOW      | 70       |
    pub fn standard() -> Self {
        use super::builtin::ids;
        use EnforcementMode::{Block, Shadow, Warn};
        Self::new("1")
            .with_validator(ids::PATH_TRAVERSAL, ValidatorConfig::new(Block, 10))
            .with_validator(ids::SSRF, ValidatorConfig::new(Block, 20))
            .with_validator(ids::DLP, ValidatorConfig::new(Block, 30))
            .with_validator(ids::SEMANTIC, ValidatorConfig::new(Block, 40))
            .with_validator(ids::TAINT, ValidatorConfig::new(Block, 50))
            .with_validator(ids::EFFECTS, ValidatorConfig::new(Warn, 60))
            .with_validator(ids::DRIFT, ValidatorConfig::new(Shadow, 70))
    }

    pub fn with_validator(mut self, id: impl Into<String>, config: ValidatorConfig) -> Self {
        self.validators.insert(id.into(), config);
        self
    }

    pub fn with_global_override(mut self, enforcement: EnforcementMode) -> Self {
        self.global_override = Some(GlobalOverride {
            enabled: true,
            enforcement,
        });
        self
    }

    pub fn from_json_str(s: &str) -> Result<Self, PolicyError> {
        let policy: Policy = serde_json::from_str(s)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn from_value(value: Value) -> Result<Self, PolicyError> {
        let policy: Policy = serde_json::from_value(value)?;
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        if let Some(id) = self.validators.keys().find(|id| id.trim().is_empty()) {
            return Err(PolicyError::Invalid(format!(
                "validator id must not be blank (got {id:?})"
            )));
        }
        Ok(())
    }

    /// Enabled validators in ascending priority, ties broken by id.
    pub fn enabled_validators(&self) -> Vec<(&str, &ValidatorConfig)> {
        let mut enabled: Vec<_> = self
            .validators
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(id, cfg)| (id.as_str(), cfg))
            .collect();
        enabled.sort_by(|a, b| a.1.priority.cmp(&b.1.priority).then(a.0.cmp(b.0)));
        enabled
    }

    /// Enforcement after the global override, if one is active.
    pub fn effective_enforcement(&self, config: &ValidatorConfig) -> EnforcementMode {
        match self.global_override {
            Some(o) if o.enabled => o.enforcement,
            _ => config.enforcement,
        }
    }

    /// A copy with `sandbox_root` injected into the path validator's config
    /// (added with default settings if absent) and into `metadata`.
    pub fn with_sandbox_root(&self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_string_lossy().into_owned();
        let mut policy = self.clone();
        policy
            .validators
            .entry(super::builtin::ids::PATH_TRAVERSAL.to_string())
            .or_insert_with(|| ValidatorConfig::new(EnforcementMode::Block, 10))
            .config
            .insert("sandbox_root".to_string(), Value::String(root.clone()));
        policy
            .metadata
            .insert("sandbox_root".to_string(), Value::String(root));
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_policy_document() {
        let policy = Policy::from_value(json!({
            "version": "2",
            "validators": {
                "b": {"enforcement": "SHADOW", "priority": 5},
                "a": {"enabled": true, "enforcement": "warn", "priority": 5, "config": {"x": 1}},
                "off": {"enabled": false}
            },
            "metadata": {"owner": "sec"}
        }))
        .unwrap();
        assert_eq!(policy.version, "2");
        let order: Vec<_> = policy.enabled_validators().into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(policy.validators["a"].enforcement, EnforcementMode::Warn);
        assert_eq!(policy.validators["off"].priority, 100);
    }

    #[test]
    fn test_blank_validator_id_rejected() {
        let err = Policy::from_json_str(r#"{"validators": {" ": {}}}"#).unwrap_err();
        assert!(matches!(err, PolicyError::Invalid(_)));
        assert!(matches!(
            Policy::from_json_str("{not json").unwrap_err(),
            PolicyError::Parse(_)
        ));
    }

    #[test]
    fn test_global_override_wins() {
        let policy = Policy::standard().with_global_override(EnforcementMode::Shadow);
        for (_, cfg) in policy.enabled_validators() {
            assert_eq!(policy.effective_enforcement(cfg), EnforcementMode::Shadow);
        }
    }

    #[test]
    fn test_with_sandbox_root_builds_new_policy() {
        let base = Policy::empty();
        let rooted = base.with_sandbox_root("/work");
        assert!(base.validators.is_empty());
        let cfg = &rooted.validators["security.path_traversal"];
        assert_eq!(cfg.config["sandbox_root"], "/work");
        assert_eq!(rooted.metadata["sandbox_root"], "/work");
    }
}
