//! The validator capability and its registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::context::Context;
use super::decision::Decision;
use crate::guards::GuardError;

/// Errors a validator may return. The validation engine logs them and moves
/// on; they never abort a run.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    #[error("validator '{validator_id}': invalid config: {reason}")]
    InvalidConfig { validator_id: String, reason: String },

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("validator failed: {0}")]
    Failed(String),
}

/// Produces decisions for one call.
pub trait Validator: Send + Sync {
    /// Stable id referenced by policy documents, e.g. `network.ssrf`.
    fn id(&self) -> &str;

    /// Security domain, for grouping in reports.
    fn domain(&self) -> &str;

    /// JSON-schema-ish description of the accepted `config` keys.
    fn config_schema(&self) -> Value {
        json!({"type": "object"})
    }

    /// Zero or more decisions. An empty list means nothing to report.
    fn evaluate(
        &self,
        context: &Context,
        config: &Map<String, Value>,
    ) -> Result<Vec<Decision>, ValidatorError>;
}

/// Id → validator lookup, injected into the validation engine.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: BTreeMap<String, Arc<dyn Validator>>,
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("validators", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, validator: impl Validator + 'static) -> Self {
        self.register(Arc::new(validator));
        self
    }

    /// Register (or replace) a validator under its own id.
    pub fn register(&mut self, validator: Arc<dyn Validator>) {
        self.validators.insert(validator.id().to_string(), validator);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Validator>> {
        self.validators.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.validators.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

/// Read a string-list config entry, falling back to `default`.
pub(crate) fn config_strings(
    validator_id: &str,
    config: &Map<String, Value>,
    key: &str,
    default: &[&str],
) -> Result<Vec<String>, ValidatorError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(default.iter().map(|s| (*s).to_string()).collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| ValidatorError::InvalidConfig {
                    validator_id: validator_id.to_string(),
                    reason: format!("'{key}' must be a list of strings"),
                })
            })
            .collect(),
        Some(_) => Err(ValidatorError::InvalidConfig {
            validator_id: validator_id.to_string(),
            reason: format!("'{key}' must be a list of strings"),
        }),
    }
}
