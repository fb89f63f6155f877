//! Preconditions run before validation; the first failure blocks the step
//! with `PRECONDITION_FAILED`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::step::{RunContext, Step};
use crate::guards::tool_pattern_matches;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreconditionFailure {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub detail: Map<String, Value>,
}

impl PreconditionFailure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            detail: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }
}

pub trait Precondition: Send + Sync {
    fn name(&self) -> &str {
        "custom"
    }

    fn check(&self, step: &Step, run: &RunContext) -> Result<(), PreconditionFailure>;
}

impl<F> Precondition for F
where
    F: Fn(&Step, &RunContext) -> Result<(), PreconditionFailure> + Send + Sync,
{
    fn check(&self, step: &Step, run: &RunContext) -> Result<(), PreconditionFailure> {
        self(step, run)
    }
}

/// Params that must be present and non-null, optionally only for tools
/// matching one of `tools` (`*` suffix wildcard).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredParams {
    #[serde(default)]
    pub tools: Vec<String>,
    pub params: Vec<String>,
}

impl RequiredParams {
    pub fn new<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: Vec::new(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn for_tool(mut self, pattern: impl Into<String>) -> Self {
        self.tools.push(pattern.into());
        self
    }
}

impl Precondition for RequiredParams {
    fn name(&self) -> &str {
        "required_params"
    }

    fn check(&self, step: &Step, _run: &RunContext) -> Result<(), PreconditionFailure> {
        if !self.tools.is_empty() && !self.tools.iter().any(|p| tool_pattern_matches(p, &step.tool))
        {
            return Ok(());
        }
        let missing: Vec<&str> = self
            .params
            .iter()
            .filter(|p| step.params.get(p.as_str()).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(PreconditionFailure::new(
            self.name(),
            format!("missing required params: {}", missing.join(", ")),
        )
        .with_detail("missing", json!(missing)))
    }
}
