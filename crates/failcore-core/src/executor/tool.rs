//! Tool contract and lookup.
//!
//! Tools are synchronous and receive the step params as a keyword map. They
//! report failure through `anyhow::Error`; the executor turns that (or a
//! panic) into a `TOOL_RAISED` result.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A file or blob a tool produced, referenced rather than embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Artifact {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: None,
            mime_type: None,
        }
    }
}

/// What a tool hands back before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Value(Value),
    Bytes(Vec<u8>),
    Artifacts(Vec<Artifact>),
    /// Anything the tool cannot express as the above; carries a type name.
    Opaque(String),
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        ToolOutput::Value(value)
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::Value(Value::String(text))
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        ToolOutput::Value(Value::String(text.to_string()))
    }
}

impl From<Vec<u8>> for ToolOutput {
    fn from(bytes: Vec<u8>) -> Self {
        ToolOutput::Bytes(bytes)
    }
}

impl From<Vec<Artifact>> for ToolOutput {
    fn from(artifacts: Vec<Artifact>) -> Self {
        ToolOutput::Artifacts(artifacts)
    }
}

pub trait Tool: Send + Sync {
    fn call(&self, params: &Map<String, Value>) -> anyhow::Result<ToolOutput>;
}

impl<F> Tool for F
where
    F: Fn(&Map<String, Value>) -> anyhow::Result<ToolOutput> + Send + Sync,
{
    fn call(&self, params: &Map<String, Value>) -> anyhow::Result<ToolOutput> {
        self(params)
    }
}

/// Name → tool resolution consumed by the executor.
pub trait ToolProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<dyn Tool>>;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ToolRegistryError {
    #[error("duplicate tool registration: {tool_name}")]
    DuplicateTool { tool_name: String },
}

/// In-memory tool registry.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        tool: impl Tool + 'static,
    ) -> Result<(), ToolRegistryError> {
        let name = name.into();
        if self.tools.contains_key(&name) {
            return Err(ToolRegistryError::DuplicateTool { tool_name: name });
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl ToolProvider for ToolRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo(params: &Map<String, Value>) -> anyhow::Result<ToolOutput> {
        Ok(Value::Object(params.clone()).into())
    }

    #[test]
    fn test_register_and_call() {
        let mut registry = ToolRegistry::new();
        registry.register("echo", echo).unwrap();
        let tool = registry.get("echo").unwrap();
        let params = json!({"a": 1}).as_object().cloned().unwrap();
        assert_eq!(tool.call(&params).unwrap(), ToolOutput::Value(json!({"a": 1})));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register("echo", echo).unwrap();
        let err = registry.register("echo", echo).unwrap_err();
        assert_eq!(
            err,
            ToolRegistryError::DuplicateTool {
                tool_name: "echo".into()
            }
        );
    }
}
