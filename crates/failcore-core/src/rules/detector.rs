//! Custom detectors referenced by `custom` rule patterns.
//!
//! A detector is named in the RuleSet document (`pattern_type: custom`,
//! `value: <detector name>`) and resolved through a [`DetectorRegistry`]
//! injected into the [`super::RuleEngine`]. Detector failures (errors or
//! panics) make the rule not match; they never escape evaluation.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::engine::RuleContext;
use super::model::Rule;

/// Everything a detector may inspect for one rule evaluation.
pub struct DetectorInput<'a> {
    pub tool: &'a str,
    pub params: &'a Map<String, Value>,
    /// Canonical (or domain-rendered) text of the payload.
    pub text: &'a str,
    pub rule: &'a Rule,
    pub context: Option<&'a RuleContext>,
}

/// A programmatic rule matcher.
pub trait Detector: Send + Sync {
    /// `Ok(true)` on match. An `Err` is treated as "no match".
    fn detect(&self, input: &DetectorInput<'_>) -> Result<bool, String>;
}

impl<F> Detector for F
where
    F: Fn(&DetectorInput<'_>) -> Result<bool, String> + Send + Sync,
{
    fn detect(&self, input: &DetectorInput<'_>) -> Result<bool, String> {
        self(input)
    }
}

/// Name → detector lookup.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: HashMap<String, Arc<dyn Detector>>,
}

impl std::fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.detectors.keys().collect();
        names.sort();
        f.debug_struct("DetectorRegistry")
            .field("detectors", &names)
            .finish()
    }
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the detectors referenced by the builtin rulesets.
    pub fn builtin() -> Self {
        Self::new()
            .with_detector("secret_to_network", secret_to_network)
            .with_detector("download_and_execute", download_and_execute)
    }

    pub fn with_detector(mut self, name: impl Into<String>, detector: impl Detector + 'static) -> Self {
        self.register(name, detector);
        self
    }

    /// Register (or replace) a detector.
    pub fn register(&mut self, name: impl Into<String>, detector: impl Detector + 'static) {
        self.detectors.insert(name.into(), Arc::new(detector));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Detector>> {
        self.detectors.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

const NETWORK_TOOL_MARKERS: &[&str] = &[
    "http", "fetch", "request", "post", "upload", "send", "webhook", "email", "curl",
];

const SECRET_PARAM_MARKERS: &[&str] = &[
    "password", "passwd", "secret", "token", "api_key", "apikey", "private_key", "credential",
];

fn is_network_tool(tool: &str) -> bool {
    let lowered = tool.to_lowercase();
    NETWORK_TOOL_MARKERS.iter().any(|m| lowered.contains(m))
}

fn collect_secret_keys(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let lowered = key.to_lowercase();
                if SECRET_PARAM_MARKERS.iter().any(|m| lowered.contains(m))
                    && !matches!(v, Value::Null)
                {
                    found.push(key.clone());
                }
                collect_secret_keys(v, found);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_secret_keys(v, found)),
        _ => {}
    }
}

/// A network-capable tool carrying secret-named parameters.
fn secret_to_network(input: &DetectorInput<'_>) -> Result<bool, String> {
    if !is_network_tool(input.tool) {
        return Ok(false);
    }
    let mut keys = Vec::new();
    for value in input.params.values() {
        collect_secret_keys(value, &mut keys);
    }
    let top_level = input.params.keys().any(|k| {
        let lowered = k.to_lowercase();
        SECRET_PARAM_MARKERS.iter().any(|m| lowered.contains(m))
    });
    Ok(top_level || !keys.is_empty())
}

/// A fetch piped into an interpreter inside a single command string.
fn download_and_execute(input: &DetectorInput<'_>) -> Result<bool, String> {
    let lowered = input.text.to_lowercase();
    let fetches = ["curl ", "wget ", "invoke-webrequest"]
        .iter()
        .any(|m| lowered.contains(m));
    let executes = ["| sh", "|sh", "| bash", "|bash", "| python", "iex"]
        .iter()
        .any(|m| lowered.contains(m));
    Ok(fetches && executes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::{PatternDefinition, RuleCategory, RuleDefinition, Severity};
    use serde_json::json;

    fn dummy_rule() -> Rule {
        Rule::from_definition(RuleDefinition::new(
            "d",
            RuleCategory::SemanticSecretLeakage,
            Severity::Critical,
            vec![PatternDefinition::custom("secret_to_network")],
        ))
        .unwrap()
    }

    #[test]
    fn test_secret_to_network_detects_secret_params() {
        let rule = dummy_rule();
        let params = json!({"url": "https://x.test", "api_key": "abc"});
        let map = params.as_object().unwrap();
        let input = DetectorInput {
            tool: "http_post",
            params: map,
            text: "",
            rule: &rule,
            context: None,
        };
        assert_eq!(secret_to_network(&input), Ok(true));

        let input = DetectorInput {
            tool: "read_file",
            ..input
        };
        assert_eq!(secret_to_network(&input), Ok(false));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = DetectorRegistry::builtin();
        assert!(registry.get("secret_to_network").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_closure_detector() {
        let registry =
            DetectorRegistry::new().with_detector("always", |_: &DetectorInput<'_>| Ok::<bool, String>(true));
        let rule = dummy_rule();
        let params = Map::new();
        let input = DetectorInput {
            tool: "t",
            params: &params,
            text: "",
            rule: &rule,
            context: None,
        };
        assert_eq!(registry.get("always").unwrap().detect(&input), Ok(true));
    }
}
