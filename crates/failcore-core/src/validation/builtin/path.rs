//! `security.path_traversal`: lexical path checks on path-like params.
//!
//! - `..` segments that climb above the starting directory: `PATH_TRAVERSAL`
//! - with a sandbox root, a path resolving outside it: `SANDBOX_VIOLATION`
//!
//! Checks are lexical only; symlinks are not resolved.

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use super::ids;
use crate::validation::context::Context;
use crate::validation::decision::{Decision, RiskLevel};
use crate::validation::validator::{config_strings, Validator, ValidatorError};

pub const PATH_TRAVERSAL: &str = "PATH_TRAVERSAL";
pub const SANDBOX_VIOLATION: &str = "SANDBOX_VIOLATION";

const DEFAULT_PATH_PARAMS: &[&str] = &[
    "path", "paths", "file", "files", "filename", "filepath", "dir", "directory", "dest",
    "destination", "src", "source", "target", "cwd",
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Normalized {
    absolute: bool,
    segments: Vec<String>,
    /// A `..` tried to climb above the start.
    escaped: bool,
}

impl Normalized {
    fn to_path(&self) -> PathBuf {
        let mut path = if self.absolute {
            PathBuf::from("/")
        } else {
            PathBuf::new()
        };
        path.extend(&self.segments);
        path
    }
}

fn decode_separators(raw: &str) -> String {
    let mut out = raw.to_string();
    for (encoded, plain) in [("%2e", "."), ("%2f", "/"), ("%5c", "/")] {
        while let Some(pos) = out.to_ascii_lowercase().find(encoded) {
            out.replace_range(pos..pos + encoded.len(), plain);
        }
    }
    out.replace('\\', "/")
}

fn normalize(raw: &str) -> Normalized {
    let decoded = decode_separators(raw);
    let bytes = decoded.as_bytes();
    let drive = bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic();
    let absolute = decoded.starts_with('/') || drive;
    let body = if drive { &decoded[2..] } else { &decoded[..] };

    let mut segments: Vec<String> = Vec::new();
    let mut escaped = false;
    for part in body.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    escaped = true;
                }
            }
            other => segments.push(other.to_string()),
        }
    }
    Normalized {
        absolute,
        segments,
        escaped,
    }
}

fn lexical(path: &Path) -> Normalized {
    normalize(&path.to_string_lossy())
}

fn is_path_key(key: &str, names: &[String]) -> bool {
    let lowered = key.to_lowercase();
    names.iter().any(|n| {
        lowered == *n || lowered.ends_with(&format!("_{n}")) || lowered.starts_with(&format!("{n}_"))
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PathTraversalValidator;

impl PathTraversalValidator {
    fn check(
        &self,
        param: &str,
        raw: &str,
        sandbox_root: Option<&Path>,
    ) -> Option<Decision> {
        let normalized = normalize(raw);
        if normalized.escaped {
            return Some(
                Decision::block(
                    ids::PATH_TRAVERSAL,
                    PATH_TRAVERSAL,
                    format!("parameter '{param}' escapes its base directory"),
                    RiskLevel::High,
                )
                .with_rule_id("SEC_PATH_TRAVERSAL")
                .with_evidence("param", param)
                .with_evidence("path", raw)
                .with_evidence("normalized", normalized.to_path().to_string_lossy().into_owned())
                .with_remediation("use a path inside the working directory without '..' segments"),
            );
        }

        let root = sandbox_root?;
        let root_norm = lexical(root);
        let resolved = if normalized.absolute {
            normalized
        } else {
            let mut joined = root_norm.clone();
            joined.segments.extend(normalized.segments);
            joined
        };
        let inside = resolved.absolute == root_norm.absolute
            && resolved.segments.starts_with(&root_norm.segments);
        if inside {
            return None;
        }
        Some(
            Decision::block(
                ids::PATH_TRAVERSAL,
                SANDBOX_VIOLATION,
                format!("parameter '{param}' resolves outside the sandbox"),
                RiskLevel::High,
            )
            .with_rule_id("SEC_SANDBOX_ESCAPE")
            .with_evidence("param", param)
            .with_evidence("path", raw)
            .with_evidence("resolved", resolved.to_path().to_string_lossy().into_owned())
            .with_evidence("sandbox_root", root.to_string_lossy().into_owned())
            .with_remediation(format!(
                "keep file access under {} or widen sandbox_root in the policy",
                root.display()
            )),
        )
    }
}

impl Validator for PathTraversalValidator {
    fn id(&self) -> &str {
        ids::PATH_TRAVERSAL
    }

    fn domain(&self) -> &str {
        "security"
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path_params": {"type": "array", "items": {"type": "string"}},
                "sandbox_root": {"type": "string"}
            }
        })
    }

    fn evaluate(
        &self,
        context: &Context,
        config: &Map<String, Value>,
    ) -> Result<Vec<Decision>, ValidatorError> {
        let names = config_strings(self.id(), config, "path_params", DEFAULT_PATH_PARAMS)?;
        let configured_root = match config.get("sandbox_root") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(PathBuf::from(s)),
            Some(_) => {
                return Err(ValidatorError::InvalidConfig {
                    validator_id: self.id().to_string(),
                    reason: "'sandbox_root' must be a string".to_string(),
                })
            }
        };
        let sandbox_root = configured_root.as_deref().or(context.sandbox_root());

        let mut decisions = Vec::new();
        for (key, value) in &context.params {
            if !is_path_key(key, &names) {
                continue;
            }
            let raws: Vec<&str> = match value {
                Value::String(s) => vec![s.as_str()],
                Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                _ => continue,
            };
            decisions.extend(raws.into_iter().filter_map(|raw| self.check(key, raw, sandbox_root)));
        }
        Ok(decisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(params: Value) -> Context {
        Context::new("write_file", params.as_object().cloned().unwrap(), "s1")
    }

    fn codes(decisions: &[Decision]) -> Vec<&str> {
        decisions.iter().map(Decision::code).collect()
    }

    #[test]
    fn test_dotdot_escape_blocks() {
        let out = PathTraversalValidator
            .evaluate(&ctx(json!({"path": "../../etc/passwd"})), &Map::new())
            .unwrap();
        assert_eq!(codes(&out), vec![PATH_TRAVERSAL]);
        assert!(out[0].is_block());
        assert_eq!(out[0].evidence()["param"], "path");
    }

    #[test]
    fn test_encoded_and_backslash_traversal() {
        for raw in ["%2e%2e/secret", "..\\..\\windows", "a/../../b"] {
            let out = PathTraversalValidator
                .evaluate(&ctx(json!({"file": raw})), &Map::new())
                .unwrap();
            assert_eq!(codes(&out), vec![PATH_TRAVERSAL], "{raw}");
        }
    }

    #[test]
    fn test_contained_dotdot_is_fine() {
        let out = PathTraversalValidator
            .evaluate(&ctx(json!({"path": "a/b/../c.txt", "content": "../x"})), &Map::new())
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_sandbox_root_from_config_or_context() {
        let mut config = Map::new();
        config.insert("sandbox_root".into(), json!("/work"));
        let out = PathTraversalValidator
            .evaluate(&ctx(json!({"path": "/etc/hosts"})), &config)
            .unwrap();
        assert_eq!(codes(&out), vec![SANDBOX_VIOLATION]);

        let inside = PathTraversalValidator
            .evaluate(&ctx(json!({"path": "/work/out/a.txt"})), &config)
            .unwrap();
        assert!(inside.is_empty());

        let context = ctx(json!({"output_path": "/work2/a"})).with_sandbox_root("/work");
        let out = PathTraversalValidator.evaluate(&context, &Map::new()).unwrap();
        assert_eq!(codes(&out), vec![SANDBOX_VIOLATION]);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = Map::new();
        config.insert("path_params".into(), json!("path"));
        assert!(PathTraversalValidator
            .evaluate(&ctx(json!({})), &config)
            .is_err());
    }
}
