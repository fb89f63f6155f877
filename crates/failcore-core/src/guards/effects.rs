//! Side-effect classification.
//!
//! Unlike the other domains this is a heuristic over tool-name tokens and
//! parameter names, not a ruleset. An optional [`EffectBoundary`] lists the
//! effect types a deployment permits; anything outside it is a violation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::EngineMode;
use crate::rules::RuleCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectType {
    FilesystemRead,
    FilesystemWrite,
    FilesystemDelete,
    Network,
    Exec,
}

impl EffectType {
    pub fn category(self) -> RuleCategory {
        match self {
            EffectType::FilesystemRead
            | EffectType::FilesystemWrite
            | EffectType::FilesystemDelete => RuleCategory::EffectFilesystem,
            EffectType::Network => RuleCategory::EffectNetwork,
            EffectType::Exec => RuleCategory::EffectExec,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EffectType::FilesystemRead => "filesystem_read",
            EffectType::FilesystemWrite => "filesystem_write",
            EffectType::FilesystemDelete => "filesystem_delete",
            EffectType::Network => "network",
            EffectType::Exec => "exec",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "filesystem_read" => Some(EffectType::FilesystemRead),
            "filesystem_write" => Some(EffectType::FilesystemWrite),
            "filesystem_delete" => Some(EffectType::FilesystemDelete),
            "network" => Some(EffectType::Network),
            "exec" => Some(EffectType::Exec),
            _ => None,
        }
    }
}

/// One inferred side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedEffect {
    pub effect: EffectType,
    /// Path, URL or command the effect applies to, when a parameter names it.
    pub target: Option<String>,
    /// Tool-name token or parameter name that triggered the inference.
    pub evidence: String,
}

/// Permitted effect types.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EffectBoundary {
    pub allowed: BTreeSet<EffectType>,
}

impl EffectBoundary {
    pub fn new(allowed: impl IntoIterator<Item = EffectType>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Read-only: filesystem reads, nothing else.
    pub fn read_only() -> Self {
        Self::new([EffectType::FilesystemRead])
    }

    pub fn permits(&self, effect: EffectType) -> bool {
        self.allowed.contains(&effect)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub enabled: bool,
    pub boundary: Option<EffectBoundary>,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            boundary: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EffectsReport {
    pub effects: Vec<DetectedEffect>,
    pub violations: Vec<DetectedEffect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EffectsReport {
    pub fn disabled() -> Self {
        Self {
            reason: Some("disabled".to_string()),
            ..Self::default()
        }
    }
}

const READ_TOKENS: &[&str] = &["read", "cat", "open", "load", "list", "ls", "stat", "glob"];
const WRITE_TOKENS: &[&str] = &[
    "write", "save", "create", "append", "mkdir", "copy", "move", "rename", "touch", "edit",
];
const DELETE_TOKENS: &[&str] = &["delete", "remove", "rm", "unlink", "rmdir", "purge"];
const NETWORK_TOKENS: &[&str] = &[
    "http", "https", "fetch", "request", "download", "upload", "curl", "wget", "post", "send",
    "email", "webhook", "api", "browse", "url",
];
const EXEC_TOKENS: &[&str] = &[
    "exec", "shell", "bash", "sh", "run", "command", "subprocess", "spawn", "eval", "terminal",
];

const PATH_PARAMS: &[&str] = &[
    "path", "file", "filename", "filepath", "dir", "directory", "dest", "destination", "src",
    "source", "target",
];
const URL_PARAMS: &[&str] = &["url", "uri", "endpoint", "webhook", "host"];
const COMMAND_PARAMS: &[&str] = &["command", "cmd", "script", "shell"];

fn name_matches(key: &str, names: &[&str]) -> bool {
    let lowered = key.to_lowercase();
    names.iter().any(|n| {
        lowered == *n
            || lowered.ends_with(&format!("_{n}"))
            || lowered.starts_with(&format!("{n}_"))
    })
}

#[derive(Debug, Clone)]
pub struct EffectsEngine {
    boundary: Option<EffectBoundary>,
}

impl EffectsEngine {
    pub fn new(config: &EffectsConfig) -> Self {
        Self {
            boundary: config.boundary.clone(),
        }
    }

    pub fn boundary(&self) -> Option<&EffectBoundary> {
        self.boundary.as_ref()
    }

    /// Infer side effects from the tool name and parameter names.
    pub fn detect(&self, tool: &str, params: &Map<String, Value>) -> Vec<DetectedEffect> {
        let lowered = tool.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let token_hit = |table: &[&str]| tokens.iter().find(|t| table.contains(*t)).copied();

        let mut verbs: Vec<(EffectType, String)> = Vec::new();
        for (effect, table) in [
            (EffectType::FilesystemDelete, DELETE_TOKENS),
            (EffectType::FilesystemWrite, WRITE_TOKENS),
            (EffectType::FilesystemRead, READ_TOKENS),
            (EffectType::Network, NETWORK_TOKENS),
            (EffectType::Exec, EXEC_TOKENS),
        ] {
            if let Some(tok) = token_hit(table) {
                verbs.push((effect, format!("tool:{tok}")));
            }
        }

        let fs_verb = verbs
            .iter()
            .map(|(e, _)| *e)
            .find(|e| e.category() == RuleCategory::EffectFilesystem);

        let mut effects: Vec<DetectedEffect> = Vec::new();
        let mut push = |effect: EffectType, target: Option<String>, evidence: String| {
            if !effects
                .iter()
                .any(|e| e.effect == effect && e.target == target)
            {
                effects.push(DetectedEffect {
                    effect,
                    target,
                    evidence,
                });
            }
        };

        let mut targeted: BTreeSet<EffectType> = BTreeSet::new();
        for (key, value) in params {
            let Some(target) = value.as_str().map(str::to_string) else {
                continue;
            };
            if name_matches(key, PATH_PARAMS) {
                let effect = fs_verb.unwrap_or(EffectType::FilesystemRead);
                targeted.insert(effect);
                push(effect, Some(target), format!("param:{key}"));
            } else if name_matches(key, URL_PARAMS) {
                targeted.insert(EffectType::Network);
                push(EffectType::Network, Some(target), format!("param:{key}"));
            } else if name_matches(key, COMMAND_PARAMS) {
                targeted.insert(EffectType::Exec);
                push(EffectType::Exec, Some(target), format!("param:{key}"));
            }
        }

        for (effect, evidence) in verbs {
            if !targeted.contains(&effect) {
                push(effect, None, evidence);
            }
        }
        effects
    }

    /// Effects outside `boundary` (or the engine's own boundary).
    pub fn violations(
        &self,
        effects: &[DetectedEffect],
        boundary: Option<&EffectBoundary>,
    ) -> Vec<DetectedEffect> {
        let Some(boundary) = boundary.or(self.boundary.as_ref()) else {
            return Vec::new();
        };
        effects
            .iter()
            .filter(|e| !boundary.permits(e.effect))
            .cloned()
            .collect()
    }

    pub fn check(&self, tool: &str, params: &Map<String, Value>) -> EffectsReport {
        let effects = self.detect(tool, params);
        let violations = self.violations(&effects, None);
        EffectsReport {
            effects,
            violations,
            reason: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum EffectsGuard {
    Real(EffectsEngine),
    NoOp,
}

impl EffectsGuard {
    pub fn mode(&self) -> EngineMode {
        match self {
            EffectsGuard::Real(_) => EngineMode::Real,
            EffectsGuard::NoOp => EngineMode::NoOp,
        }
    }

    pub fn detect(&self, tool: &str, params: &Map<String, Value>) -> Vec<DetectedEffect> {
        match self {
            EffectsGuard::Real(engine) => engine.detect(tool, params),
            EffectsGuard::NoOp => Vec::new(),
        }
    }

    pub fn check(&self, tool: &str, params: &Map<String, Value>) -> EffectsReport {
        match self {
            EffectsGuard::Real(engine) => engine.check(tool, params),
            EffectsGuard::NoOp => EffectsReport::disabled(),
        }
    }

    /// Check against an explicit boundary instead of the configured one.
    pub fn check_with_boundary(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        boundary: &EffectBoundary,
    ) -> EffectsReport {
        match self {
            EffectsGuard::Real(engine) => {
                let effects = engine.detect(tool, params);
                let violations = engine.violations(&effects, Some(boundary));
                EffectsReport {
                    effects,
                    violations,
                    reason: None,
                }
            }
            EffectsGuard::NoOp => EffectsReport::disabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn engine() -> EffectsEngine {
        EffectsEngine::new(&EffectsConfig::default())
    }

    #[test]
    fn test_write_file_targets_path() {
        let effects = engine().detect("write_file", &params(json!({"path": "/tmp/a", "content": "x"})));
        assert_eq!(
            effects,
            vec![DetectedEffect {
                effect: EffectType::FilesystemWrite,
                target: Some("/tmp/a".into()),
                evidence: "param:path".into(),
            }]
        );
    }

    #[test]
    fn test_tokens_do_not_match_substrings() {
        let effects = engine().detect("truncate_text", &params(json!({"text": "hello"})));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_network_and_exec() {
        let effects = engine().detect(
            "run_shell",
            &params(json!({"cmd": "curl https://x", "callback_url": "https://y"})),
        );
        let kinds: BTreeSet<_> = effects.iter().map(|e| e.effect).collect();
        assert!(kinds.contains(&EffectType::Exec));
        assert!(kinds.contains(&EffectType::Network));
    }

    #[test]
    fn test_boundary_violation() {
        let engine = EffectsEngine::new(&EffectsConfig {
            enabled: true,
            boundary: Some(EffectBoundary::read_only()),
        });
        let report = engine.check("delete_file", &params(json!({"path": "a.txt"})));
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].effect, EffectType::FilesystemDelete);

        let ok = engine.check("read_file", &params(json!({"path": "a.txt"})));
        assert!(ok.violations.is_empty());
    }

    #[test]
    fn test_noop_is_disabled() {
        let report = EffectsGuard::NoOp.check("delete_file", &params(json!({"path": "a"})));
        assert!(report.effects.is_empty());
        assert_eq!(report.reason.as_deref(), Some("disabled"));
    }
}
