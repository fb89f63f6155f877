//! Ruleset loaders.
//!
//! - [`BuiltinLoader`]: rulesets compiled into the crate
//! - [`MemoryLoader`]: definitions supplied at runtime
//! - [`YamlDirLoader`]: `<dir>/<name>.yaml` (or `.yml`) RuleSet documents
//! - [`CompositeLoader`]: ordered chain, first hit wins, so a local file can
//!   override a builtin ruleset of the same name

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::builtin;
use super::error::{RuleError, RuleResult};
use super::model::{RuleSet, RuleSetDefinition};

/// Source of named rulesets.
pub trait RuleLoader: Send + Sync {
    /// `Ok(None)` when this loader does not know `name`.
    fn load(&self, name: &str) -> RuleResult<Option<RuleSet>>;

    /// Names this loader can serve.
    fn available(&self) -> Vec<String>;

    fn describe(&self) -> String;
}

/// Serves the rulesets shipped with the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinLoader;

impl RuleLoader for BuiltinLoader {
    fn load(&self, name: &str) -> RuleResult<Option<RuleSet>> {
        Ok(builtin::definition(name)?.map(RuleSet::from_definition))
    }

    fn available(&self) -> Vec<String> {
        builtin::NAMES.iter().map(|n| (*n).to_string()).collect()
    }

    fn describe(&self) -> String {
        "builtin".to_string()
    }
}

/// In-memory definitions keyed by ruleset name.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    rulesets: HashMap<String, RuleSetDefinition>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ruleset(mut self, def: RuleSetDefinition) -> Self {
        self.insert(def);
        self
    }

    pub fn insert(&mut self, def: RuleSetDefinition) {
        self.rulesets.insert(def.name.clone(), def);
    }
}

impl RuleLoader for MemoryLoader {
    fn load(&self, name: &str) -> RuleResult<Option<RuleSet>> {
        Ok(self
            .rulesets
            .get(name)
            .cloned()
            .map(RuleSet::from_definition))
    }

    fn available(&self) -> Vec<String> {
        let mut names: Vec<_> = self.rulesets.keys().cloned().collect();
        names.sort();
        names
    }

    fn describe(&self) -> String {
        format!("memory({})", self.rulesets.len())
    }
}

/// Reads RuleSet YAML documents from a directory.
#[derive(Debug, Clone)]
pub struct YamlDirLoader {
    dir: PathBuf,
}

impl YamlDirLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Option<PathBuf> {
        ["yaml", "yml"]
            .iter()
            .map(|ext| self.dir.join(format!("{name}.{ext}")))
            .find(|p| p.is_file())
    }
}

/// Parse one RuleSet YAML document.
pub fn parse_ruleset_yaml(name: &str, content: &str) -> RuleResult<RuleSetDefinition> {
    serde_yaml::from_str::<RuleSetDefinition>(content).map_err(|err| RuleError::Parse {
        name: name.to_string(),
        reason: err.to_string(),
    })
}

impl RuleLoader for YamlDirLoader {
    fn load(&self, name: &str) -> RuleResult<Option<RuleSet>> {
        if name.contains(['/', '\\']) || name.contains("..") {
            return Err(RuleError::Parse {
                name: name.to_string(),
                reason: "ruleset name must be a plain file stem".to_string(),
            });
        }
        let Some(path) = self.path_for(name) else {
            return Ok(None);
        };
        let content = std::fs::read_to_string(&path).map_err(|source| RuleError::Io {
            path: path.clone(),
            source,
        })?;
        let def = parse_ruleset_yaml(name, &content)?;
        Ok(Some(RuleSet::from_definition(def)))
    }

    fn available(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    event = "rules.loader_unreadable",
                    dir = %self.dir.display(),
                    error = %err,
                );
                return Vec::new();
            }
        };
        let names: BTreeSet<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "yaml" || e == "yml")
            })
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        names.into_iter().collect()
    }

    fn describe(&self) -> String {
        format!("yaml_dir({})", self.dir.display())
    }
}

/// Ordered loader chain; the first loader that knows a name serves it.
///
/// A loader that fails for a name is logged and the chain continues.
#[derive(Clone, Default)]
pub struct CompositeLoader {
    loaders: Vec<Arc<dyn RuleLoader>>,
}

impl CompositeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a loader with lower priority than those already present.
    pub fn with_loader(mut self, loader: impl RuleLoader + 'static) -> Self {
        self.loaders.push(Arc::new(loader));
        self
    }

    /// Local YAML overrides first, builtin rulesets as fallback.
    pub fn with_local_overrides(dir: impl Into<PathBuf>) -> Self {
        Self::new()
            .with_loader(YamlDirLoader::new(dir))
            .with_loader(BuiltinLoader)
    }
}

impl RuleLoader for CompositeLoader {
    fn load(&self, name: &str) -> RuleResult<Option<RuleSet>> {
        for loader in &self.loaders {
            match loader.load(name) {
                Ok(Some(ruleset)) => {
                    tracing::debug!(
                        event = "rules.ruleset_resolved",
                        ruleset = %name,
                        loader = %loader.describe(),
                    );
                    return Ok(Some(ruleset));
                }
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(
                        event = "rules.loader_failed",
                        ruleset = %name,
                        loader = %loader.describe(),
                        error = %err,
                    );
                }
            }
        }
        Ok(None)
    }

    fn available(&self) -> Vec<String> {
        let names: BTreeSet<String> = self.loaders.iter().flat_map(|l| l.available()).collect();
        names.into_iter().collect()
    }

    fn describe(&self) -> String {
        let inner: Vec<String> = self.loaders.iter().map(|l| l.describe()).collect();
        format!("composite[{}]", inner.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_loader_serves_all_names() {
        let loader = BuiltinLoader;
        for name in loader.available() {
            let set = loader.load(&name).unwrap().expect("builtin ruleset");
            assert!(!set.rules.is_empty(), "{name} has rules");
            assert!(set.skipped.is_empty(), "{name} builtin rules all compile");
        }
        assert!(loader.load("unknown").unwrap().is_none());
    }

    #[test]
    fn test_parse_ruleset_yaml() {
        let yaml = r#"
name: custom
version: "2"
description: local rules
rules:
  - rule_id: CUSTOM_TOKEN
    name: Custom token
    category: DLP_SECRET_TOKEN
    severity: high
    patterns:
      - pattern_type: regex
        value: "tok_[a-z0-9]{8}"
"#;
        let def = parse_ruleset_yaml("custom", yaml).unwrap();
        assert_eq!(def.version, "2");
        let set = RuleSet::from_definition(def);
        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.rules[0].rule_id, "CUSTOM_TOKEN");
    }

    #[test]
    fn test_yaml_loader_rejects_path_like_names() {
        let loader = YamlDirLoader::new("/tmp");
        assert!(loader.load("../etc/passwd").is_err());
    }

    #[test]
    fn test_composite_first_hit_wins() {
        let local = MemoryLoader::new().with_ruleset(RuleSetDefinition::new("dlp", "local"));
        let composite = CompositeLoader::new()
            .with_loader(local)
            .with_loader(BuiltinLoader);
        let set = composite.load("dlp").unwrap().unwrap();
        assert_eq!(set.version, "local");
        let semantic = composite.load("semantic").unwrap().unwrap();
        assert_ne!(semantic.version, "local");
        assert!(composite.available().contains(&"taint".to_string()));
    }
}
