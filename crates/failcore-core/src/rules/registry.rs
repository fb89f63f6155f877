//! Rule registry: indexes compiled rules by id, category and severity.
//!
//! A registry is an explicit value built by the caller and injected into the
//! engines that use it; there is no process-wide instance. Hot changes
//! (`enable_rule`, `disable_rule`, `reload`) go through `&mut self`, so sharing
//! a registry with live engines means wrapping it in a [`SharedRegistry`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::error::{RuleError, RuleResult};
use super::loader::RuleLoader;
use super::model::{Rule, RuleCategory, RuleSet, Severity};

/// A registry shared between engines; writers take the lock for hot reload.
pub type SharedRegistry = Arc<RwLock<RuleRegistry>>;

/// Summary of a ruleset that was loaded into the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedRuleSet {
    pub name: String,
    pub version: String,
    pub rule_count: usize,
    pub skipped_count: usize,
}

pub struct RuleRegistry {
    loader: Arc<dyn RuleLoader>,
    rules: Vec<Rule>,
    by_id: HashMap<String, usize>,
    by_category: HashMap<RuleCategory, Vec<usize>>,
    by_severity: BTreeMap<Severity, Vec<usize>>,
    loaded: Vec<LoadedRuleSet>,
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("loader", &self.loader.describe())
            .field("rules", &self.rules.len())
            .field("loaded", &self.loaded)
            .finish()
    }
}

impl RuleRegistry {
    pub fn new(loader: Arc<dyn RuleLoader>) -> Self {
        Self {
            loader,
            rules: Vec::new(),
            by_id: HashMap::new(),
            by_category: HashMap::new(),
            by_severity: BTreeMap::new(),
            loaded: Vec::new(),
        }
    }

    /// Wrap into a lock for sharing with engines.
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Load a named ruleset through the loader. Returns the number of rules added.
    pub fn load_ruleset(&mut self, name: &str) -> RuleResult<usize> {
        let ruleset = self
            .loader
            .load(name)?
            .ok_or_else(|| RuleError::RuleSetNotFound(name.to_string()))?;
        Ok(self.register_ruleset(ruleset))
    }

    /// Add an already-compiled ruleset. A rule whose id is already present
    /// replaces the earlier definition in place.
    pub fn register_ruleset(&mut self, ruleset: RuleSet) -> usize {
        let count = ruleset.rules.len();
        self.loaded.retain(|l| l.name != ruleset.name);
        self.loaded.push(LoadedRuleSet {
            name: ruleset.name.clone(),
            version: ruleset.version.clone(),
            rule_count: count,
            skipped_count: ruleset.skipped.len(),
        });

        for rule in ruleset.rules {
            match self.by_id.get(&rule.rule_id) {
                Some(&idx) => self.rules[idx] = rule,
                None => {
                    self.by_id.insert(rule.rule_id.clone(), self.rules.len());
                    self.rules.push(rule);
                }
            }
        }
        self.rebuild_indexes();

        tracing::debug!(
            event = "rules.ruleset_registered",
            ruleset = %self.loaded.last().map(|l| l.name.as_str()).unwrap_or_default(),
            rules = count,
        );
        count
    }

    /// Clear everything and load every ruleset the loader reports available.
    ///
    /// A ruleset that fails to load is logged and skipped.
    pub fn reload(&mut self) -> usize {
        self.rules.clear();
        self.by_id.clear();
        self.loaded.clear();
        self.rebuild_indexes();

        let mut total = 0;
        for name in self.loader.available() {
            match self.load_ruleset(&name) {
                Ok(n) => total += n,
                Err(err) => {
                    tracing::warn!(event = "rules.reload_failed", ruleset = %name, error = %err);
                }
            }
        }
        total
    }

    /// Enable a rule. Returns `false` (and does nothing) for unknown ids.
    pub fn enable_rule(&mut self, rule_id: &str) -> bool {
        self.set_enabled(rule_id, true)
    }

    /// Disable a rule. Returns `false` (and does nothing) for unknown ids.
    pub fn disable_rule(&mut self, rule_id: &str) -> bool {
        self.set_enabled(rule_id, false)
    }

    fn set_enabled(&mut self, rule_id: &str, enabled: bool) -> bool {
        match self.by_id.get(rule_id) {
            Some(&idx) => {
                self.rules[idx].enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.by_id.get(rule_id).map(|&idx| &self.rules[idx])
    }

    /// All rules of a category, enabled or not, in registration order.
    pub fn by_category(&self, category: RuleCategory) -> Vec<&Rule> {
        self.by_category
            .get(&category)
            .map(|idxs| idxs.iter().map(|&i| &self.rules[i]).collect())
            .unwrap_or_default()
    }

    /// All rules at exactly `severity`.
    pub fn by_severity(&self, severity: Severity) -> Vec<&Rule> {
        self.by_severity
            .get(&severity)
            .map(|idxs| idxs.iter().map(|&i| &self.rules[i]).collect())
            .unwrap_or_default()
    }

    pub fn enabled_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.enabled)
    }

    /// Candidate rules for one evaluation, in iteration order.
    ///
    /// 1. non-empty `categories`: union of those categories (first-seen order),
    /// 2. else `min_severity`: rules at or above the threshold,
    /// 3. else every enabled rule.
    pub fn select(
        &self,
        categories: Option<&[RuleCategory]>,
        min_severity: Option<Severity>,
    ) -> Vec<&Rule> {
        if let Some(categories) = categories.filter(|c| !c.is_empty()) {
            let mut seen = vec![false; self.rules.len()];
            let mut selected = Vec::new();
            for category in categories {
                for &idx in self.by_category.get(category).into_iter().flatten() {
                    if !seen[idx] && self.rules[idx].enabled {
                        seen[idx] = true;
                        selected.push(&self.rules[idx]);
                    }
                }
            }
            return selected;
        }
        if let Some(threshold) = min_severity {
            return self
                .enabled_rules()
                .filter(|r| r.severity >= threshold)
                .collect();
        }
        self.enabled_rules().collect()
    }

    pub fn loaded_rulesets(&self) -> &[LoadedRuleSet] {
        &self.loaded
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn rebuild_indexes(&mut self) {
        self.by_category.clear();
        self.by_severity.clear();
        for (idx, rule) in self.rules.iter().enumerate() {
            self.by_category.entry(rule.category).or_default().push(idx);
            self.by_severity.entry(rule.severity).or_default().push(idx);
        }
    }
}
