//! Parameter drift: how far a call's params moved from the first call of the
//! same tool in this run.
//!
//! The per-key delta is magnitude weighted (added/removed keys and type
//! changes weigh 1.0, numbers by relative change, strings by how early they
//! diverge) and averaged over the union of keys. Two thresholds split the
//! score into none / minor / major. Drift rules then look at the changed
//! values only. With `analysis_only` set the resulting action is capped at
//! Warn.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{domain_categories, EngineMode, GuardError};
use crate::digest::canonical_json;
use crate::rules::{GuardDomain, RuleAction, RuleEngine, RuleEngineResult};

const NO_DRIFT: &str = "no drift from baseline";
const BASELINE_RECORDED: &str = "baseline recorded";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub enabled: bool,
    pub ruleset: String,
    pub minor_threshold: f64,
    pub major_threshold: f64,
    /// Never escalate drift to Block.
    pub analysis_only: bool,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ruleset: crate::rules::builtin::DRIFT.to_string(),
            minor_threshold: 0.3,
            major_threshold: 0.7,
            analysis_only: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftLevel {
    None,
    Minor,
    Major,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftChangeKind {
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftChange {
    pub key: String,
    pub kind: DriftChangeKind,
    pub magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub level: DriftLevel,
    pub score: f64,
    pub changes: Vec<DriftChange>,
    pub action: RuleAction,
    pub rules: RuleEngineResult,
    /// This call established the tool's baseline.
    pub baseline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DriftReport {
    fn quiet(baseline: bool, rules: RuleEngineResult, reason: &str) -> Self {
        Self {
            level: DriftLevel::None,
            score: 0.0,
            changes: Vec::new(),
            action: RuleAction::Allow,
            rules,
            baseline,
            reason: Some(reason.to_string()),
        }
    }

    pub fn disabled() -> Self {
        Self::quiet(false, RuleEngineResult::disabled(), "disabled")
    }

    /// First call for a tool; its params become the baseline.
    pub fn baseline_recorded() -> Self {
        Self::quiet(true, RuleEngineResult::not_evaluated(BASELINE_RECORDED), BASELINE_RECORDED)
    }

    /// Params identical to the baseline.
    pub fn unchanged() -> Self {
        Self::quiet(false, RuleEngineResult::not_evaluated(NO_DRIFT), NO_DRIFT)
    }
}

/// Per-run first-seen params by tool.
#[derive(Default)]
pub struct DriftTracker {
    baselines: Mutex<HashMap<String, Map<String, Value>>>,
}

impl std::fmt::Debug for DriftTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriftTracker")
            .field("tools", &self.lock().len())
            .finish()
    }
}

impl DriftTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Map<String, Value>>> {
        self.baselines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The baseline for `tool`; the first observation becomes the baseline
    /// and returns `None`.
    pub fn observe(&self, tool: &str, params: &Map<String, Value>) -> Option<Map<String, Value>> {
        let mut baselines = self.lock();
        match baselines.get(tool) {
            Some(baseline) => Some(baseline.clone()),
            None => {
                baselines.insert(tool.to_string(), params.clone());
                None
            }
        }
    }

    pub fn baseline(&self, tool: &str) -> Option<Map<String, Value>> {
        self.lock().get(tool).cloned()
    }
}

fn value_magnitude(baseline: &Value, current: &Value) -> f64 {
    if baseline == current {
        return 0.0;
    }
    match (baseline, current) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            let scale = a.abs().max(b.abs()).max(1.0);
            ((a - b).abs() / scale).min(1.0)
        }
        (Value::String(a), Value::String(b)) => {
            let longest = a.chars().count().max(b.chars().count()).max(1);
            let common = a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count();
            (1.0 - common as f64 / longest as f64).max(0.1)
        }
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            let same = canonical_json(baseline).ok() == canonical_json(current).ok();
            if same {
                0.0
            } else {
                0.5
            }
        }
        _ => 1.0,
    }
}

/// Key-level changes and the averaged score.
pub fn measure_drift(
    current: &Map<String, Value>,
    baseline: &Map<String, Value>,
) -> (Vec<DriftChange>, f64) {
    let keys: BTreeSet<&String> = current.keys().chain(baseline.keys()).collect();
    if keys.is_empty() {
        return (Vec::new(), 0.0);
    }
    let mut changes = Vec::new();
    let mut total = 0.0;
    for key in &keys {
        let change = match (baseline.get(*key), current.get(*key)) {
            (None, Some(_)) => Some((DriftChangeKind::Added, 1.0)),
            (Some(_), None) => Some((DriftChangeKind::Removed, 1.0)),
            (Some(b), Some(c)) => {
                let m = value_magnitude(b, c);
                (m > 0.0).then_some((DriftChangeKind::Changed, m))
            }
            (None, None) => None,
        };
        if let Some((kind, magnitude)) = change {
            total += magnitude;
            changes.push(DriftChange {
                key: (*key).clone(),
                kind,
                magnitude,
            });
        }
    }
    (changes, total / keys.len() as f64)
}

#[derive(Debug, Clone)]
pub struct DriftEngine {
    rules: RuleEngine,
    minor_threshold: f64,
    major_threshold: f64,
    analysis_only: bool,
}

impl DriftEngine {
    pub fn new(rules: RuleEngine, config: &DriftConfig) -> Self {
        Self {
            rules,
            minor_threshold: config.minor_threshold,
            major_threshold: config.major_threshold.max(config.minor_threshold),
            analysis_only: config.analysis_only,
        }
    }

    pub fn analysis_only(&self) -> bool {
        self.analysis_only
    }

    fn level_for(&self, score: f64) -> DriftLevel {
        if score >= self.major_threshold {
            DriftLevel::Major
        } else if score >= self.minor_threshold {
            DriftLevel::Minor
        } else {
            DriftLevel::None
        }
    }

    /// Compare `current` against `baseline`.
    pub fn detect_drift(
        &self,
        tool: &str,
        current: &Map<String, Value>,
        baseline: &Map<String, Value>,
    ) -> Result<DriftReport, GuardError> {
        let (changes, score) = measure_drift(current, baseline);
        if changes.is_empty() {
            return Ok(DriftReport::unchanged());
        }
        let level = self.level_for(score);

        let changed: Map<String, Value> = changes
            .iter()
            .filter(|c| c.kind != DriftChangeKind::Removed)
            .filter_map(|c| current.get(&c.key).map(|v| (c.key.clone(), v.clone())))
            .collect();
        let rules = if changed.is_empty() {
            RuleEngineResult::not_evaluated("only removed keys")
        } else {
            self.rules
                .evaluate(
                    tool,
                    &changed,
                    None,
                    Some(domain_categories(GuardDomain::Drift)),
                    None,
                )
                .map_err(|source| GuardError::Rule {
                    domain: GuardDomain::Drift,
                    source,
                })?
        };

        let level_action = match level {
            DriftLevel::Major => RuleAction::Block,
            DriftLevel::Minor => RuleAction::Warn,
            DriftLevel::None => RuleAction::Allow,
        };
        let mut action = if rules.is_match() {
            level_action.max(rules.action)
        } else {
            level_action
        };
        if self.analysis_only && action == RuleAction::Block {
            action = RuleAction::Warn;
        }

        Ok(DriftReport {
            level,
            score,
            changes,
            action,
            rules,
            baseline: false,
            reason: None,
        })
    }

    /// Observe a call in `tracker`: the first call per tool sets the baseline.
    pub fn check(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        tracker: &DriftTracker,
    ) -> Result<DriftReport, GuardError> {
        match tracker.observe(tool, params) {
            None => Ok(DriftReport::baseline_recorded()),
            Some(baseline) => self.detect_drift(tool, params, &baseline),
        }
    }
}

#[derive(Debug, Clone)]
pub enum DriftGuard {
    Real(DriftEngine),
    NoOp,
}

impl DriftGuard {
    pub fn mode(&self) -> EngineMode {
        match self {
            DriftGuard::Real(_) => EngineMode::Real,
            DriftGuard::NoOp => EngineMode::NoOp,
        }
    }

    pub fn rule_count(&self) -> usize {
        match self {
            DriftGuard::Real(engine) => engine.rules.enabled_rule_count(),
            DriftGuard::NoOp => 0,
        }
    }

    pub fn detect_drift(
        &self,
        tool: &str,
        current: &Map<String, Value>,
        baseline: &Map<String, Value>,
    ) -> Result<DriftReport, GuardError> {
        match self {
            DriftGuard::Real(engine) => engine.detect_drift(tool, current, baseline),
            DriftGuard::NoOp => Ok(DriftReport::disabled()),
        }
    }

    pub fn check(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        tracker: &DriftTracker,
    ) -> Result<DriftReport, GuardError> {
        match self {
            DriftGuard::Real(engine) => engine.check(tool, params, tracker),
            DriftGuard::NoOp => Ok(DriftReport::disabled()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::{GuardConfig, GuardSet};
    use serde_json::json;

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn drift(analysis_only: bool) -> DriftGuard {
        let mut config = GuardConfig::default();
        config.drift.analysis_only = analysis_only;
        GuardSet::builtin(&config).unwrap().drift
    }

    #[test]
    fn test_identical_params_do_not_drift() {
        let p = params(json!({"path": "/data/a.txt", "limit": 10}));
        let (changes, score) = measure_drift(&p, &p);
        assert!(changes.is_empty());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_number_change_is_relative() {
        let (changes, score) = measure_drift(
            &params(json!({"limit": 11})),
            &params(json!({"limit": 10})),
        );
        assert_eq!(changes.len(), 1);
        assert!((score - 1.0 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_call_sets_baseline() {
        let guard = drift(true);
        let tracker = DriftTracker::new();
        let first = guard
            .check("read_file", &params(json!({"path": "/data/a.txt"})), &tracker)
            .unwrap();
        assert!(first.baseline);
        assert_eq!(first.level, DriftLevel::None);
        assert!(tracker.baseline("read_file").is_some());
    }

    #[test]
    fn test_sensitive_target_is_major_but_capped_when_analysis_only() {
        let tracker = DriftTracker::new();
        let baseline = params(json!({"path": "data/a.txt"}));
        let current = params(json!({"path": "/etc/shadow"}));

        let analysis = drift(true);
        analysis.check("read_file", &baseline, &tracker).unwrap();
        let report = analysis.check("read_file", &current, &tracker).unwrap();
        assert_eq!(report.level, DriftLevel::Major);
        assert!(report.rules.rule_ids().contains(&"DRIFT_SENSITIVE_TARGET"));
        assert_eq!(report.action, RuleAction::Warn);

        let enforcing = drift(false);
        let report = enforcing.detect_drift("read_file", &current, &baseline).unwrap();
        assert_eq!(report.action, RuleAction::Block);
    }

    #[test]
    fn test_repeat_call_reports_no_drift_not_disabled() {
        let guard = drift(false);
        let tracker = DriftTracker::new();
        let p = params(json!({"path": "/data/a.txt"}));
        guard.check("read_file", &p, &tracker).unwrap();

        let report = guard.check("read_file", &p, &tracker).unwrap();
        assert!(!report.baseline);
        assert_eq!(report.level, DriftLevel::None);
        assert_eq!(report.action, RuleAction::Allow);
        assert_eq!(report.reason.as_deref(), Some(NO_DRIFT));
        assert_eq!(report.rules.reason.as_deref(), Some(NO_DRIFT));
        assert_ne!(report, DriftReport::disabled());
    }

    #[test]
    fn test_noop_never_drifts() {
        let report = DriftGuard::NoOp
            .check("x", &params(json!({"a": 1})), &DriftTracker::new())
            .unwrap();
        assert_eq!(report.reason.as_deref(), Some("disabled"));
        assert_eq!(report.action, RuleAction::Allow);
    }
}
