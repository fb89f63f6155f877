//! Guard engines: one per security domain, each chosen once at startup.
//!
//! Every domain is an enum with a `Real` variant (ruleset loaded, domain logic
//! wired) and a `NoOp` variant that always answers "no violation, reason =
//! disabled". The variant is fixed when the [`GuardSet`] is built; nothing
//! re-reads configuration per call, and [`GuardSet::capabilities`] reports the
//! stored tag so reported state cannot drift from behaviour.
//!
//! # Modules
//!
//! - [`dlp`]     : secret / PII scanning and redaction
//! - [`semantic`]: high-confidence intent rules (injection, leakage, traversal)
//! - [`effects`] : heuristic side-effect classifier and boundary check
//! - [`taint`]   : source/sink classification and the per-run flow tracker
//! - [`drift`]   : per-run parameter baselines and drift scoring
//! - [`scanners`]: the only writers to the run's [`crate::ScanCache`]

pub mod dlp;
pub mod drift;
pub mod effects;
pub mod scanners;
pub mod semantic;
pub mod taint;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::digest::canonical_json;
use crate::rules::{
    BuiltinLoader, DetectorRegistry, GuardDomain, RuleCategory, RuleEngine, RuleEngineConfig,
    RuleError, RuleLoader, RuleRegistry,
};

pub use dlp::{DlpConfig, DlpEngine, DlpGuard, DlpRedaction, DlpScanResult};
pub use drift::{
    DriftChange, DriftChangeKind, DriftConfig, DriftEngine, DriftGuard, DriftLevel, DriftReport,
    DriftTracker,
};
pub use effects::{
    DetectedEffect, EffectBoundary, EffectType, EffectsConfig, EffectsEngine, EffectsGuard,
    EffectsReport,
};
pub use scanners::{scan_dlp, scan_semantic, scan_taint};
pub use semantic::{SemanticConfig, SemanticEngine, SemanticGuard};
pub use taint::{
    TaintConfig, TaintEngine, TaintFlow, TaintFlowTracker, TaintGuard, TaintRole, TaintSinkResult,
    TaintSource,
};

/// Errors raised while building guard engines.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("{domain} guard: ruleset '{ruleset}' not found")]
    RulesetNotFound { domain: GuardDomain, ruleset: String },

    #[error("{domain} guard: {source}")]
    Rule {
        domain: GuardDomain,
        #[source]
        source: RuleError,
    },
}

/// Which implementation a domain runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    Real,
    NoOp,
}

impl EngineMode {
    pub fn is_real(self) -> bool {
        self == EngineMode::Real
    }
}

/// Per-domain guard configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub engine: RuleEngineConfig,
    pub dlp: DlpConfig,
    pub semantic: SemanticConfig,
    pub effects: EffectsConfig,
    pub taint: TaintConfig,
    pub drift: DriftConfig,
}

impl GuardConfig {
    /// Every domain switched off.
    pub fn disabled() -> Self {
        let mut config = Self::default();
        config.dlp.enabled = false;
        config.semantic.enabled = false;
        config.effects.enabled = false;
        config.taint.enabled = false;
        config.drift.enabled = false;
        config
    }
}

/// One line of [`GuardSet::capabilities`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardCapability {
    pub domain: GuardDomain,
    pub mode: EngineMode,
    /// Enabled rules behind the engine (0 for heuristic or disabled domains).
    pub rule_count: usize,
}

/// The five domain guards of one process.
#[derive(Debug, Clone)]
pub struct GuardSet {
    pub dlp: DlpGuard,
    pub semantic: SemanticGuard,
    pub effects: EffectsGuard,
    pub taint: TaintGuard,
    pub drift: DriftGuard,
}

impl GuardSet {
    /// Build every domain from `config`, loading rulesets through `loader`.
    pub fn from_config(
        config: &GuardConfig,
        loader: Arc<dyn RuleLoader>,
        detectors: Arc<DetectorRegistry>,
    ) -> Result<Self, GuardError> {
        let build = |domain: GuardDomain, ruleset: &str| {
            build_rule_engine(domain, ruleset, loader.clone(), detectors.clone(), config.engine)
        };

        let dlp = if config.dlp.enabled {
            DlpGuard::Real(DlpEngine::new(
                build(GuardDomain::Dlp, &config.dlp.ruleset)?,
                &config.dlp,
            ))
        } else {
            DlpGuard::NoOp
        };
        let semantic = if config.semantic.enabled {
            SemanticGuard::Real(SemanticEngine::new(
                build(GuardDomain::Semantic, &config.semantic.ruleset)?,
                &config.semantic,
            ))
        } else {
            SemanticGuard::NoOp
        };
        let effects = if config.effects.enabled {
            EffectsGuard::Real(EffectsEngine::new(&config.effects))
        } else {
            EffectsGuard::NoOp
        };
        let taint = if config.taint.enabled {
            TaintGuard::Real(TaintEngine::new(
                build(GuardDomain::Taint, &config.taint.ruleset)?,
                &config.taint,
            ))
        } else {
            TaintGuard::NoOp
        };
        let drift = if config.drift.enabled {
            DriftGuard::Real(DriftEngine::new(
                build(GuardDomain::Drift, &config.drift.ruleset)?,
                &config.drift,
            ))
        } else {
            DriftGuard::NoOp
        };

        let set = Self {
            dlp,
            semantic,
            effects,
            taint,
            drift,
        };
        for cap in set.capabilities() {
            tracing::info!(
                event = "guards.domain_ready",
                domain = %cap.domain,
                mode = ?cap.mode,
                rules = cap.rule_count,
            );
        }
        Ok(set)
    }

    /// Builtin rulesets and detectors.
    pub fn builtin(config: &GuardConfig) -> Result<Self, GuardError> {
        Self::from_config(
            config,
            Arc::new(BuiltinLoader),
            Arc::new(DetectorRegistry::builtin()),
        )
    }

    /// All five domains as NoOp.
    pub fn disabled() -> Self {
        Self {
            dlp: DlpGuard::NoOp,
            semantic: SemanticGuard::NoOp,
            effects: EffectsGuard::NoOp,
            taint: TaintGuard::NoOp,
            drift: DriftGuard::NoOp,
        }
    }

    /// Mode and rule count of each domain, read from the constructed engines.
    pub fn capabilities(&self) -> Vec<GuardCapability> {
        vec![
            GuardCapability {
                domain: GuardDomain::Dlp,
                mode: self.dlp.mode(),
                rule_count: self.dlp.rule_count(),
            },
            GuardCapability {
                domain: GuardDomain::Semantic,
                mode: self.semantic.mode(),
                rule_count: self.semantic.rule_count(),
            },
            GuardCapability {
                domain: GuardDomain::Effects,
                mode: self.effects.mode(),
                rule_count: 0,
            },
            GuardCapability {
                domain: GuardDomain::Taint,
                mode: self.taint.mode(),
                rule_count: self.taint.rule_count(),
            },
            GuardCapability {
                domain: GuardDomain::Drift,
                mode: self.drift.mode(),
                rule_count: self.drift.rule_count(),
            },
        ]
    }
}

/// Categories a domain's engine evaluates, whatever else its ruleset holds.
pub fn domain_categories(domain: GuardDomain) -> &'static [RuleCategory] {
    match domain {
        GuardDomain::Dlp => &[
            RuleCategory::DlpApiKey,
            RuleCategory::DlpSecretToken,
            RuleCategory::DlpPrivateKey,
            RuleCategory::DlpPii,
            RuleCategory::DlpPaymentCard,
        ],
        GuardDomain::Semantic => &[
            RuleCategory::SemanticSecretLeakage,
            RuleCategory::SemanticInjection,
            RuleCategory::SemanticDangerousCombo,
            RuleCategory::SemanticPathTraversal,
        ],
        GuardDomain::Effects => &[
            RuleCategory::EffectFilesystem,
            RuleCategory::EffectNetwork,
            RuleCategory::EffectExec,
        ],
        GuardDomain::Taint => &[RuleCategory::TaintSource, RuleCategory::TaintSink],
        GuardDomain::Drift => &[RuleCategory::DriftParameter, RuleCategory::DriftTarget],
    }
}

/// Tool-name pattern match: exact, or prefix when the pattern ends in `*`.
pub(crate) fn tool_pattern_matches(pattern: &str, tool: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => tool.starts_with(prefix),
        None => pattern == tool,
    }
}

/// Text a rule engine sees for an arbitrary payload: strings verbatim,
/// everything else as canonical JSON.
pub(crate) fn render_payload(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => canonical_json(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Params handed to detectors for a non-object payload.
pub(crate) fn payload_params(payload: &Value) -> Map<String, Value> {
    match payload {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other.clone());
            map
        }
    }
}

fn build_rule_engine(
    domain: GuardDomain,
    ruleset: &str,
    loader: Arc<dyn RuleLoader>,
    detectors: Arc<DetectorRegistry>,
    config: RuleEngineConfig,
) -> Result<RuleEngine, GuardError> {
    let mut registry = RuleRegistry::new(loader);
    registry.load_ruleset(ruleset).map_err(|source| match source {
        RuleError::RuleSetNotFound(name) => GuardError::RulesetNotFound {
            domain,
            ruleset: name,
        },
        source => GuardError::Rule { domain, source },
    })?;
    Ok(RuleEngine::with_config(
        registry.into_shared(),
        detectors,
        config,
    ))
}
