//! Rules: the detection unit shared by the DLP, Semantic, Taint and Drift guards.
//!
//! # Modules
//!
//! - [`model`]   : `Rule`, `RuleSet`, severities, actions, categories
//! - [`detector`]: `Detector` trait + `DetectorRegistry` for `custom` patterns
//! - [`registry`]: `RuleRegistry` indexed by id / category / severity
//! - [`loader`]  : builtin, memory, YAML directory and composite loaders
//! - [`builtin`] : rulesets shipped with the crate
//! - [`engine`]  : `RuleEngine::evaluate()` and aggregate action resolution
//! - [`error`]   : `RuleError` / `RuleResult`

pub mod builtin;
pub mod detector;
pub mod engine;
pub mod error;
pub mod loader;
pub mod model;
pub mod registry;

pub use detector::{Detector, DetectorInput, DetectorRegistry};
pub use engine::{RuleContext, RuleEngine, RuleEngineConfig, RuleEngineResult, RuleMatch};
pub use error::{RuleError, RuleResult};
pub use loader::{
    parse_ruleset_yaml, BuiltinLoader, CompositeLoader, MemoryLoader, RuleLoader, YamlDirLoader,
};
pub use model::{
    GuardDomain, PatternDefinition, PatternType, Rule, RuleAction, RuleCategory, RuleDefinition,
    RulePattern, RuleSet, RuleSetDefinition, Severity, SkippedRule,
};
pub use registry::{LoadedRuleSet, RuleRegistry, SharedRegistry};
