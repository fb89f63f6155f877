//! FailCore Core Library
//!
//! Tool-call safety pipeline for autonomous agents: a shared rule engine,
//! five guard domains (DLP, semantic, effects, taint, drift), policy-driven
//! validation with BLOCK/WARN/SHADOW enforcement, a run-scoped scan cache and
//! the step executor that ties them together.

pub mod digest;
pub mod error;
pub mod executor;
pub mod guards;
pub mod metrics;
pub mod obs;
pub mod rules;
pub mod scan_cache;
pub mod telemetry;
pub mod validation;

pub use error::{FailCoreError, Result};

pub use digest::{canonical_json, fingerprint, sha256_hex};

pub use executor::{
    bind_run, codes, current_run, normalize, Artifact, BridgeError, Executor, ExecutorBuilder,
    ExecutorConfig, MemoryTraceRecorder, NullRecorder, OutputKind, PolicyVerdict, Precondition,
    PreconditionFailure, RequiredParams, RunBinding, RunContext, Step, StepError, StepOutput,
    StepPolicy, StepResult, StepStatus, Tool, ToolOutput, ToolPolicyRule, ToolPolicySet,
    ToolProvider, ToolRegistry, ToolRegistryError, TraceEvent, TraceEventType, TraceRecorder,
    TracingRecorder,
};

pub use guards::{
    scan_dlp, scan_semantic, scan_taint, EngineMode, GuardCapability, GuardConfig, GuardError,
    GuardSet,
};

pub use metrics::{ExecutorMetrics, MetricsSnapshot};

pub use rules::{
    Detector, DetectorRegistry, GuardDomain, Rule, RuleAction, RuleCategory, RuleContext,
    RuleEngine, RuleEngineConfig, RuleEngineResult, RuleError, RuleLoader, RuleMatch,
    RuleRegistry, RuleSet, Severity,
};

pub use scan_cache::{CacheStats, ScanCache, ScanCacheConfig, ScanCacheError, ScanRecord};

pub use validation::{
    Context, Decision, EnforcementMode, Outcome, Policy, PolicyError, RiskLevel,
    ValidationEngine, ValidationOutcome, Validator, ValidatorConfig, ValidatorError,
    ValidatorRegistry,
};
