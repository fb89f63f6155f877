//! Steps, the run they belong to, and their terminal results.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::normalize::StepOutput;
use crate::guards::{DriftTracker, TaintFlowTracker};
use crate::scan_cache::{ScanCache, ScanCacheConfig, ScanCacheError};
use crate::validation::Decision;

/// Stable error codes carried by [`StepError::code`]. Validation blocks use
/// the blocking decision's own code instead.
pub mod codes {
    pub const PARAM_INVALID: &str = "PARAM_INVALID";
    pub const PRECONDITION_FAILED: &str = "PRECONDITION_FAILED";
    pub const POLICY_DENY: &str = "POLICY_DENY";
    pub const TOOL_NOT_FOUND: &str = "TOOL_NOT_FOUND";
    pub const TOOL_RAISED: &str = "TOOL_RAISED";
}

fn first_attempt() -> u32 {
    1
}

/// One tool call submitted to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

impl Step {
    pub fn new(id: impl Into<String>, tool: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            params,
            meta: Map::new(),
            attempt: 1,
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// Run-wide state shared by every step of one session.
///
/// The descriptive fields are fixed at construction. The scan cache and the
/// taint/drift trackers belong to this run alone and are never shared with
/// another run.
#[derive(Debug)]
pub struct RunContext {
    run_id: String,
    sandbox_root: Option<PathBuf>,
    tags: BTreeMap<String, String>,
    scan_cache: Arc<ScanCache>,
    taint: Arc<TaintFlowTracker>,
    drift: Arc<DriftTracker>,
}

impl RunContext {
    /// A run with the default taint flow depth. Use
    /// [`Executor::start_run`](super::Executor::start_run) to follow the
    /// executor's guard configuration instead.
    pub fn new(run_id: impl Into<String>) -> Result<Self, ScanCacheError> {
        Self::with_cache_config(run_id, ScanCacheConfig::default())
    }

    /// A run with a fresh random id.
    pub fn generate() -> Result<Self, ScanCacheError> {
        Self::new(format!("run-{}", uuid::Uuid::new_v4()))
    }

    pub fn with_cache_config(
        run_id: impl Into<String>,
        config: ScanCacheConfig,
    ) -> Result<Self, ScanCacheError> {
        let run_id = run_id.into();
        let cache = ScanCache::with_config(run_id.clone(), config)?;
        Ok(Self::build(run_id, cache))
    }

    fn build(run_id: String, cache: ScanCache) -> Self {
        Self {
            run_id,
            sandbox_root: None,
            tags: BTreeMap::new(),
            scan_cache: Arc::new(cache),
            taint: Arc::new(TaintFlowTracker::default()),
            drift: Arc::new(DriftTracker::new()),
        }
    }

    pub fn with_sandbox_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sandbox_root = Some(root.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_taint_tracker(mut self, tracker: TaintFlowTracker) -> Self {
        self.taint = Arc::new(tracker);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn sandbox_root(&self) -> Option<&Path> {
        self.sandbox_root.as_deref()
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn scan_cache(&self) -> &Arc<ScanCache> {
        &self.scan_cache
    }

    pub fn taint(&self) -> &Arc<TaintFlowTracker> {
        &self.taint
    }

    pub fn drift(&self) -> &Arc<DriftTracker> {
        &self.drift
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Ok,
    Blocked,
    Fail,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Ok => "OK",
            StepStatus::Blocked => "BLOCKED",
            StepStatus::Fail => "FAIL",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a step did not finish OK. `detail` holds enough evidence to write a
/// policy rule without re-running the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub detail: Map<String, Value>,
}

impl StepError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            detail: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }
}

/// Exactly one per step attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub tool: String,
    pub status: StepStatus,
    pub output: Option<StepOutput>,
    pub error: Option<StepError>,
    /// Monotonic duration of the whole pipeline for this step.
    pub duration_ms: u64,
    /// Wall-clock start, for display only.
    pub started_at: DateTime<Utc>,
    pub attempt: u32,
    /// Post-enforcement validation decisions, including warnings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions: Vec<Decision>,
}

impl StepResult {
    pub fn is_ok(&self) -> bool {
        self.status == StepStatus::Ok
    }

    pub fn is_blocked(&self) -> bool {
        self.status == StepStatus::Blocked
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_deserializes_with_defaults() {
        let step: Step = serde_json::from_value(json!({"id": "s1", "tool": "read_file"})).unwrap();
        assert_eq!(step.attempt, 1);
        assert!(step.params.is_empty());
    }

    #[test]
    fn test_run_context_requires_run_id() {
        assert_eq!(RunContext::new("").unwrap_err(), ScanCacheError::EmptyRunId);
        let run = RunContext::new("r1").unwrap().with_tag("agent", "demo");
        assert_eq!(run.scan_cache().run_id(), "r1");
        assert_eq!(run.tags()["agent"], "demo");
    }

    #[test]
    fn test_generated_runs_are_distinct() {
        let a = RunContext::generate().unwrap();
        let b = RunContext::generate().unwrap();
        assert_ne!(a.run_id(), b.run_id());
        assert!(a.run_id().starts_with("run-"));
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(serde_json::to_value(StepStatus::Blocked).unwrap(), json!("BLOCKED"));
    }
}
