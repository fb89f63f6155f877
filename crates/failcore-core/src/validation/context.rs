//! Per-evaluation input handed to validators.
//!
//! Collaborators a validator may need (the run's scan cache, taint and drift
//! trackers, the sandbox root) are explicit typed fields; a validator that
//! needs one and finds `None` simply has nothing to check.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::guards::{DriftTracker, TaintFlowTracker};
use crate::rules::RuleContext;
use crate::scan_cache::ScanCache;

#[derive(Debug, Clone)]
pub struct Context {
    pub tool: String,
    pub params: Map<String, Value>,
    pub step_id: String,
    pub run_id: Option<String>,
    pub sandbox_root: Option<PathBuf>,
    pub scan_cache: Option<Arc<ScanCache>>,
    pub taint: Option<Arc<TaintFlowTracker>>,
    pub drift: Option<Arc<DriftTracker>>,
}

impl Context {
    pub fn new(
        tool: impl Into<String>,
        params: Map<String, Value>,
        step_id: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            params,
            step_id: step_id.into(),
            run_id: None,
            sandbox_root: None,
            scan_cache: None,
            taint: None,
            drift: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_sandbox_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sandbox_root = Some(root.into());
        self
    }

    pub fn with_scan_cache(mut self, cache: Arc<ScanCache>) -> Self {
        self.scan_cache = Some(cache);
        self
    }

    pub fn with_taint(mut self, tracker: Arc<TaintFlowTracker>) -> Self {
        self.taint = Some(tracker);
        self
    }

    pub fn with_drift(mut self, tracker: Arc<DriftTracker>) -> Self {
        self.drift = Some(tracker);
        self
    }

    pub fn scan_cache(&self) -> Option<&ScanCache> {
        self.scan_cache.as_deref()
    }

    pub fn sandbox_root(&self) -> Option<&Path> {
        self.sandbox_root.as_deref()
    }

    /// Params as one JSON value (the payload scanners fingerprint).
    pub fn params_value(&self) -> Value {
        Value::Object(self.params.clone())
    }

    pub fn rule_context(&self) -> RuleContext {
        RuleContext {
            run_id: self.run_id.clone(),
            step_id: Some(self.step_id.clone()),
            extra: Map::new(),
        }
    }
}
