//! Trace events and recorders.
//!
//! Every step produces a `STEP_START` and then exactly one of `STEP_OK` or
//! `STEP_FAIL` (BLOCKED steps are `STEP_FAIL` with `status = BLOCKED`).
//! Params and outputs are recorded as bounded summaries, never in full.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::step::{RunContext, Step, StepStatus};
use crate::digest::{canonical_json, sha256_hex};

const MAX_STRING_CHARS: usize = 256;
const MAX_ENTRIES: usize = 20;
const MAX_DEPTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceEventType {
    StepStart,
    StepOk,
    StepFail,
}

impl TraceEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            TraceEventType::StepStart => "STEP_START",
            TraceEventType::StepOk => "STEP_OK",
            TraceEventType::StepFail => "STEP_FAIL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    #[serde(rename = "type")]
    pub event_type: TraceEventType,
    pub ts: DateTime<Utc>,
    pub run_id: String,
    pub step_id: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    /// Set by chaining recorders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl TraceEvent {
    fn base(event_type: TraceEventType, run: &RunContext, step: &Step) -> Self {
        Self {
            event_type,
            ts: Utc::now(),
            run_id: run.run_id().to_string(),
            step_id: step.id.clone(),
            tool: step.tool.clone(),
            params: None,
            output: None,
            status: None,
            error_code: None,
            error_message: None,
            duration_ms: None,
            meta: Map::new(),
            prev_hash: None,
            hash: None,
        }
    }

    pub fn step_start(run: &RunContext, step: &Step) -> Self {
        let mut event = Self::base(TraceEventType::StepStart, run, step);
        event.params = Some(summarize(&Value::Object(step.params.clone())));
        event.meta = step.meta.clone();
        event
    }

    pub fn step_ok(run: &RunContext, step: &Step, output: &Value, duration_ms: u64) -> Self {
        let mut event = Self::base(TraceEventType::StepOk, run, step);
        event.status = Some(StepStatus::Ok);
        event.output = Some(summarize(output));
        event.duration_ms = Some(duration_ms);
        event
    }

    pub fn step_fail(
        run: &RunContext,
        step: &Step,
        status: StepStatus,
        code: &str,
        message: &str,
        duration_ms: u64,
    ) -> Self {
        let mut event = Self::base(TraceEventType::StepFail, run, step);
        event.status = Some(status);
        event.error_code = Some(code.to_string());
        event.error_message = Some(summarize_str(message));
        event.duration_ms = Some(duration_ms);
        event
    }

    /// Hash over the canonical event with `hash` cleared.
    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        let mut unhashed = self.clone();
        unhashed.hash = None;
        let rendered = canonical_json(&serde_json::to_value(&unhashed)?)?;
        Ok(sha256_hex(rendered.as_bytes()))
    }
}

/// Bounded copy of a value for traces: long strings are cut with a
/// `+N chars` marker and collections keep their first 20 entries plus a
/// `+N more` marker.
pub fn summarize(value: &Value) -> Value {
    summarize_at(value, 0)
}

/// Cap a string at `MAX_STRING_CHARS`, noting how much was cut.
fn summarize_str(s: &str) -> String {
    let total = s.chars().count();
    if total <= MAX_STRING_CHARS {
        return s.to_string();
    }
    let head: String = s.chars().take(MAX_STRING_CHARS).collect();
    format!("{head}...(+{} chars)", total - MAX_STRING_CHARS)
}

fn summarize_at(value: &Value, depth: usize) -> Value {
    match value {
        Value::String(s) => Value::String(summarize_str(s)),
        Value::Array(_) | Value::Object(_) if depth >= MAX_DEPTH => Value::String("...".into()),
        Value::Array(items) => {
            let mut out: Vec<Value> = items
                .iter()
                .take(MAX_ENTRIES)
                .map(|v| summarize_at(v, depth + 1))
                .collect();
            if items.len() > MAX_ENTRIES {
                out.push(Value::String(format!("+{} more", items.len() - MAX_ENTRIES)));
            }
            Value::Array(out)
        }
        Value::Object(map) => {
            let mut out: Map<String, Value> = map
                .iter()
                .take(MAX_ENTRIES)
                .map(|(k, v)| (k.clone(), summarize_at(v, depth + 1)))
                .collect();
            if map.len() > MAX_ENTRIES {
                out.insert(
                    "...".to_string(),
                    Value::String(format!("+{} more", map.len() - MAX_ENTRIES)),
                );
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Trace sink. Errors are reported by the executor and never abort a step.
pub trait TraceRecorder: Send + Sync {
    fn record(&self, event: &TraceEvent) -> anyhow::Result<()>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecorder;

impl TraceRecorder for NullRecorder {
    fn record(&self, _event: &TraceEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Forwards events to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl TraceRecorder for TracingRecorder {
    fn record(&self, event: &TraceEvent) -> anyhow::Result<()> {
        tracing::info!(
            event = "trace.recorded",
            trace_type = event.event_type.as_str(),
            run_id = %event.run_id,
            step_id = %event.step_id,
            tool = %event.tool,
            status = event.status.map(StepStatus::as_str).unwrap_or(""),
            error_code = event.error_code.as_deref().unwrap_or(""),
            duration_ms = event.duration_ms.unwrap_or(0),
        );
        Ok(())
    }
}

/// Position where [`MemoryTraceRecorder::verify_chain`] found a mismatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("trace chain broken at event {index}")]
pub struct ChainBroken {
    pub index: usize,
}

/// Keeps events in memory, chaining each to its predecessor by hash.
#[derive(Debug, Default)]
pub struct MemoryTraceRecorder {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemoryTraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TraceEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.lock().clone()
    }

    pub fn events_for_step(&self, step_id: &str) -> Vec<TraceEvent> {
        self.lock()
            .iter()
            .filter(|e| e.step_id == step_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Recompute every hash and check each `prev_hash` link.
    pub fn verify_chain(&self) -> Result<(), ChainBroken> {
        let events = self.lock();
        let mut prev: Option<&str> = None;
        for (index, event) in events.iter().enumerate() {
            let recomputed = event.compute_hash().ok();
            if event.prev_hash.as_deref() != prev || recomputed.as_deref() != event.hash.as_deref()
            {
                return Err(ChainBroken { index });
            }
            prev = event.hash.as_deref();
        }
        Ok(())
    }

    #[cfg(test)]
    fn tamper(&self, index: usize, f: impl FnOnce(&mut TraceEvent)) {
        if let Some(event) = self.lock().get_mut(index) {
            f(event);
        }
    }
}

impl TraceRecorder for MemoryTraceRecorder {
    fn record(&self, event: &TraceEvent) -> anyhow::Result<()> {
        let mut events = self.lock();
        let mut chained = event.clone();
        chained.prev_hash = events.last().and_then(|e| e.hash.clone());
        chained.hash = None;
        chained.hash = Some(chained.compute_hash()?);
        events.push(chained);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixtures() -> (RunContext, Step) {
        let run = RunContext::new("r1").unwrap();
        let step = Step::new("s1", "read_file", json!({"path": "a"}).as_object().cloned().unwrap());
        (run, step)
    }

    #[test]
    fn test_summarize_caps_strings_and_collections() {
        let long = "x".repeat(300);
        let out = summarize(&json!({"s": long, "list": (0..25).collect::<Vec<_>>()}));
        assert_eq!(out["s"].as_str().unwrap().len(), 256 + "...(+44 chars)".len());
        assert!(out["s"].as_str().unwrap().ends_with("(+44 chars)"));
        let list = out["list"].as_array().unwrap();
        assert_eq!(list.len(), 21);
        assert_eq!(list[20], json!("+5 more"));
    }

    #[test]
    fn test_step_fail_caps_error_message() {
        let (run, step) = fixtures();
        let message = "e".repeat(1000);
        let event = TraceEvent::step_fail(
            &run,
            &step,
            StepStatus::Fail,
            crate::executor::codes::TOOL_RAISED,
            &message,
            3,
        );
        let recorded = event.error_message.unwrap();
        assert!(recorded.starts_with(&"e".repeat(256)));
        assert!(recorded.ends_with("...(+744 chars)"));
        assert_eq!(recorded.chars().count(), 256 + "...(+744 chars)".len());

        let short = TraceEvent::step_fail(&run, &step, StepStatus::Blocked, "X", "denied", 0);
        assert_eq!(short.error_message.as_deref(), Some("denied"));
    }

    #[test]
    fn test_event_serializes_type_field() {
        let (run, step) = fixtures();
        let value = serde_json::to_value(TraceEvent::step_start(&run, &step)).unwrap();
        assert_eq!(value["type"], "STEP_START");
        assert_eq!(value["params"]["path"], "a");
        assert!(value.get("status").is_none());
    }

    #[test]
    fn test_memory_recorder_chains_and_detects_tampering() {
        let (run, step) = fixtures();
        let recorder = MemoryTraceRecorder::new();
        recorder.record(&TraceEvent::step_start(&run, &step)).unwrap();
        recorder
            .record(&TraceEvent::step_ok(&run, &step, &json!("done"), 3))
            .unwrap();

        let events = recorder.events();
        assert_eq!(events[0].prev_hash, None);
        assert_eq!(events[1].prev_hash, events[0].hash);
        assert!(recorder.verify_chain().is_ok());

        recorder.tamper(1, |e| e.output = Some(json!("forged")));
        assert_eq!(recorder.verify_chain(), Err(ChainBroken { index: 1 }));
    }
}
