//! Scanner functions: the only code that writes to a run's [`ScanCache`].
//!
//! Each scanner looks up `(payload, scanner_id)` first and only runs its guard
//! on a miss, so validators and enrichers that ask about the same payload see
//! one result per run. Neither a disabled guard nor a fail-open result is
//! cached, so a transient engine failure is retried on the next scan.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::{DlpGuard, DlpScanResult, GuardError, SemanticGuard, TaintGuard};
use crate::rules::{RuleContext, RuleEngineResult};
use crate::scan_cache::ScanCache;

pub const DLP_SCANNER: &str = "dlp";
pub const SEMANTIC_SCANNER: &str = "semantic";
pub const TAINT_SCANNER: &str = "taint";

/// Scan results that may be unfit for reuse.
trait ScanOutcome {
    fn failed_open(&self) -> bool;
}

impl ScanOutcome for RuleEngineResult {
    fn failed_open(&self) -> bool {
        self.failed_open
    }
}

impl ScanOutcome for DlpScanResult {
    fn failed_open(&self) -> bool {
        self.result.failed_open
    }
}

fn cached<T, S, E>(
    cache: Option<&ScanCache>,
    payload: &Value,
    scanner_id: &str,
    step_id: Option<&str>,
    scan: S,
    evidence: E,
) -> Result<T, GuardError>
where
    T: Serialize + DeserializeOwned + ScanOutcome,
    S: FnOnce() -> Result<T, GuardError>,
    E: FnOnce(&T) -> Value,
{
    let Some(cache) = cache else {
        return scan();
    };

    if let Some(record) = cache.get_result(payload, scanner_id) {
        match serde_json::from_value::<T>(record.results) {
            Ok(result) => {
                if let Some(step_id) = step_id {
                    cache.link_step(payload, scanner_id, step_id);
                }
                tracing::trace!(event = "scan_cache.hit", scanner = %scanner_id);
                return Ok(result);
            }
            Err(err) => {
                tracing::warn!(
                    event = "scan_cache.decode_failed",
                    scanner = %scanner_id,
                    error = %err,
                );
            }
        }
    }

    let result = scan()?;
    if result.failed_open() {
        tracing::debug!(event = "scan_cache.skip_failed_open", scanner = %scanner_id);
        return Ok(result);
    }
    match serde_json::to_value(&result) {
        Ok(results) => {
            cache.store_result(payload, scanner_id, results, Some(evidence(&result)), step_id);
        }
        Err(err) => {
            tracing::warn!(event = "scan_cache.encode_failed", scanner = %scanner_id, error = %err);
        }
    }
    Ok(result)
}

fn rule_evidence(result: &RuleEngineResult) -> Value {
    json!({
        "action": result.action,
        "rule_ids": result.rule_ids(),
        "highest_severity": result.highest_severity,
    })
}

/// DLP scan of `payload`, memoized in `cache`.
pub fn scan_dlp(
    guard: &DlpGuard,
    cache: Option<&ScanCache>,
    payload: &Value,
    step_id: Option<&str>,
) -> Result<DlpScanResult, GuardError> {
    if let DlpGuard::NoOp = guard {
        return Ok(DlpScanResult::disabled());
    }
    cached(
        cache,
        payload,
        DLP_SCANNER,
        step_id,
        || guard.scan(payload),
        |r| {
            let mut evidence = rule_evidence(&r.result);
            evidence["truncated"] = json!(r.truncated);
            evidence
        },
    )
}

/// Semantic check of one tool call, memoized in `cache`.
pub fn scan_semantic(
    guard: &SemanticGuard,
    cache: Option<&ScanCache>,
    tool: &str,
    params: &Map<String, Value>,
    context: Option<&RuleContext>,
    step_id: Option<&str>,
) -> Result<RuleEngineResult, GuardError> {
    if let SemanticGuard::NoOp = guard {
        return Ok(RuleEngineResult::disabled());
    }
    let payload = json!({ "tool": tool, "params": params });
    cached(
        cache,
        &payload,
        SEMANTIC_SCANNER,
        step_id,
        || guard.check(tool, params, context),
        rule_evidence,
    )
}

/// Taint-source content scan of `payload`, memoized in `cache`.
pub fn scan_taint(
    guard: &TaintGuard,
    cache: Option<&ScanCache>,
    payload: &Value,
    step_id: Option<&str>,
) -> Result<RuleEngineResult, GuardError> {
    if let TaintGuard::NoOp = guard {
        return Ok(RuleEngineResult::disabled());
    }
    cached(
        cache,
        payload,
        TAINT_SCANNER,
        step_id,
        || guard.scan_content(payload),
        rule_evidence,
    )
}
