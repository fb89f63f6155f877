//! Structured observability hooks for FailCore step and run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Emission functions for step start/finish, validator decisions, cache
//!   evictions and rule load diagnostics
//!
//! Events carry a stable `event` field so log pipelines can filter on it.
//! Use [`crate::telemetry::init_tracing`] with `json = true` for JSON lines.

use tracing::{debug, info, warn};

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("run-12345");
/// // every step event logged now carries run_id = "run-12345"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run_id.
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("failcore.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a step entered the pipeline.
pub fn emit_step_started(run_id: &str, step_id: &str, tool: &str) {
    info!(event = "step.started", run_id = %run_id, step_id = %step_id, tool = %tool);
}

/// Emit event: a step reached a terminal status.
///
/// ```ignore
/// emit_step_finished("run-1", "s1", "write_file", "BLOCKED", Some("PATH_TRAVERSAL"), 3);
/// // logs: event=step.finished ... status=BLOCKED error_code=PATH_TRAVERSAL
/// ```
pub fn emit_step_finished(
    run_id: &str,
    step_id: &str,
    tool: &str,
    status: &str,
    error_code: Option<&str>,
    duration_ms: u64,
) {
    info!(
        event = "step.finished",
        run_id = %run_id,
        step_id = %step_id,
        tool = %tool,
        status = %status,
        error_code = error_code.unwrap_or(""),
        duration_ms = duration_ms,
    );
}

/// Emit event: one validator decision after enforcement resolution.
pub fn emit_decision(validator_id: &str, code: &str, outcome: &str, enforcement: &str) {
    if outcome == "ALLOW" {
        debug!(
            event = "validation.decision",
            validator_id = %validator_id,
            code = %code,
            outcome = %outcome,
            enforcement = %enforcement,
        );
    } else {
        info!(
            event = "validation.decision",
            validator_id = %validator_id,
            code = %code,
            outcome = %outcome,
            enforcement = %enforcement,
        );
    }
}

/// Emit event: a validator failed or panicked and produced no decision.
pub fn emit_validator_error(validator_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "validation.validator_error", validator_id = %validator_id, error = %error);
}

/// Emit event: the scan cache evicted its least recently used entry.
pub fn emit_cache_eviction(run_id: &str, fingerprint: &str, scanner_id: &str) {
    debug!(
        event = "scan_cache.evicted",
        run_id = %run_id,
        fingerprint = %fingerprint,
        scanner_id = %scanner_id,
    );
}

/// Emit event: a malformed rule was skipped while compiling a ruleset.
pub fn emit_rule_skipped(ruleset: &str, rule_id: Option<&str>, error: &dyn std::fmt::Display) {
    warn!(
        event = "rules.rule_skipped",
        ruleset = %ruleset,
        rule_id = rule_id.unwrap_or("<unknown>"),
        error = %error,
    );
}

/// Emit event: the trace recorder failed; execution continues.
pub fn emit_recorder_error(step_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "trace.recorder_error", step_id = %step_id, error = %error);
}
