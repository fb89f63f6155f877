//! Step executor.
//!
//! One [`Executor::execute`] call owns a step end to end:
//!
//! 1. `STEP_START` is recorded (recorder failures are logged, never fatal)
//! 2. shape check: `FAIL / PARAM_INVALID`
//! 3. preconditions in registration order: `BLOCKED / PRECONDITION_FAILED`
//! 4. validation under the configured [`Policy`]: `BLOCKED / <decision code>`
//! 5. optional [`StepPolicy`] gate: `BLOCKED / POLICY_DENY`
//! 6. dispatch: `FAIL / TOOL_NOT_FOUND` or `FAIL / TOOL_RAISED`
//! 7. normalization, taint bookkeeping and the terminal trace event
//!
//! There are no retries and no dispatch timeout; a hung tool blocks the
//! calling thread.

pub mod bridge;
pub mod gate;
pub mod normalize;
pub mod precondition;
pub mod step;
pub mod tool;
pub mod trace;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use bridge::{bind_run, current_run, BridgeError, RunBinding};
pub use gate::{PolicyVerdict, StepPolicy, ToolPolicyRule, ToolPolicySet};
pub use normalize::{normalize, OutputKind, StepOutput};
pub use precondition::{Precondition, PreconditionFailure, RequiredParams};
pub use step::{codes, RunContext, Step, StepError, StepResult, StepStatus};
pub use tool::{Artifact, Tool, ToolOutput, ToolProvider, ToolRegistry, ToolRegistryError};
pub use trace::{
    summarize, ChainBroken, MemoryTraceRecorder, NullRecorder, TraceEvent, TraceEventType,
    TraceRecorder, TracingRecorder,
};

use crate::error::panic_message;
use crate::guards::GuardSet;
use crate::metrics::ExecutorMetrics;
use crate::validation::{
    Context, Decision, Policy, ValidationEngine, ValidationOutcome, ValidatorRegistry,
};

/// Executor behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Stop evaluating validators after the first surviving block.
    pub strict_mode: bool,
    /// Attach the debug rendering of a tool error (including any captured
    /// backtrace) to `TOOL_RAISED` details.
    pub include_backtrace: bool,
    /// Attach the step's scan cache entries to the terminal trace event.
    pub enrich_scans: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            include_backtrace: false,
            enrich_scans: true,
        }
    }
}

pub struct ExecutorBuilder {
    tools: Arc<dyn ToolProvider>,
    policy: Policy,
    validators: Option<ValidatorRegistry>,
    guards: Arc<GuardSet>,
    preconditions: Vec<Arc<dyn Precondition>>,
    gate: Option<Arc<dyn StepPolicy>>,
    recorder: Arc<dyn TraceRecorder>,
    config: ExecutorConfig,
}

impl ExecutorBuilder {
    pub fn new(tools: impl ToolProvider + 'static) -> Self {
        Self::with_provider(Arc::new(tools))
    }

    pub fn with_provider(tools: Arc<dyn ToolProvider>) -> Self {
        Self {
            tools,
            policy: Policy::empty(),
            validators: None,
            guards: Arc::new(GuardSet::disabled()),
            preconditions: Vec::new(),
            gate: None,
            recorder: Arc::new(NullRecorder),
            config: ExecutorConfig::default(),
        }
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the builtin validator registry.
    pub fn validators(mut self, registry: ValidatorRegistry) -> Self {
        self.validators = Some(registry);
        self
    }

    pub fn guards(mut self, guards: Arc<GuardSet>) -> Self {
        self.guards = guards;
        self
    }

    pub fn precondition(mut self, precondition: impl Precondition + 'static) -> Self {
        self.preconditions.push(Arc::new(precondition));
        self
    }

    pub fn gate(mut self, gate: impl StepPolicy + 'static) -> Self {
        self.gate = Some(Arc::new(gate));
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn TraceRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Executor {
        let registry = self
            .validators
            .unwrap_or_else(|| ValidatorRegistry::builtin(Arc::clone(&self.guards)));
        Executor {
            tools: self.tools,
            policy: self.policy,
            engine: ValidationEngine::new(registry).with_strict_mode(self.config.strict_mode),
            guards: self.guards,
            preconditions: self.preconditions,
            gate: self.gate,
            recorder: self.recorder,
            metrics: ExecutorMetrics::new(),
            config: self.config,
        }
    }
}

pub struct Executor {
    tools: Arc<dyn ToolProvider>,
    policy: Policy,
    engine: ValidationEngine,
    guards: Arc<GuardSet>,
    preconditions: Vec<Arc<dyn Precondition>>,
    gate: Option<Arc<dyn StepPolicy>>,
    recorder: Arc<dyn TraceRecorder>,
    metrics: ExecutorMetrics,
    config: ExecutorConfig,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("policy_version", &self.policy.version)
            .field("validators", &self.engine.registry().ids())
            .field("preconditions", &self.preconditions.len())
            .field("gate", &self.gate.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// Where a step stopped short of OK.
struct Halt {
    status: StepStatus,
    error: StepError,
}

impl Halt {
    fn fail(error: StepError) -> Self {
        Self {
            status: StepStatus::Fail,
            error,
        }
    }

    fn blocked(error: StepError) -> Self {
        Self {
            status: StepStatus::Blocked,
            error,
        }
    }
}

impl Executor {
    pub fn builder(tools: impl ToolProvider + 'static) -> ExecutorBuilder {
        ExecutorBuilder::new(tools)
    }

    pub fn metrics(&self) -> &ExecutorMetrics {
        &self.metrics
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn guards(&self) -> &Arc<GuardSet> {
        &self.guards
    }

    /// A run whose taint tracker follows this executor's configured flow
    /// depth. [`RunContext::new`] alone gets the default depth.
    pub fn start_run(&self, run_id: impl Into<String>) -> crate::Result<RunContext> {
        let run = RunContext::new(run_id)?.with_taint_tracker(self.guards.taint.tracker());
        tracing::debug!(
            event = "run.started",
            run_id = %run.run_id(),
            taint_depth = run.taint().max_depth(),
        );
        Ok(run)
    }

    /// Run one step through the pipeline. Never panics on tool or validator
    /// failure; every outcome is a [`StepResult`].
    pub fn execute(&self, step: &Step, run: &RunContext) -> StepResult {
        let started = Instant::now();
        let started_at = Utc::now();
        self.metrics.inc_started();
        crate::obs::emit_step_started(run.run_id(), &step.id, &step.tool);
        self.record(&step.id, TraceEvent::step_start(run, step));

        let mut decisions = Vec::new();
        let outcome = self.run_pipeline(step, run, &mut decisions);
        let duration_ms = elapsed_ms(started);

        let result = match outcome {
            Ok(output) => StepResult {
                step_id: step.id.clone(),
                tool: step.tool.clone(),
                status: StepStatus::Ok,
                output: Some(output),
                error: None,
                duration_ms,
                started_at,
                attempt: step.attempt,
                decisions,
            },
            Err(halt) => StepResult {
                step_id: step.id.clone(),
                tool: step.tool.clone(),
                status: halt.status,
                output: None,
                error: Some(halt.error),
                duration_ms,
                started_at,
                attempt: step.attempt,
                decisions,
            },
        };

        self.finish(step, run, &result);
        result
    }

    fn run_pipeline(
        &self,
        step: &Step,
        run: &RunContext,
        decisions: &mut Vec<Decision>,
    ) -> Result<StepOutput, Halt> {
        check_shape(step)?;
        self.check_preconditions(step, run)?;

        let validation = self.validate(step, run);
        *decisions = validation.decisions.clone();
        if let Some(halt) = blocked_by(&validation) {
            return Err(halt);
        }

        self.check_gate(step, run)?;

        let output = self.dispatch(step)?;
        self.guards
            .taint
            .observe_output(run.taint(), &step.id, &step.tool, &step.params, &output.value);
        Ok(output)
    }

    fn check_preconditions(&self, step: &Step, run: &RunContext) -> Result<(), Halt> {
        for precondition in &self.preconditions {
            if let Err(failure) = precondition.check(step, run) {
                let mut error = StepError::new(codes::PRECONDITION_FAILED, failure.message)
                    .with_detail("precondition", failure.name);
                error.detail.extend(failure.detail);
                return Err(Halt::blocked(error));
            }
        }
        Ok(())
    }

    fn validate(&self, step: &Step, run: &RunContext) -> ValidationOutcome {
        let mut context = Context::new(step.tool.clone(), step.params.clone(), step.id.clone())
            .with_run_id(run.run_id())
            .with_scan_cache(Arc::clone(run.scan_cache()))
            .with_taint(Arc::clone(run.taint()))
            .with_drift(Arc::clone(run.drift()));
        if let Some(root) = run.sandbox_root() {
            context = context.with_sandbox_root(root);
        }
        self.engine.evaluate(&self.policy, &context)
    }

    fn check_gate(&self, step: &Step, run: &RunContext) -> Result<(), Halt> {
        let Some(gate) = &self.gate else {
            return Ok(());
        };
        match gate.allow(step, run) {
            PolicyVerdict::Allowed => Ok(()),
            PolicyVerdict::Denied { reason } => Err(Halt::blocked(
                StepError::new(codes::POLICY_DENY, reason.clone())
                    .with_detail("reason", reason)
                    .with_detail("approval_required", false),
            )),
            PolicyVerdict::RequiresApproval { reason } => Err(Halt::blocked(
                StepError::new(codes::POLICY_DENY, reason.clone())
                    .with_detail("reason", reason)
                    .with_detail("approval_required", true),
            )),
        }
    }

    fn dispatch(&self, step: &Step) -> Result<StepOutput, Halt> {
        let Some(tool) = self.tools.get(&step.tool) else {
            return Err(Halt::fail(
                StepError::new(
                    codes::TOOL_NOT_FOUND,
                    format!("tool '{}' is not registered", step.tool),
                )
                .with_detail("tool", step.tool.clone()),
            ));
        };

        match catch_unwind(AssertUnwindSafe(|| tool.call(&step.params))) {
            Ok(Ok(output)) => Ok(normalize(output)),
            Ok(Err(err)) => {
                let chain: Vec<String> = err.chain().map(|cause| cause.to_string()).collect();
                let mut error = StepError::new(codes::TOOL_RAISED, err.to_string())
                    .with_detail("error_type", "error")
                    .with_detail("chain", json!(chain));
                if self.config.include_backtrace {
                    error = error.with_detail("debug", format!("{err:?}"));
                }
                Err(Halt::fail(error))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                Err(Halt::fail(
                    StepError::new(codes::TOOL_RAISED, format!("tool panicked: {message}"))
                        .with_detail("error_type", "panic"),
                ))
            }
        }
    }

    fn finish(&self, step: &Step, run: &RunContext, result: &StepResult) {
        let mut event = match (&result.output, &result.error) {
            (Some(output), _) => TraceEvent::step_ok(run, step, &output.value, result.duration_ms),
            (None, Some(error)) => TraceEvent::step_fail(
                run,
                step,
                result.status,
                &error.code,
                &error.message,
                result.duration_ms,
            ),
            (None, None) => TraceEvent::step_fail(
                run,
                step,
                result.status,
                "",
                "",
                result.duration_ms,
            ),
        };
        if let Some(output) = &result.output {
            event.meta.insert("output_kind".into(), json!(output.kind));
        }
        if !result.decisions.is_empty() {
            let codes: Vec<&str> = result.decisions.iter().map(|d| d.code()).collect();
            event.meta.insert("decisions".into(), json!(codes));
        }
        if self.config.enrich_scans {
            let scans: Vec<Value> = run
                .scan_cache()
                .results_for_step(&step.id)
                .into_iter()
                .map(|record| {
                    json!({
                        "scanner_id": record.scanner_id,
                        "fingerprint": record.fingerprint,
                        "results": summarize(&record.results),
                    })
                })
                .collect();
            if !scans.is_empty() {
                event.meta.insert("scans".into(), Value::Array(scans));
            }
        }
        self.record(&step.id, event);

        match result.status {
            StepStatus::Ok => self.metrics.inc_ok(),
            StepStatus::Blocked => self.metrics.inc_blocked(),
            StepStatus::Fail => self.metrics.inc_failed(),
        }
        crate::obs::emit_step_finished(
            run.run_id(),
            &step.id,
            &step.tool,
            result.status.as_str(),
            result.error_code(),
            result.duration_ms,
        );
    }

    fn record(&self, step_id: &str, event: TraceEvent) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.recorder.record(&event)));
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(payload) => format!("recorder panicked: {}", panic_message(payload.as_ref())),
        };
        self.metrics.inc_recorder_errors();
        crate::obs::emit_recorder_error(step_id, &failure);
    }
}

fn check_shape(step: &Step) -> Result<(), Halt> {
    let problem = if step.id.trim().is_empty() {
        Some("step id must be non-empty".to_string())
    } else if step.tool.trim().is_empty() {
        Some("tool name must be non-empty".to_string())
    } else {
        step.params
            .keys()
            .find(|k| k.trim().is_empty())
            .map(|k| format!("param keys must be non-empty (got {k:?})"))
    };
    match problem {
        Some(message) => Err(Halt::fail(StepError::new(codes::PARAM_INVALID, message))),
        None => Ok(()),
    }
}

fn blocked_by(validation: &ValidationOutcome) -> Option<Halt> {
    let decision = validation.blocking_decision()?;
    let mut error = StepError::new(decision.code(), decision.message())
        .with_detail("validator_id", decision.validator_id())
        .with_detail("risk_level", json!(decision.risk_level()))
        .with_detail("evidence", Value::Object(decision.evidence().clone()));
    if let Some(rule_id) = decision.rule_id() {
        error = error.with_detail("rule_id", rule_id);
    }
    if let Some(remediation) = decision.remediation() {
        error = error.with_detail("remediation", remediation);
    }
    Some(Halt::blocked(error))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn echo_registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools
            .register("echo", |p: &Map<String, Value>| -> anyhow::Result<ToolOutput> {
                Ok(ToolOutput::Value(Value::Object(p.clone())))
            })
            .unwrap();
        tools
    }

    #[test]
    fn test_shape_check_rejects_blank_keys() {
        let executor = Executor::builder(echo_registry()).build();
        let run = RunContext::new("r1").unwrap();
        let step = Step::new("s1", "echo", params(json!({" ": 1})));
        let result = executor.execute(&step, &run);
        assert_eq!(result.status, StepStatus::Fail);
        assert_eq!(result.error_code(), Some(codes::PARAM_INVALID));

        let result = executor.execute(&Step::new("", "echo", Map::new()), &run);
        assert_eq!(result.error_code(), Some(codes::PARAM_INVALID));
    }

    #[test]
    fn test_precondition_blocks_with_detail() {
        let executor = Executor::builder(echo_registry())
            .precondition(RequiredParams::new(["path"]))
            .build();
        let run = RunContext::new("r1").unwrap();
        let result = executor.execute(&Step::new("s1", "echo", Map::new()), &run);
        assert!(result.is_blocked());
        let error = result.error.unwrap();
        assert_eq!(error.code, codes::PRECONDITION_FAILED);
        assert_eq!(error.detail["precondition"], "required_params");
        assert_eq!(error.detail["missing"], json!(["path"]));
    }

    #[test]
    fn test_gate_requires_approval_is_denied() {
        let gate = ToolPolicySet::allow_all().with_rule(ToolPolicyRule::RequireApproval {
            tool: "echo".into(),
            reason: "needs a human".into(),
        });
        let executor = Executor::builder(echo_registry()).gate(gate).build();
        let run = RunContext::new("r1").unwrap();
        let result = executor.execute(&Step::new("s1", "echo", Map::new()), &run);
        assert!(result.is_blocked());
        let error = result.error.unwrap();
        assert_eq!(error.code, codes::POLICY_DENY);
        assert_eq!(error.detail["approval_required"], true);
    }

    #[test]
    fn test_ok_path_counts_metrics() {
        let executor = Executor::builder(echo_registry()).build();
        let run = RunContext::new("r1").unwrap();
        let result = executor.execute(&Step::new("s1", "echo", params(json!({"a": 1}))), &run);
        assert!(result.is_ok());
        assert_eq!(result.output.unwrap().kind, OutputKind::Json);
        let snapshot = executor.metrics().snapshot();
        assert_eq!(snapshot.steps_started, 1);
        assert_eq!(snapshot.steps_ok, 1);
    }

    #[test]
    fn test_include_backtrace_adds_debug_detail() {
        let mut tools = ToolRegistry::new();
        tools
            .register("fails", |_: &Map<String, Value>| -> anyhow::Result<ToolOutput> {
                Err(anyhow::anyhow!("disk full").context("write failed"))
            })
            .unwrap();
        let executor = Executor::builder(tools)
            .config(ExecutorConfig {
                include_backtrace: true,
                ..ExecutorConfig::default()
            })
            .build();
        let run = RunContext::new("r1").unwrap();
        let error = executor
            .execute(&Step::new("s1", "fails", Map::new()), &run)
            .error
            .unwrap();
        assert_eq!(error.code, codes::TOOL_RAISED);
        assert_eq!(error.message, "write failed");
        assert_eq!(error.detail["chain"], json!(["write failed", "disk full"]));
        assert!(error.detail.contains_key("debug"));
    }
}
