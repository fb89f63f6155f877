//! DLP: secrets, credentials and PII in payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{domain_categories, payload_params, render_payload, EngineMode, GuardError};
use crate::rules::{GuardDomain, RuleAction, RuleEngine, RuleEngineResult, RuleError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DlpConfig {
    pub enabled: bool,
    pub ruleset: String,
    /// Payload text beyond this many characters is not scanned.
    pub max_scan_chars: usize,
}

impl Default for DlpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ruleset: crate::rules::builtin::DLP.to_string(),
            max_scan_chars: 65_536,
        }
    }
}

/// Result of one DLP scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlpScanResult {
    #[serde(flatten)]
    pub result: RuleEngineResult,
    pub scanned_chars: usize,
    /// The payload exceeded `max_scan_chars` and its tail was not scanned.
    pub truncated: bool,
}

impl DlpScanResult {
    pub fn disabled() -> Self {
        Self {
            result: RuleEngineResult::disabled(),
            scanned_chars: 0,
            truncated: false,
        }
    }

    /// A finding whose action is Warn or Block.
    pub fn is_violation(&self) -> bool {
        matches!(self.result.action, RuleAction::Warn | RuleAction::Block)
    }
}

/// Text with matches replaced by `[REDACTED:<CATEGORY>]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlpRedaction {
    pub text: String,
    pub rule_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DlpEngine {
    rules: RuleEngine,
    max_scan_chars: usize,
}

impl DlpEngine {
    pub fn new(rules: RuleEngine, config: &DlpConfig) -> Self {
        Self {
            rules,
            max_scan_chars: config.max_scan_chars,
        }
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn scan(&self, payload: &Value) -> Result<DlpScanResult, GuardError> {
        let rendered = render_payload(payload);
        let (text, truncated) = truncate_chars(&rendered, self.max_scan_chars);
        let params = payload_params(payload);
        let result = self
            .rules
            .evaluate_text(
                "dlp.scan",
                &params,
                text,
                None,
                Some(domain_categories(GuardDomain::Dlp)),
                None,
            )
            .map_err(|source| GuardError::Rule {
                domain: GuardDomain::Dlp,
                source,
            })?;
        if truncated {
            tracing::debug!(
                event = "dlp.scan_truncated",
                total_chars = rendered.chars().count(),
                max_scan_chars = self.max_scan_chars,
            );
        }
        Ok(DlpScanResult {
            result,
            scanned_chars: text.chars().count(),
            truncated,
        })
    }

    /// Replace every regex DLP match in `text`.
    pub fn redact(&self, text: &str) -> Result<DlpRedaction, GuardError> {
        let registry = self.rules.registry().read().map_err(|_| GuardError::Rule {
            domain: GuardDomain::Dlp,
            source: RuleError::LockPoisoned,
        })?;

        let mut out = text.to_string();
        let mut rule_ids = Vec::new();
        for rule in registry.select(Some(domain_categories(GuardDomain::Dlp)), None) {
            let marker = format!("[REDACTED:{}]", rule.category.short_name());
            for pattern in &rule.patterns {
                if let Some(replaced) = pattern.redact(&out, &marker) {
                    out = replaced;
                    if !rule_ids.contains(&rule.rule_id) {
                        rule_ids.push(rule.rule_id.clone());
                    }
                }
            }
        }
        Ok(DlpRedaction {
            text: out,
            rule_ids,
        })
    }
}

/// DLP domain, fixed at startup.
#[derive(Debug, Clone)]
pub enum DlpGuard {
    Real(DlpEngine),
    NoOp,
}

impl DlpGuard {
    pub fn mode(&self) -> EngineMode {
        match self {
            DlpGuard::Real(_) => EngineMode::Real,
            DlpGuard::NoOp => EngineMode::NoOp,
        }
    }

    pub fn rule_count(&self) -> usize {
        match self {
            DlpGuard::Real(engine) => engine.rules.enabled_rule_count(),
            DlpGuard::NoOp => 0,
        }
    }

    pub fn scan(&self, payload: &Value) -> Result<DlpScanResult, GuardError> {
        match self {
            DlpGuard::Real(engine) => engine.scan(payload),
            DlpGuard::NoOp => Ok(DlpScanResult::disabled()),
        }
    }

    pub fn redact(&self, text: &str) -> Result<DlpRedaction, GuardError> {
        match self {
            DlpGuard::Real(engine) => engine.redact(text),
            DlpGuard::NoOp => Ok(DlpRedaction {
                text: text.to_string(),
                rule_ids: Vec::new(),
            }),
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}
