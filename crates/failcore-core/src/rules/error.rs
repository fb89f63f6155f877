//! Error types for the rules module.

use std::path::PathBuf;

/// Errors produced while building, loading or evaluating rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("invalid rule '{rule_id}': {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("invalid regex in rule '{rule_id}': {source}")]
    InvalidRegex {
        rule_id: String,
        #[source]
        source: regex::Error,
    },

    #[error("ruleset not found: {0}")]
    RuleSetNotFound(String),

    #[error("failed to parse ruleset '{name}': {reason}")]
    Parse { name: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rule registry lock poisoned")]
    LockPoisoned,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for rule operations.
pub type RuleResult<T> = std::result::Result<T, RuleError>;
