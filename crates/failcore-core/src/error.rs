//! Crate-level error taxonomy for FailCore.
//!
//! Each subsystem owns its error enum; [`FailCoreError`] aggregates them for
//! call-sites that cross module boundaries, such as
//! [`crate::Executor::start_run`], which builds a run from the executor's
//! guard configuration.

use crate::executor::{BridgeError, ToolRegistryError};
use crate::guards::GuardError;
use crate::rules::RuleError;
use crate::scan_cache::ScanCacheError;
use crate::validation::{PolicyError, ValidatorError};

/// FailCore errors.
#[derive(Debug, thiserror::Error)]
pub enum FailCoreError {
    #[error("rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("scan cache error: {0}")]
    ScanCache(#[from] ScanCacheError),

    #[error("guard error: {0}")]
    Guard(#[from] GuardError),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("validator error: {0}")]
    Validator(#[from] ValidatorError),

    #[error("tool registry error: {0}")]
    ToolRegistry(#[from] ToolRegistryError),

    #[error("async bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for FailCore operations.
pub type Result<T> = std::result::Result<T, FailCoreError>;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_cache_error_display() {
        let err = FailCoreError::from(ScanCacheError::EmptyRunId);
        assert!(err.to_string().contains("scan cache error"));
        assert!(err.to_string().contains("run_id"));
    }

    #[test]
    fn test_duplicate_tool_propagates_with_question_mark() {
        use crate::{ToolOutput, ToolRegistry};
        use serde_json::{Map, Value};

        fn echo(_: &Map<String, Value>) -> anyhow::Result<ToolOutput> {
            Ok("ok".into())
        }

        fn register_twice() -> Result<()> {
            let mut tools = ToolRegistry::new();
            tools.register("echo", echo)?;
            tools.register("echo", echo)?;
            Ok(())
        }

        let err = register_twice().unwrap_err();
        assert!(matches!(err, FailCoreError::ToolRegistry(_)));
        assert!(err.to_string().contains("echo"));
    }

    #[test]
    fn test_rule_error_converts() {
        let err = FailCoreError::from(RuleError::RuleSetNotFound("dlp".to_string()));
        assert!(err.to_string().contains("dlp"));
    }
}
