//! Rulesets shipped with the crate.
//!
//! Rule ids are stable: decisions and traces reference them, and local YAML
//! rulesets override them by id.

use super::error::RuleResult;
use super::model::{
    PatternDefinition as P, RuleAction, RuleCategory as C, RuleDefinition, RuleSetDefinition,
    Severity as S,
};

pub const DLP: &str = "dlp";
pub const SEMANTIC: &str = "semantic";
pub const TAINT: &str = "taint";
pub const DRIFT: &str = "drift";

/// Names served by [`super::BuiltinLoader`].
pub const NAMES: &[&str] = &[DLP, SEMANTIC, TAINT, DRIFT];

const VERSION: &str = "1.0.0";

/// Builtin definition by name.
pub fn definition(name: &str) -> RuleResult<Option<RuleSetDefinition>> {
    let rules = match name {
        DLP => dlp_rules(),
        SEMANTIC => semantic_rules(),
        TAINT => taint_rules(),
        DRIFT => drift_rules(),
        _ => return Ok(None),
    };
    let mut def = RuleSetDefinition::new(name, VERSION);
    def.description = format!("builtin {name} rules");
    for rule in rules {
        def = def.with_rule(rule)?;
    }
    Ok(Some(def))
}

fn dlp_rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition::new(
            "DLP_AWS_ACCESS_KEY",
            C::DlpApiKey,
            S::Critical,
            vec![P::regex(r"\b(AKIA|ASIA)[0-9A-Z]{16}\b")],
        )
        .named("AWS access key id"),
        RuleDefinition::new(
            "DLP_OPENAI_KEY",
            C::DlpApiKey,
            S::Critical,
            vec![P::regex(r"\bsk-(proj-)?[A-Za-z0-9_-]{20,}")],
        )
        .named("OpenAI-style secret key"),
        RuleDefinition::new(
            "DLP_GITHUB_TOKEN",
            C::DlpApiKey,
            S::High,
            vec![P::regex(r"\bgh[pousr]_[A-Za-z0-9]{36,}\b")],
        )
        .named("GitHub token"),
        RuleDefinition::new(
            "DLP_GENERIC_API_KEY",
            C::DlpApiKey,
            S::Medium,
            vec![P::regex(r#"(api[_-]?key|apikey)"?\s*[:=]\s*"?[A-Za-z0-9_\-]{16,}"#).with_flags("i")],
        )
        .named("Generic API key assignment")
        .with_false_positive_rate(0.1),
        RuleDefinition::new(
            "DLP_PRIVATE_KEY",
            C::DlpPrivateKey,
            S::Critical,
            vec![P::regex(r"-----BEGIN ([A-Z]+ )?PRIVATE KEY-----")],
        )
        .named("PEM private key"),
        RuleDefinition::new(
            "DLP_JWT",
            C::DlpSecretToken,
            S::High,
            vec![P::regex(
                r"\beyJ[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}",
            )],
        )
        .named("JSON web token")
        .with_false_positive_rate(0.05),
        RuleDefinition::new(
            "DLP_SLACK_TOKEN",
            C::DlpSecretToken,
            S::High,
            vec![P::regex(r"\bxox[baprs]-[A-Za-z0-9-]{10,}")],
        )
        .named("Slack token"),
        RuleDefinition::new(
            "DLP_PASSWORD_ASSIGNMENT",
            C::DlpSecretToken,
            S::Medium,
            vec![P::regex(r#"(password|passwd|pwd)"?\s*[:=]\s*"?[^"\s]{6,}"#).with_flags("i")],
        )
        .named("Password assignment")
        .with_false_positive_rate(0.15),
        RuleDefinition::new(
            "DLP_EMAIL_ADDRESS",
            C::DlpPii,
            S::Low,
            vec![P::regex(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")],
        )
        .named("Email address")
        .with_false_positive_rate(0.2),
        RuleDefinition::new(
            "DLP_US_SSN",
            C::DlpPii,
            S::High,
            vec![P::regex(r"\b\d{3}-\d{2}-\d{4}\b")],
        )
        .named("US social security number")
        .with_false_positive_rate(0.1),
        RuleDefinition::new(
            "DLP_CREDIT_CARD",
            C::DlpPaymentCard,
            S::High,
            vec![P::regex(
                r"\b(4\d{3}|5[1-5]\d{2}|3[47]\d{2}|6011)[ -]?\d{4}[ -]?\d{4}[ -]?\d{1,4}\b",
            )],
        )
        .named("Payment card number")
        .with_false_positive_rate(0.15),
    ]
}

fn semantic_rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition::new(
            "SEM_PATH_TRAVERSAL",
            C::SemanticPathTraversal,
            S::High,
            vec![P::regex(r"\.\./"), P::regex(r"\.\.\\\\")],
        )
        .named("Relative path traversal"),
        RuleDefinition::new(
            "SEM_SHELL_INJECTION",
            C::SemanticInjection,
            S::Critical,
            vec![
                P::regex(r";\s*(rm|curl|wget|nc|bash|sh|python)\b"),
                P::regex(r"&&\s*(rm|curl|wget|nc)\b"),
                P::regex(r"\$\([^)]*\)"),
                P::regex(r"`[^`]+`"),
            ],
        )
        .named("Shell command injection"),
        RuleDefinition::new(
            "SEM_SQL_INJECTION",
            C::SemanticInjection,
            S::High,
            vec![
                P::regex(r"\bor\s+1\s*=\s*1\b").with_flags("i"),
                P::regex(r";\s*drop\s+table\b").with_flags("i"),
                P::regex(r"\bunion\s+select\b").with_flags("i"),
            ],
        )
        .named("SQL injection"),
        RuleDefinition::new(
            "SEM_PROMPT_INJECTION",
            C::SemanticInjection,
            S::High,
            vec![
                P::keyword("ignore previous instructions"),
                P::keyword("ignore all previous instructions"),
                P::keyword("disregard your instructions"),
            ],
        )
        .named("Prompt injection phrase")
        .with_false_positive_rate(0.05),
        RuleDefinition::new(
            "SEM_DESTRUCTIVE_COMMAND",
            C::SemanticDangerousCombo,
            S::Critical,
            vec![
                P::regex(r"\brm\s+-(rf|fr)\s+/"),
                P::regex(r"\bmkfs(\.\w+)?\b"),
                P::regex(r"\bdd\s+if=\S+\s+of=/dev/"),
                P::regex(r":\(\)\s*\{\s*:\|:&\s*\};:"),
            ],
        )
        .named("Destructive command"),
        RuleDefinition::new(
            "SEM_DOWNLOAD_AND_EXECUTE",
            C::SemanticDangerousCombo,
            S::Critical,
            vec![P::custom("download_and_execute")],
        )
        .named("Download piped into interpreter"),
        RuleDefinition::new(
            "SEM_SECRET_TO_NETWORK",
            C::SemanticSecretLeakage,
            S::Critical,
            vec![P::custom("secret_to_network")],
        )
        .named("Secret sent over the network"),
        RuleDefinition::new(
            "SEM_SENSITIVE_FILE",
            C::SemanticSecretLeakage,
            S::High,
            vec![
                P::regex(r"/etc/(passwd|shadow|sudoers)\b"),
                P::regex(r"\.ssh/(id_[a-z0-9]+|authorized_keys)"),
                P::regex(r"\.aws/credentials"),
                P::regex(r#"(^|[/"])\.env(\.[a-z]+)?""#),
            ],
        )
        .named("Sensitive file reference"),
        RuleDefinition::new(
            "SEM_CHMOD_WORLD_WRITABLE",
            C::SemanticDangerousCombo,
            S::Medium,
            vec![P::regex(r"chmod\s+(-R\s+)?777")],
        )
        .named("World-writable permissions"),
    ]
}

fn taint_rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition::new(
            "TAINT_SECRET_CONTENT",
            C::TaintSource,
            S::High,
            vec![
                P::regex(r"-----BEGIN ([A-Z]+ )?PRIVATE KEY-----"),
                P::regex(r"\b(AKIA|ASIA)[0-9A-Z]{16}\b"),
                P::regex(r"\bsk-(proj-)?[A-Za-z0-9_-]{20,}"),
            ],
        )
        .named("Secret material in data"),
        RuleDefinition::new(
            "TAINT_SENSITIVE_PATH",
            C::TaintSource,
            S::High,
            vec![
                P::regex(r"/etc/shadow\b"),
                P::regex(r"\.ssh/"),
                P::regex(r"\.aws/credentials"),
                P::regex(r#"(^|[/"])\.env(\.[a-z]+)?""#),
            ],
        )
        .named("Read from sensitive location"),
        RuleDefinition::new(
            "TAINT_EXTERNAL_DESTINATION",
            C::TaintSink,
            S::Medium,
            vec![
                P::regex(r"https?://").with_flags("i"),
                P::regex(r#""(to|recipient|recipients)":"#),
            ],
        )
        .named("Data leaving the trust boundary"),
    ]
}

fn drift_rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition::new(
            "DRIFT_SENSITIVE_TARGET",
            C::DriftTarget,
            S::High,
            vec![
                P::regex(r"/etc/"),
                P::regex(r"\bsudo\b").with_flags("i"),
                P::regex(r"https?://(\d{1,3}\.){3}\d{1,3}").with_flags("i"),
            ],
        )
        .named("Parameter drifted to a sensitive target"),
        RuleDefinition::new(
            "DRIFT_WILDCARD",
            C::DriftParameter,
            S::Medium,
            vec![P::regex(r#""\*""#), P::regex(r"/\*\*?")],
        )
        .named("Parameter drifted to a wildcard")
        .with_action(RuleAction::Log),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::RuleSet;

    #[test]
    fn test_unknown_name_is_none() {
        assert!(definition("nope").unwrap().is_none());
    }

    #[test]
    fn test_all_builtin_rules_compile() {
        for name in NAMES {
            let def = definition(name).unwrap().unwrap();
            let count = def.rules.len();
            let set = RuleSet::from_definition(def);
            assert_eq!(set.rules.len(), count, "{name}: {:?}", set.skipped);
        }
    }

    #[test]
    fn test_builtin_rule_ids_unique() {
        let mut ids = std::collections::HashSet::new();
        for name in NAMES {
            for rule in RuleSet::from_definition(definition(name).unwrap().unwrap()).rules {
                assert!(ids.insert(rule.rule_id.clone()), "duplicate {}", rule.rule_id);
            }
        }
    }
}
