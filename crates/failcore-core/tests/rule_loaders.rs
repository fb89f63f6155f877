//! Local YAML rulesets overriding the builtin ones, end to end.

use std::fs;
use std::sync::Arc;

use failcore_core::rules::{CompositeLoader, RuleLoader, YamlDirLoader};
use failcore_core::validation::builtin::ids;
use failcore_core::{
    DetectorRegistry, EnforcementMode, EngineMode, Executor, GuardConfig, GuardDomain, GuardSet,
    Policy, RuleRegistry, RunContext, Step, ToolOutput, ToolRegistry, ValidatorConfig,
};
use serde_json::{json, Map, Value};

const CUSTOM_DLP: &str = r#"
name: dlp
version: "local-1"
description: project tokens only
rules:
  - rule_id: PROJECT_TOKEN
    name: Project API token
    category: DLP_SECRET_TOKEN
    severity: high
    patterns:
      - pattern_type: regex
        value: "tok_[a-z0-9]{8}"
"#;

#[test]
fn yaml_dir_lists_and_loads_rulesets() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("dlp.yaml"), CUSTOM_DLP).unwrap();
    fs::write(dir.path().join("README.md"), "not a ruleset").unwrap();

    let loader = YamlDirLoader::new(dir.path());
    assert_eq!(loader.available(), vec!["dlp".to_string()]);
    let set = loader.load("dlp").unwrap().unwrap();
    assert_eq!(set.version, "local-1");
    assert_eq!(set.rules[0].rule_id, "PROJECT_TOKEN");
    assert!(loader.load("semantic").unwrap().is_none());
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.yml"), "rules: [unterminated").unwrap();

    let loader = YamlDirLoader::new(dir.path());
    assert!(loader.load("broken").is_err());
}

#[test]
fn local_override_shadows_builtin_ruleset() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("dlp.yaml"), CUSTOM_DLP).unwrap();

    let mut registry = RuleRegistry::new(Arc::new(CompositeLoader::with_local_overrides(
        dir.path(),
    )));
    assert_eq!(registry.load_ruleset("dlp").unwrap(), 1);
    assert!(registry.get("PROJECT_TOKEN").is_some());
    assert!(registry.get("DLP_AWS_ACCESS_KEY").is_none());

    // names absent locally fall through to the builtin loader
    assert!(registry.load_ruleset("semantic").unwrap() > 0);
}

#[test]
fn guards_built_from_local_rules_block_custom_secret() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("dlp.yaml"), CUSTOM_DLP).unwrap();

    let guards = GuardSet::from_config(
        &GuardConfig::default(),
        Arc::new(CompositeLoader::with_local_overrides(dir.path())),
        Arc::new(DetectorRegistry::builtin()),
    )
    .unwrap();
    let dlp = guards
        .capabilities()
        .into_iter()
        .find(|c| c.domain == GuardDomain::Dlp)
        .unwrap();
    assert_eq!(dlp.mode, EngineMode::Real);
    assert_eq!(dlp.rule_count, 1);

    let mut tools = ToolRegistry::new();
    tools
        .register("post_comment", |_: &Map<String, Value>| -> anyhow::Result<ToolOutput> {
            Ok(Value::Null.into())
        })
        .unwrap();
    let executor = Executor::builder(tools)
        .guards(Arc::new(guards))
        .policy(Policy::new("1").with_validator(
            ids::DLP,
            ValidatorConfig::new(EnforcementMode::Block, 30),
        ))
        .build();
    let run = RunContext::new("run-yaml").unwrap();

    let result = executor.execute(
        &Step::new(
            "s1",
            "post_comment",
            json!({"text": "use tok_abcd1234"}).as_object().cloned().unwrap(),
        ),
        &run,
    );
    assert!(result.is_blocked());
    assert_eq!(result.error_code(), Some("FC_DLP_SECRET_TOKEN"));
    assert_eq!(result.error.unwrap().detail["rule_id"], "PROJECT_TOKEN");
}
