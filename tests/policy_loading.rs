use std::fs;
use std::path::Path;
use std::sync::Arc;

use vigil::{
    Capabilities, DirectoryProvider, Engine, EngineConfig, Event, EventSink, FieldRegistry,
    FileProvider, LoadError, MapEvent, Opts, PolicyLoader, PolicyProvider, Rule, ValueKind,
};

const DEFAULT: &str = r#"
version: "1.0"
macros:
  - id: secrets
    values: [/etc/shadow, /etc/gshadow]
rules:
  - id: secret_open
    expression: open.filename in secrets
  - id: etc_write
    expression: open.filename =~ "/etc/*" && open.flags > 0
"#;

const CUSTOM: &str = r#"
version: 2
macros:
  - id: secrets
    combine: override
    values: [/etc/shadow, /root/.ssh/id_rsa]
rules:
  - id: etc_write
    expression: open.flags > 0
    combine: override
    disabled: true
  - id: shell
    expression: exec.filename in ["/bin/sh", "/bin/bash"]
    rate_limit:
      burst: 5
      rate: 1.0
"#;

fn opts() -> Opts {
    Opts::new(
        FieldRegistry::new()
            .field("open.filename", ValueKind::String)
            .field("open.flags", ValueKind::Int)
            .field("exec.filename", ValueKind::String),
    )
}

fn write(dir: &Path, name: &str, text: &str) {
    fs::write(dir.join(name), text).unwrap();
}

#[test]
fn directory_provider_orders_default_first() {
    let dir = tempfile::tempdir().unwrap();
    // "custom" sorts before "default" but must be merged after it.
    write(dir.path(), "a_custom.policy", CUSTOM);
    write(dir.path(), "default.policy", DEFAULT);
    write(dir.path(), ".hidden.policy", "not: [valid");
    write(dir.path(), "notes.txt", "ignored");
    fs::create_dir(dir.path().join("nested.policy")).unwrap();

    let provider = DirectoryProvider::new(dir.path());
    let (policies, errors) = provider.load_policies();
    assert!(errors.is_empty(), "{errors}");
    let names: Vec<&str> = policies.iter().map(|p| p.name()).collect();
    assert_eq!(names, vec!["default", "a_custom"]);
    assert_eq!(policies[1].info.version, "2");

    let loader = PolicyLoader::new().provider(Arc::new(provider));
    let (ruleset, errors) = loader.load_rule_set(opts());
    assert!(errors.is_empty(), "{errors}");
    assert_eq!(ruleset.rule_ids(), vec!["secret_open", "shell"]);
    assert_eq!(ruleset.policies_versions(), vec!["1.0", "2"]);

    let key = MapEvent::new("open")
        .set("open.filename", "/root/.ssh/id_rsa")
        .set("open.flags", 0_i64);
    assert!(ruleset.evaluate(&key));
    let gshadow = MapEvent::new("open")
        .set("open.filename", "/etc/gshadow")
        .set("open.flags", 1_i64);
    assert!(!ruleset.evaluate(&gshadow));
}

#[test]
fn invalid_files_are_reported_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "default.policy", DEFAULT);
    write(dir.path(), "broken.policy", "rules: {not a list");
    write(
        dir.path(),
        "typo.policy",
        "rules:\n  - id: typo\n    expression: open.filname == \"x\"\n",
    );

    let loader = PolicyLoader::new().provider(Arc::new(DirectoryProvider::new(dir.path())));
    let (ruleset, errors) = loader.load_rule_set(opts());

    assert_eq!(ruleset.rule_ids(), vec!["secret_open", "etc_write"]);
    let errors: Vec<&LoadError> = errors.iter().collect();
    assert_eq!(errors.len(), 2, "{errors:?}");
    assert!(matches!(errors[0], LoadError::Yaml { policy, .. } if policy == "broken"));
    assert!(matches!(errors[1], LoadError::Rule { id, .. } if id == "typo"));
}

#[test]
fn missing_sources_are_load_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");

    let (policies, errors) = DirectoryProvider::new(&missing).load_policies();
    assert!(policies.is_empty());
    assert!(matches!(errors.iter().next(), Some(LoadError::Io { .. })));

    let file = FileProvider::new(missing.join("default.policy"));
    assert!(file.name().starts_with("file:"));
    let (policies, errors) = file.load_policies();
    assert!(policies.is_empty());
    assert_eq!(errors.len(), 1);
}

struct NullSink;

impl EventSink for NullSink {
    fn send(&self, _rule: &Rule, _event: &dyn Event) {}
}

#[test]
fn engine_loads_the_configured_directory() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "default.policy", DEFAULT);
    write(dir.path(), "custom.policy", CUSTOM);
    let config_path = dir.path().join("vigil.yaml");
    fs::write(
        &config_path,
        format!(
            "policies_dir: {}\ndefault_rate_limit:\n  burst: 10\n  rate: 2.5\n",
            dir.path().display()
        ),
    )
    .unwrap();

    let config = EngineConfig::from_file(&config_path).unwrap();
    let engine = Engine::new(config, opts(), Capabilities::new(), Arc::new(NullSink));
    engine.add_policies_dir();
    let report = engine.reload();

    assert!(report.errors.is_empty(), "{}", report.errors);
    assert_eq!(report.rules, 2);
    assert_eq!(report.policies_versions, vec!["1.0", "2"]);
    assert_eq!(engine.rate_limiter().rule_ids(), vec!["secret_open", "shell"]);
    assert!(engine.handle_event(&MapEvent::new("exec").set("exec.filename", "/bin/bash")));

    // Editing a rule changes the digest on the next reload.
    let edited = CUSTOM
        .replace("version: 2", "version: 3")
        .replace("/bin/bash", "/bin/zsh");
    write(dir.path(), "custom.policy", &edited);
    let next = engine.reload();
    assert_ne!(report.digest, next.digest);
    assert_eq!(next.policies_versions, vec!["1.0", "3"]);
}
