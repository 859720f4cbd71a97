use std::sync::Arc;

use vigil::{
    ApproverKind, Capabilities, Discarder, Engine, EngineConfig, Event, EventSink, FieldRegistry,
    MapEvent, Opts, Policy, Rule, StaticProvider, ValueKind,
};

const BASE: &str = r#"
version: "1.0"
macros:
  - id: secrets
    values: [/etc/shadow, /etc/gshadow]
rules:
  - id: secret_open
    expression: open.filename in secrets
  - id: tmp_exec
    expression: exec.filename =~ "/tmp/*"
"#;

const LOCAL: &str = r#"
version: "1.0-local"
macros:
  - id: secrets
    combine: override
    values: [/etc/shadow, /etc/gshadow, /etc/sudoers]
rules:
  - id: tmp_exec
    expression: exec.filename =~ "/tmp/*" || exec.filename =~ "/dev/shm/*"
    combine: override
"#;

struct PrintSink;

impl EventSink for PrintSink {
    fn send(&self, rule: &Rule, event: &dyn Event) {
        println!("alert: {} on {} event", rule.id(), event.event_type());
    }

    fn on_discarder(&self, discarder: &Discarder) {
        println!("discard: {discarder}");
    }
}

fn main() {
    let opts = Opts::new(
        FieldRegistry::new()
            .field("open.filename", ValueKind::String)
            .field("exec.filename", ValueKind::String),
    );
    let capabilities = Capabilities::new()
        .field("open.filename", [ApproverKind::Exact])
        .field("exec.filename", [ApproverKind::Exact, ApproverKind::Prefix]);

    let provider = StaticProvider::new("builtin")
        .policy(Policy::from_yaml("base", "builtin", BASE).expect("invalid base policy"))
        .policy(Policy::from_yaml("local", "builtin", LOCAL).expect("invalid local policy"));

    let engine = Engine::new(
        EngineConfig::default(),
        opts,
        capabilities,
        Arc::new(PrintSink),
    );
    let report = engine.load_policies(vec![Arc::new(provider)]);

    println!("loaded {} rules, versions {:?}", report.rules, report.policies_versions);
    for approver in report.approvers.iter() {
        println!("approver: {} {} {}", approver.event_type, approver.field, approver.value);
    }

    engine.handle_event(&MapEvent::new("open").set("open.filename", "/etc/sudoers"));
    engine.handle_event(&MapEvent::new("open").set("open.filename", "/var/log/syslog"));
    engine.handle_event(&MapEvent::new("exec").set("exec.filename", "/dev/shm/payload"));
}
