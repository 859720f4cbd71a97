use vigil::{FieldRegistry, MapEvent, Opts, RuleDefinition, RuleSetBuilder, ValueKind};

fn main() {
    let opts = Opts::new(
        FieldRegistry::new()
            .field("open.filename", ValueKind::String)
            .field("open.flags", ValueKind::Int)
            .field("exec.filename", ValueKind::String)
            .common_field("process.uid", ValueKind::Int),
    );

    let ruleset = RuleSetBuilder::new(opts)
        .rule(RuleDefinition::new(
            "shadow_read",
            r#"open.filename == "/etc/shadow" && process.uid != 0"#,
        ))
        .rule(RuleDefinition::new(
            "shell",
            r#"exec.filename in ["/bin/sh", "/bin/bash"]"#,
        ))
        .compile()
        .expect("failed to compile ruleset");

    println!("{ruleset}");

    let events = [
        MapEvent::new("open")
            .set("open.filename", "/etc/shadow")
            .set("process.uid", 1000_i64),
        MapEvent::new("open")
            .set("open.filename", "/tmp/x")
            .set("process.uid", 1000_i64),
        MapEvent::new("open")
            .set("open.filename", "/tmp/x")
            .set("process.uid", 1000_i64),
        MapEvent::new("exec").set("exec.filename", "/bin/sh"),
    ];

    for event in &events {
        println!("{}", ruleset.evaluate_detailed(event));
    }

    for discarder in ruleset.discarders().entries() {
        println!("discarder: {discarder}");
    }
}
