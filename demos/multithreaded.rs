use std::sync::Arc;
use std::thread;

use vigil::{FieldRegistry, MapEvent, Opts, RuleDefinition, RuleSetBuilder, ValueKind};

fn main() {
    let opts = Opts::new(
        FieldRegistry::new()
            .field("open.filename", ValueKind::String)
            .common_field("process.uid", ValueKind::Int),
    );
    let ruleset = Arc::new(
        RuleSetBuilder::new(opts)
            .rule(RuleDefinition::new(
                "root_ssh_keys",
                r#"open.filename =~ "/root/.ssh/*" && process.uid != 0"#,
            ))
            .compile()
            .expect("failed to compile ruleset"),
    );

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let rs = Arc::clone(&ruleset);
            thread::spawn(move || {
                let filename = if i % 2 == 0 {
                    "/root/.ssh/id_ed25519".to_owned()
                } else {
                    format!("/home/user{i}/notes")
                };
                let event = MapEvent::new("open")
                    .set("open.filename", filename)
                    .set("process.uid", 1000_i64 + i64::from(i));

                let result = rs.evaluate(&event);
                println!("Thread {i}: {result}");
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    println!("{} discarders learned", ruleset.discarders().len());
}
